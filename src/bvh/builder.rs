//! Top-down construction of the flat node array.

use crate::axis::Axis;
use crate::bvh::{BvhNode, SubtreeHeader};
use crate::quantization::Quantizer;
use crate::{Point3, Real, Vector3};
use bytemuck::Zeroable;
use std::mem::size_of;

/// Recursive mean-split builder writing nodes in depth-first pre-order.
///
/// The leaves are reordered in place while partitioning. Every inner node is written before
/// its subtrees, and its escape index is patched in once both subtrees are complete.
pub(crate) struct Builder<N: BvhNode> {
    leaves: Vec<N>,
    centers: Vec<Point3>,
    nodes: Vec<N>,
    cur_node_index: usize,
    subtree_headers: Vec<SubtreeHeader>,
    max_subtree_size_in_bytes: usize,
}

impl<N: BvhNode> Builder<N> {
    /// Prepares a build over `leaves`, which must not be empty.
    pub fn new(leaves: Vec<N>, quantizer: &Quantizer, max_subtree_size_in_bytes: usize) -> Self {
        debug_assert!(!leaves.is_empty());
        let centers = leaves.iter().map(|leaf| leaf.center(quantizer)).collect();
        let node_count = 2 * leaves.len() - 1;
        Builder {
            leaves,
            centers,
            nodes: vec![<N as Zeroable>::zeroed(); node_count],
            cur_node_index: 0,
            subtree_headers: Vec::new(),
            max_subtree_size_in_bytes,
        }
    }

    /// Builds the tree and returns the node array and the harvested subtree headers.
    ///
    /// Headers are only harvested for quantized nodes. If no subtree exceeded the byte
    /// budget, the root becomes the single header.
    pub fn build(mut self) -> (Vec<N>, Vec<SubtreeHeader>) {
        let leaf_count = self.leaves.len();
        self.build_tree(0, leaf_count);
        debug_assert_eq!(self.cur_node_index, self.nodes.len());

        if self.subtree_headers.is_empty() {
            if let Some(aabb) = self.nodes[0].quantized_aabb() {
                let header = SubtreeHeader::new(aabb, 0, self.nodes[0].subtree_size());
                self.subtree_headers.push(header);
            }
        }
        (self.nodes, self.subtree_headers)
    }

    fn build_tree(&mut self, start: usize, end: usize) {
        let num_indices = end - start;
        let cur_index = self.cur_node_index;
        debug_assert!(num_indices > 0);

        if num_indices == 1 {
            self.nodes[cur_index] = self.leaves[start];
            self.cur_node_index += 1;
            return;
        }

        let split_axis = self.calc_splitting_axis(start, end);
        let split_index = self.sort_and_calc_splitting_index(start, end, split_axis);

        let mut inner = N::new_inner();
        for leaf in &self.leaves[start..end] {
            inner.join_bounds(leaf);
        }
        self.nodes[cur_index] = inner;
        self.cur_node_index += 1;

        let left_child = self.cur_node_index;
        self.build_tree(start, split_index);
        let right_child = self.cur_node_index;
        self.build_tree(split_index, end);

        let escape_index = self.cur_node_index - cur_index;
        if escape_index * size_of::<N>() > self.max_subtree_size_in_bytes {
            self.update_subtree_headers(left_child, right_child);
        }
        self.nodes[cur_index].set_escape_index(escape_index);
    }

    /// Registers every child small enough to fit the subtree budget as a header.
    fn update_subtree_headers(&mut self, left_child: usize, right_child: usize) {
        for child in [left_child, right_child] {
            let node = &self.nodes[child];
            let Some(aabb) = node.quantized_aabb() else {
                return;
            };
            let subtree_size = node.subtree_size();
            if subtree_size * size_of::<N>() <= self.max_subtree_size_in_bytes {
                let header = SubtreeHeader::new(aabb, child, subtree_size);
                self.subtree_headers.push(header);
            }
        }
    }

    /// The axis along which the centers of `leaves[start..end]` vary the most.
    fn calc_splitting_axis(&self, start: usize, end: usize) -> Axis {
        let centers = &self.centers[start..end];
        let count = centers.len() as Real;
        let mean = centers
            .iter()
            .fold(Vector3::zeros(), |sum, center| sum + center.coords)
            / count;
        let variance = centers.iter().fold(Vector3::zeros(), |sum, center| {
            let diff = center.coords - mean;
            sum + diff.component_mul(&diff)
        }) / (count - 1.0);
        Axis::of_max_component(&variance)
    }

    /// Moves the leaves whose center lies above the mean on `axis` to the front and returns
    /// the index of the first leaf of the back half.
    ///
    /// Partitions that leave less than a third of the leaves on one side are replaced by an
    /// even split, so `start < split < end` always holds.
    fn sort_and_calc_splitting_index(&mut self, start: usize, end: usize, axis: Axis) -> usize {
        let axis = axis as usize;
        let num_indices = end - start;
        let split_value = self.centers[start..end]
            .iter()
            .map(|center| center[axis])
            .sum::<Real>()
            / num_indices as Real;

        let mut split_index = start;
        for i in start..end {
            if self.centers[i][axis] > split_value {
                self.leaves.swap(i, split_index);
                self.centers.swap(i, split_index);
                split_index += 1;
            }
        }

        let range_balanced_indices = num_indices / 3;
        let unbalanced = split_index <= start + range_balanced_indices
            || split_index >= end - 1 - range_balanced_indices;
        if unbalanced {
            split_index = start + (num_indices >> 1);
        }
        debug_assert!(start < split_index && split_index < end);
        split_index
    }
}
