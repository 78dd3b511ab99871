use crate::bvh::{BoxQuery, BvhNode, FloatBvhNode, NodeQuery, QuantizedBoxQuery, QuantizedBvhNode};
use crate::mesh::TriangleId;
use std::ops::Range;

/// Iterator over the leaves of a node range that satisfy a query, walking the flat node
/// array without a stack.
///
/// Overlapping nodes and leaves advance by one slot. Inner nodes that miss the query are
/// skipped together with their whole subtree by adding their escape index.
pub struct StacklessIter<'n, N: BvhNode, Q: NodeQuery<N>> {
    /// The node array, or the part of it being walked.
    nodes: &'n [N],
    /// The input query.
    query: Q,
    /// Position of the iterator in `nodes`.
    index: usize,
    /// One past the last node of the walked range.
    end: usize,
    /// Number of nodes tested against `query` so far.
    nodes_tested: usize,
}

impl<'n, N: BvhNode, Q: NodeQuery<N>> StacklessIter<'n, N, Q> {
    /// Creates an iterator over the whole tree.
    pub fn new(nodes: &'n [N], query: Q) -> Self {
        Self::with_range(nodes, 0..nodes.len(), query)
    }

    /// Creates an iterator over the nodes in `range`, which must cover complete subtrees.
    pub fn with_range(nodes: &'n [N], range: Range<usize>, query: Q) -> Self {
        debug_assert!(range.end <= nodes.len());
        StacklessIter {
            nodes,
            query,
            index: range.start,
            end: range.end,
            nodes_tested: 0,
        }
    }

    /// Number of nodes tested so far.
    pub fn nodes_tested(&self) -> usize {
        self.nodes_tested
    }
}

impl<N: BvhNode, Q: NodeQuery<N>> Iterator for StacklessIter<'_, N, Q> {
    type Item = TriangleId;

    fn next(&mut self) -> Option<TriangleId> {
        while self.index < self.end {
            let node = &self.nodes[self.index];
            self.nodes_tested += 1;
            let overlap = self.query.overlaps(node);
            let is_leaf = node.is_leaf();

            if overlap || is_leaf {
                self.index += 1;
            } else {
                self.index += node.escape_index();
            }

            if overlap && is_leaf {
                return Some(node.triangle_id());
            }
        }
        None
    }
}

/// Iterator returned by [`crate::bvh::OptimizedBvh::iter_aabb`].
pub enum AabbIter<'n> {
    /// Walks quantized nodes.
    Quantized(StacklessIter<'n, QuantizedBvhNode, QuantizedBoxQuery>),
    /// Walks full precision nodes.
    Float(StacklessIter<'n, FloatBvhNode, BoxQuery>),
}

impl AabbIter<'_> {
    /// Number of nodes tested so far.
    pub fn nodes_tested(&self) -> usize {
        match self {
            AabbIter::Quantized(iter) => iter.nodes_tested(),
            AabbIter::Float(iter) => iter.nodes_tested(),
        }
    }
}

impl Iterator for AabbIter<'_> {
    type Item = TriangleId;

    fn next(&mut self) -> Option<TriangleId> {
        match self {
            AabbIter::Quantized(iter) => iter.next(),
            AabbIter::Float(iter) => iter.next(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::aabb::Aabb;
    use crate::bvh::OptimizedBvh;
    use crate::testbase::{brute_force_overlaps, random_mesh, sorted};
    use crate::Point3;

    #[test]
    /// The iterator yields the same triangles as the callback traversal.
    fn test_iter_matches_traverse() {
        let mesh = random_mesh(300, 11);
        for quantized in [true, false] {
            let bvh = OptimizedBvh::build(&mesh, quantized).unwrap();
            let query = Aabb::with_bounds(Point3::new(-2.0, -2.0, -2.0), Point3::new(3.0, 1.0, 4.0));
            let mut visited = Vec::new();
            bvh.traverse_aabb(&query, |id| visited.push(id));
            let iterated: Vec<_> = bvh.iter_aabb(&query).collect();
            assert_eq!(visited, iterated);
            if !quantized {
                assert_eq!(sorted(iterated), brute_force_overlaps(&mesh, &query));
            }
        }
    }

    #[test]
    /// The iterator can stop early without visiting the rest of the tree.
    fn test_iter_is_lazy() {
        let mesh = random_mesh(300, 12);
        let bvh = OptimizedBvh::build(&mesh, true).unwrap();
        let everything = mesh_bounds(&bvh);
        let mut iter = bvh.iter_aabb(&everything);
        assert!(iter.next().is_some());
        assert!(iter.nodes_tested() < bvh.node_count());
    }

    fn mesh_bounds(bvh: &OptimizedBvh) -> Aabb {
        bvh.quantizer().domain()
    }
}
