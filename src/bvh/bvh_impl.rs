//! This module defines [`OptimizedBvh`], a flat, optionally quantized BVH over the triangles
//! of a [`TriangleSource`].

use crate::aabb::{Aabb, IntersectsAabb};
use crate::bvh::builder::Builder;
use crate::bvh::traverse::traverse;
use crate::bvh::{
    AabbIter, BoxQuery, BvhNode, FloatBvhNode, NodeArray, NodeQuery, QuantizedBoxQuery,
    QuantizedBvhNode, StacklessIter, Storage, SubtreeHeader, SweptBoxQuery, TraversalMode,
    TraversalStats, MAX_NUM_PARTS, MAX_TRIANGLES_PER_PART,
};
use crate::error::{Error, Result};
use crate::mesh::{TriangleId, TriangleSource};
use crate::quantization::Quantizer;
use crate::{Point3, Real, Vector3};
use std::collections::HashSet;

/// Default byte budget of a subtree summarized by one [`SubtreeHeader`].
pub const MAX_SUBTREE_SIZE_IN_BYTES: usize = 2048;

/// Options controlling [`OptimizedBvh::build_with_options`].
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BuildOptions {
    /// Store 16 byte quantized nodes instead of full precision nodes.
    pub use_quantization: bool,
    /// Quantization domain. Defaults to the bounds of the source.
    pub domain: Option<Aabb>,
    /// Padding added around the domain on every side.
    pub quantization_margin: Real,
    /// Largest subtree, in bytes of nodes, summarized by one subtree header.
    pub max_subtree_size_in_bytes: usize,
    /// Strategy used by [`OptimizedBvh::traverse_aabb`] and the segment queries.
    pub traversal_mode: TraversalMode,
}

impl Default for BuildOptions {
    fn default() -> BuildOptions {
        BuildOptions {
            use_quantization: true,
            domain: None,
            quantization_margin: 1.0,
            max_subtree_size_in_bytes: MAX_SUBTREE_SIZE_IN_BYTES,
            traversal_mode: TraversalMode::Stackless,
        }
    }
}

/// A BVH stored as one flat array of nodes in depth-first pre-order.
///
/// Every inner node is followed by its left subtree and then its right subtree, and knows
/// the size of its subtree (the escape index). Leaves reference one triangle of the source
/// the tree was built over. The tree keeps no reference to that source.
///
/// The lifetime `'a` is the one of the buffer a tree was deserialized from. Built trees are
/// `OptimizedBvh<'static>`.
#[derive(Debug)]
pub struct OptimizedBvh<'a> {
    pub(crate) quantizer: Quantizer,
    pub(crate) margin: Real,
    pub(crate) nodes: NodeArray<'a>,
    pub(crate) subtree_headers: Storage<'a, SubtreeHeader>,
    pub(crate) traversal_mode: TraversalMode,
    /// Header bytes of the image a tree was deserialized from, kept in sync on refits.
    pub(crate) image_header: Option<&'a mut [u8]>,
}

impl OptimizedBvh<'static> {
    /// Builds a tree over all triangles of `source` with default options.
    pub fn build<S: TriangleSource>(
        source: &S,
        use_quantization: bool,
    ) -> Result<OptimizedBvh<'static>> {
        let options = BuildOptions {
            use_quantization,
            ..BuildOptions::default()
        };
        Self::build_with_options(source, &options)
    }

    /// Builds a tree over all triangles of `source` quantized against `domain`.
    ///
    /// `domain` should contain every position the triangles will take until the next full
    /// refit.
    pub fn build_with_domain<S: TriangleSource>(
        source: &S,
        use_quantization: bool,
        domain: &Aabb,
    ) -> Result<OptimizedBvh<'static>> {
        let options = BuildOptions {
            use_quantization,
            domain: Some(*domain),
            ..BuildOptions::default()
        };
        Self::build_with_options(source, &options)
    }

    /// Builds a tree over all triangles of `source`.
    pub fn build_with_options<S: TriangleSource>(
        source: &S,
        options: &BuildOptions,
    ) -> Result<OptimizedBvh<'static>> {
        let domain = options.domain.unwrap_or_else(|| source.bounding_box());
        let quantizer = Quantizer::new(&domain, options.quantization_margin);

        let (nodes, subtree_headers) = if options.use_quantization {
            check_addressable(source)?;
            let (nodes, headers) = build_nodes::<QuantizedBvhNode, S>(
                source,
                &quantizer,
                options.max_subtree_size_in_bytes,
            );
            (NodeArray::Quantized(Storage::Owned(nodes)), headers)
        } else {
            let (nodes, headers) = build_nodes::<FloatBvhNode, S>(
                source,
                &quantizer,
                options.max_subtree_size_in_bytes,
            );
            (NodeArray::Float(Storage::Owned(nodes)), headers)
        };

        log::debug!(
            "Built {} BVH over {} triangles: {} nodes, {} subtree headers, domain {}",
            if options.use_quantization {
                "quantized"
            } else {
                "full precision"
            },
            source.num_triangles(),
            nodes.len(),
            subtree_headers.len(),
            quantizer.domain(),
        );

        Ok(OptimizedBvh {
            quantizer,
            margin: options.quantization_margin,
            nodes,
            subtree_headers: Storage::Owned(subtree_headers),
            traversal_mode: options.traversal_mode,
            image_header: None,
        })
    }
}

/// Fails if a triangle id of `source` does not fit into a quantized leaf.
fn check_addressable<S: TriangleSource>(source: &S) -> Result<()> {
    let parts = source.num_sub_parts();
    if parts > MAX_NUM_PARTS {
        return Err(Error::TooManyParts {
            parts,
            max: MAX_NUM_PARTS,
        });
    }
    for part in 0..parts {
        let count = source.num_triangles_in_part(part);
        if count > MAX_TRIANGLES_PER_PART {
            return Err(Error::TriangleIndexOverflow {
                index: count - 1,
                max: MAX_TRIANGLES_PER_PART - 1,
            });
        }
    }
    Ok(())
}

fn build_nodes<N: BvhNode, S: TriangleSource>(
    source: &S,
    quantizer: &Quantizer,
    max_subtree_size_in_bytes: usize,
) -> (Vec<N>, Vec<SubtreeHeader>) {
    let mut leaves = Vec::with_capacity(source.num_triangles());
    source.for_each_triangle(|vertices, id| {
        leaves.push(N::new_leaf(&Aabb::from_points(&vertices), id, quantizer));
    });
    if leaves.is_empty() {
        return (Vec::new(), Vec::new());
    }
    Builder::new(leaves, quantizer, max_subtree_size_in_bytes).build()
}

impl<'a> OptimizedBvh<'a> {
    /// Returns true if the nodes store quantized bounds.
    pub fn is_quantized(&self) -> bool {
        self.nodes.is_quantized()
    }

    /// Number of nodes, `2 * n - 1` for `n` triangles.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The node array.
    pub fn nodes(&self) -> &NodeArray<'a> {
        &self.nodes
    }

    /// The quantized nodes, if the tree is quantized.
    pub fn quantized_nodes(&self) -> Option<&[QuantizedBvhNode]> {
        match &self.nodes {
            NodeArray::Quantized(nodes) => Some(&nodes[..]),
            NodeArray::Float(_) => None,
        }
    }

    /// The full precision nodes, if the tree is not quantized.
    pub fn float_nodes(&self) -> Option<&[FloatBvhNode]> {
        match &self.nodes {
            NodeArray::Quantized(_) => None,
            NodeArray::Float(nodes) => Some(&nodes[..]),
        }
    }

    /// The subtree headers. Empty for trees without quantization.
    pub fn subtree_headers(&self) -> &[SubtreeHeader] {
        &self.subtree_headers
    }

    /// The quantization domain and scale.
    pub fn quantizer(&self) -> &Quantizer {
        &self.quantizer
    }

    /// The margin added around the domain by full refits.
    pub fn quantization_margin(&self) -> Real {
        self.margin
    }

    /// The strategy used by [`OptimizedBvh::traverse_aabb`] and the segment queries.
    pub fn traversal_mode(&self) -> TraversalMode {
        self.traversal_mode
    }

    /// Changes the strategy used by [`OptimizedBvh::traverse_aabb`] and the segment queries.
    pub fn set_traversal_mode(&mut self, traversal_mode: TraversalMode) {
        self.traversal_mode = traversal_mode;
        self.write_image_header();
    }

    /// The bounds of the root, or an empty box for a tree without triangles.
    pub fn root_aabb(&self) -> Aabb {
        match &self.nodes {
            NodeArray::Quantized(nodes) => nodes.first().map(|n| n.aabb(&self.quantizer)),
            NodeArray::Float(nodes) => nodes.first().map(|n| n.float_aabb()),
        }
        .unwrap_or_else(Aabb::empty)
    }

    /// Copies the tree into owned memory, detaching it from a deserialization buffer.
    pub fn to_owned_bvh(&self) -> OptimizedBvh<'static> {
        OptimizedBvh {
            quantizer: self.quantizer,
            margin: self.margin,
            nodes: self.nodes.to_owned_array(),
            subtree_headers: self.subtree_headers.to_owned_storage(),
            traversal_mode: self.traversal_mode,
            image_header: None,
        }
    }

    /// Calls `visitor` for every triangle whose leaf bounds overlap `aabb`, using the
    /// configured [`TraversalMode`].
    ///
    /// Quantized trees are conservative: they may report triangles whose exact bounds just
    /// miss `aabb`, but never miss one that overlaps it.
    pub fn traverse_aabb<V: FnMut(TriangleId)>(&self, aabb: &Aabb, visitor: V) -> TraversalStats {
        self.traverse_aabb_with_mode(self.traversal_mode, aabb, visitor)
    }

    /// [`OptimizedBvh::traverse_aabb`] with a linear walk over the node array.
    pub fn traverse_aabb_stackless<V: FnMut(TriangleId)>(
        &self,
        aabb: &Aabb,
        visitor: V,
    ) -> TraversalStats {
        self.traverse_aabb_with_mode(TraversalMode::Stackless, aabb, visitor)
    }

    /// [`OptimizedBvh::traverse_aabb`] walking only subtrees whose header overlaps `aabb`.
    pub fn traverse_aabb_cache_friendly<V: FnMut(TriangleId)>(
        &self,
        aabb: &Aabb,
        visitor: V,
    ) -> TraversalStats {
        self.traverse_aabb_with_mode(TraversalMode::StacklessCacheFriendly, aabb, visitor)
    }

    /// [`OptimizedBvh::traverse_aabb`] with depth-first recursion.
    pub fn traverse_aabb_recursive<V: FnMut(TriangleId)>(
        &self,
        aabb: &Aabb,
        visitor: V,
    ) -> TraversalStats {
        self.traverse_aabb_with_mode(TraversalMode::Recursive, aabb, visitor)
    }

    /// [`OptimizedBvh::traverse_aabb`] with an explicit strategy.
    pub fn traverse_aabb_with_mode<V: FnMut(TriangleId)>(
        &self,
        mode: TraversalMode,
        aabb: &Aabb,
        mut visitor: V,
    ) -> TraversalStats {
        match &self.nodes {
            NodeArray::Quantized(nodes) => {
                if !aabb.intersects_aabb(&self.quantizer.domain()) {
                    return TraversalStats::default();
                }
                let query = QuantizedBoxQuery::new(aabb, &self.quantizer);
                traverse(mode, nodes, &self.subtree_headers, &query, &mut visitor)
            }
            NodeArray::Float(nodes) => {
                let query = BoxQuery { bounds: *aabb };
                traverse(mode, nodes, &self.subtree_headers, &query, &mut visitor)
            }
        }
    }

    /// Returns an iterator over the triangles whose leaf bounds overlap `aabb`.
    ///
    /// The iterator walks the node array linearly, like [`TraversalMode::Stackless`].
    pub fn iter_aabb(&self, aabb: &Aabb) -> AabbIter<'_> {
        match &self.nodes {
            NodeArray::Quantized(nodes) => {
                let query = QuantizedBoxQuery::new(aabb, &self.quantizer);
                let range = if aabb.intersects_aabb(&self.quantizer.domain()) {
                    0..nodes.len()
                } else {
                    0..0
                };
                AabbIter::Quantized(StacklessIter::with_range(nodes, range, query))
            }
            NodeArray::Float(nodes) => {
                AabbIter::Float(StacklessIter::new(nodes, BoxQuery { bounds: *aabb }))
            }
        }
    }

    /// Calls `visitor` for every triangle whose leaf bounds the segment from `source` to
    /// `target` passes through.
    pub fn traverse_ray<V: FnMut(TriangleId)>(
        &self,
        source: &Point3,
        target: &Point3,
        visitor: V,
    ) -> TraversalStats {
        let zero = Vector3::zeros();
        self.traverse_box_cast(source, target, &zero, &zero, visitor)
    }

    /// Calls `visitor` for every triangle whose leaf bounds are touched by the box
    /// `aabb_min..=aabb_max` swept along the segment from `source` to `target`.
    ///
    /// `aabb_min` and `aabb_max` are relative to the moving center, so `aabb_min` is usually
    /// negative.
    pub fn traverse_box_cast<V: FnMut(TriangleId)>(
        &self,
        source: &Point3,
        target: &Point3,
        aabb_min: &Vector3,
        aabb_max: &Vector3,
        mut visitor: V,
    ) -> TraversalStats {
        let query = SweptBoxQuery::new(source, target, aabb_min, aabb_max, &self.quantizer);
        match &self.nodes {
            NodeArray::Quantized(nodes) => {
                if !query.sweep_bounds().intersects_aabb(&self.quantizer.domain()) {
                    return TraversalStats::default();
                }
                self.traverse_segment(nodes, &query, &mut visitor)
            }
            NodeArray::Float(nodes) => self.traverse_segment(nodes, &query, &mut visitor),
        }
    }

    fn traverse_segment<N, Q, V>(&self, nodes: &[N], query: &Q, visitor: &mut V) -> TraversalStats
    where
        N: BvhNode,
        Q: NodeQuery<N>,
        V: FnMut(TriangleId),
    {
        traverse(
            self.traversal_mode,
            nodes,
            &self.subtree_headers,
            query,
            visitor,
        )
    }

    /// Answers many box queries in parallel. Result `i` lists the triangles of query `i`
    /// in traversal order.
    #[cfg(feature = "rayon")]
    pub fn query_aabbs_par(&self, queries: &[Aabb]) -> Vec<Vec<TriangleId>> {
        use rayon::prelude::*;

        queries
            .par_iter()
            .map(|query| {
                let mut hits = Vec::new();
                self.traverse_aabb(query, |id| hits.push(id));
                hits
            })
            .collect()
    }

    /// Prints the tree in a tree-like visualization.
    pub fn pretty_print(&self) {
        match &self.nodes {
            NodeArray::Quantized(nodes) => self.print_nodes(nodes),
            NodeArray::Float(nodes) => self.print_nodes(nodes),
        }
        for (i, header) in self.subtree_headers.iter().enumerate() {
            println!(
                "header={} root={} size={} aabb={:?}",
                i,
                header.root_node_index(),
                header.subtree_size(),
                header.aabb
            );
        }
    }

    fn print_nodes<N: BvhNode>(&self, nodes: &[N]) {
        // Open subtrees as (end index) so depth is the number of enclosing ones.
        let mut open: Vec<usize> = Vec::new();
        for (index, node) in nodes.iter().enumerate() {
            while open.last().is_some_and(|&end| end <= index) {
                open.pop();
            }
            let padding = " ".repeat(open.len());
            if node.is_leaf() {
                let id = node.triangle_id();
                println!(
                    "{}leaf={} part={} triangle={} {}",
                    padding,
                    index,
                    id.sub_part,
                    id.triangle_index,
                    node.aabb(&self.quantizer)
                );
            } else {
                println!(
                    "{}node={} escape={} {}",
                    padding,
                    index,
                    node.escape_index(),
                    node.aabb(&self.quantizer)
                );
                open.push(index + node.escape_index());
            }
        }
    }

    /// Panics if the tree is not well formed.
    ///
    /// Checks the node count against the number of leaves, that escape indices partition
    /// the array into two child subtrees, that every inner node's bounds are exactly the
    /// union of its children's, that every leaf references a distinct triangle, and that
    /// every subtree header matches its root node.
    pub fn assert_consistent(&self) {
        match &self.nodes {
            NodeArray::Quantized(nodes) => self.assert_consistent_nodes(nodes),
            NodeArray::Float(nodes) => self.assert_consistent_nodes(nodes),
        }

        let NodeArray::Quantized(nodes) = &self.nodes else {
            assert!(
                self.subtree_headers.is_empty(),
                "full precision trees carry no subtree headers"
            );
            return;
        };
        if !nodes.is_empty() {
            assert!(
                !self.subtree_headers.is_empty(),
                "quantized tree without subtree headers"
            );
        }
        for (i, header) in self.subtree_headers.iter().enumerate() {
            let root = header.root_node_index();
            assert!(root < nodes.len(), "header {} root {} out of range", i, root);
            assert_eq!(
                header.subtree_size(),
                nodes[root].subtree_size(),
                "header {} size does not match node {}",
                i,
                root
            );
            assert_eq!(
                header.aabb, nodes[root].aabb,
                "header {} bounds do not match node {}",
                i, root
            );
        }
    }

    fn assert_consistent_nodes<N: BvhNode>(&self, nodes: &[N]) {
        let leaves = nodes.iter().filter(|node| node.is_leaf()).count();
        if nodes.is_empty() {
            return;
        }
        assert_eq!(nodes.len(), 2 * leaves - 1, "node count of {} leaves", leaves);
        assert_eq!(nodes[0].subtree_size(), nodes.len(), "root does not span the tree");

        let mut triangles = HashSet::new();
        for (index, node) in nodes.iter().enumerate() {
            if node.is_leaf() {
                assert!(
                    triangles.insert(node.triangle_id()),
                    "triangle {:?} referenced twice",
                    node.triangle_id()
                );
                continue;
            }

            let end = index + node.escape_index();
            assert!(end <= nodes.len(), "node {} escapes past the end", index);
            let left = index + 1;
            let right = left + nodes[left].subtree_size();
            assert!(right < end, "node {} has no right child", index);
            assert_eq!(
                right + nodes[right].subtree_size(),
                end,
                "children of node {} do not fill its subtree",
                index
            );

            let mut union = N::new_inner();
            union.join_bounds(&nodes[left]);
            union.join_bounds(&nodes[right]);
            assert!(
                node.same_bounds(&union),
                "bounds of node {} are not the union of its children",
                index
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::aabb::Aabb;
    use crate::bvh::{
        BuildOptions, NodeArray, OptimizedBvh, MAX_SUBTREE_SIZE_IN_BYTES, MAX_TRIANGLES_PER_PART,
    };
    use crate::error::Error;
    use crate::mesh::{IndexedMesh, MeshPart, TriangleId, TriangleSource};
    use crate::testbase::{brute_force_overlaps, init_logger, random_mesh, sorted};
    use crate::Point3;
    use std::collections::HashSet;

    #[test]
    /// Two triangles far apart: a query around one reports exactly that one.
    fn test_two_triangles_single_hit() {
        init_logger();
        let mesh = IndexedMesh::from_triangles(&[
            [
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            [
                Point3::new(10.0, 10.0, 10.0),
                Point3::new(11.0, 10.0, 10.0),
                Point3::new(10.0, 11.0, 10.0),
            ],
        ]);
        let bvh = OptimizedBvh::build(&mesh, true).unwrap();
        assert_eq!(bvh.node_count(), 3);
        bvh.assert_consistent();

        let query = Aabb::with_bounds(Point3::new(-0.5, -0.5, -0.5), Point3::new(0.5, 0.5, 0.5));
        let mut hits = Vec::new();
        let stats = bvh.traverse_aabb(&query, |id| hits.push(id));
        assert_eq!(hits, vec![TriangleId::new(0, 0)]);
        assert_eq!(stats.leaves_reported, 1);
    }

    #[test]
    /// A query covering everything reports every triangle exactly once.
    fn test_full_query_reports_everything() {
        let mesh = random_mesh(1000, 1);
        for use_quantization in [true, false] {
            let bvh = OptimizedBvh::build(&mesh, use_quantization).unwrap();
            assert_eq!(bvh.node_count(), 1999);
            bvh.assert_consistent();

            let mut hits = Vec::new();
            bvh.traverse_aabb(&bvh.quantizer().domain(), |id| hits.push(id));
            let unique: HashSet<_> = hits.iter().copied().collect();
            assert_eq!(hits.len(), 1000);
            assert_eq!(unique.len(), 1000);
        }
    }

    #[test]
    /// Building over an empty source yields an empty tree which answers nothing.
    fn test_empty_source() {
        let mesh = IndexedMesh::from_parts(vec![]);
        let bvh = OptimizedBvh::build(&mesh, true).unwrap();
        assert_eq!(bvh.node_count(), 0);
        assert!(bvh.subtree_headers().is_empty());
        bvh.assert_consistent();
        let everything = Aabb::with_bounds(Point3::new(-1e6, -1e6, -1e6), Point3::new(1e6, 1e6, 1e6));
        let stats = bvh.traverse_aabb_recursive(&everything, |_| panic!("unexpected hit"));
        assert_eq!(stats.nodes_tested, 0);
        assert!(bvh.root_aabb().is_empty());
    }

    #[test]
    /// A single triangle becomes a lone leaf and its own subtree header.
    fn test_single_triangle() {
        let mesh = IndexedMesh::from_triangles(&[[
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ]]);
        let bvh = OptimizedBvh::build(&mesh, true).unwrap();
        assert_eq!(bvh.node_count(), 1);
        assert_eq!(bvh.subtree_headers().len(), 1);
        assert_eq!(bvh.subtree_headers()[0].subtree_size(), 1);
        bvh.assert_consistent();
    }

    #[test]
    /// A zero-thickness triangle is found by a zero-thickness query in its plane.
    fn test_flat_triangle_found() {
        let mesh = IndexedMesh::from_triangles(&[
            [
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            [
                Point3::new(0.0, 0.0, 5.0),
                Point3::new(1.0, 0.0, 5.0),
                Point3::new(0.0, 1.0, 5.0),
            ],
        ]);
        let bvh = OptimizedBvh::build(&mesh, true).unwrap();
        let query = Aabb::with_bounds(Point3::new(0.2, 0.2, 0.0), Point3::new(0.3, 0.3, 0.0));
        let mut hits = Vec::new();
        bvh.traverse_aabb(&query, |id| hits.push(id));
        assert_eq!(hits, vec![TriangleId::new(0, 0)]);
    }

    #[test]
    /// Triangles in several parts keep their part in the reported id.
    fn test_multi_part_ids() {
        let parts = (0..4)
            .map(|part| {
                let x = part as crate::Real * 3.0;
                MeshPart::from_triangles(&[[
                    Point3::new(x, 0.0, 0.0),
                    Point3::new(x + 1.0, 0.0, 0.0),
                    Point3::new(x, 1.0, 1.0),
                ]])
            })
            .collect();
        let mesh = IndexedMesh::from_parts(parts);
        let bvh = OptimizedBvh::build(&mesh, true).unwrap();
        let query = Aabb::with_bounds(Point3::new(6.2, 0.2, 0.2), Point3::new(6.4, 0.4, 0.4));
        let mut hits = Vec::new();
        bvh.traverse_aabb(&query, |id| hits.push(id));
        assert_eq!(hits, vec![TriangleId::new(2, 0)]);
    }

    #[test]
    /// Sources with more parts than a leaf can address are rejected.
    fn test_too_many_parts() {
        let part = MeshPart::from_triangles(&[[
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ]]);
        let mesh = IndexedMesh::from_parts(vec![part; 1025]);
        assert_eq!(
            OptimizedBvh::build(&mesh, true).unwrap_err(),
            Error::TooManyParts {
                parts: 1025,
                max: 1024
            }
        );
        // Full precision leaves have no such limit.
        let bvh = OptimizedBvh::build(&mesh, false).unwrap();
        assert_eq!(bvh.node_count(), 2 * 1025 - 1);
    }

    /// One part with one triangle more than a quantized leaf can address.
    struct OversizedPart;

    impl TriangleSource for OversizedPart {
        fn num_sub_parts(&self) -> usize {
            1
        }

        fn num_triangles_in_part(&self, _sub_part: usize) -> usize {
            MAX_TRIANGLES_PER_PART + 1
        }

        fn raw_triangle(&self, _id: TriangleId) -> [Point3; 3] {
            [
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ]
        }
    }

    #[test]
    /// Parts with more triangles than a leaf can address are rejected before building.
    fn test_triangle_index_overflow() {
        let options = BuildOptions {
            domain: Some(Aabb::with_bounds(
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 1.0, 1.0),
            )),
            ..BuildOptions::default()
        };
        assert_eq!(
            OptimizedBvh::build_with_options(&OversizedPart, &options).unwrap_err(),
            Error::TriangleIndexOverflow {
                index: MAX_TRIANGLES_PER_PART,
                max: MAX_TRIANGLES_PER_PART - 1
            }
        );
    }

    #[test]
    /// Every leaf lies in exactly one subtree header, and no header exceeds the budget.
    fn test_subtree_headers_cover_leaves() {
        let mesh = random_mesh(2000, 5);
        let bvh = OptimizedBvh::build(&mesh, true).unwrap();
        let NodeArray::Quantized(nodes) = bvh.nodes() else {
            panic!("expected a quantized tree");
        };
        let mut covered = vec![0; nodes.len()];
        for header in bvh.subtree_headers() {
            assert!(header.subtree_size() * 16 <= MAX_SUBTREE_SIZE_IN_BYTES);
            for index in header.node_range() {
                covered[index] += 1;
            }
        }
        for (index, node) in nodes.iter().enumerate() {
            if crate::bvh::BvhNode::is_leaf(node) {
                assert_eq!(covered[index], 1, "leaf {} not covered once", index);
            }
        }
    }

    #[test]
    /// A user supplied domain is used instead of the bounds of the source.
    fn test_build_with_domain() {
        let mesh = random_mesh(50, 6);
        let domain = Aabb::with_bounds(Point3::new(-100.0, -100.0, -100.0), Point3::new(100.0, 100.0, 100.0));
        let bvh = OptimizedBvh::build_with_domain(&mesh, true, &domain).unwrap();
        assert_eq!(bvh.quantizer().domain().min, Point3::new(-101.0, -101.0, -101.0));
        bvh.assert_consistent();

        let options = BuildOptions {
            quantization_margin: 0.0,
            ..BuildOptions::default()
        };
        let tight = OptimizedBvh::build_with_options(&mesh, &options).unwrap();
        assert_eq!(tight.quantizer().domain(), mesh.bounding_box());
    }

    #[cfg(feature = "rayon")]
    #[test]
    /// Parallel queries return the same hits as sequential ones.
    fn test_query_aabbs_par() {
        let mesh = random_mesh(500, 7);
        let bvh = OptimizedBvh::build(&mesh, false).unwrap();
        let queries: Vec<Aabb> = (0..16)
            .map(|i| {
                let c = i as crate::Real * 0.5 - 4.0;
                Aabb::with_bounds(Point3::new(c, c, c), Point3::new(c + 1.0, c + 1.0, c + 1.0))
            })
            .collect();
        let results = bvh.query_aabbs_par(&queries);
        for (query, hits) in queries.iter().zip(results) {
            assert_eq!(sorted(hits), brute_force_overlaps(&mesh, query));
        }
    }
}

#[cfg(all(feature = "bench", test))]
mod bench {
    use crate::aabb::Aabb;
    use crate::bvh::{OptimizedBvh, TraversalMode};
    use crate::testbase::random_mesh;
    use crate::Point3;

    #[bench]
    /// Benchmark the construction of a quantized tree with 12,000 triangles.
    fn bench_build_12k_triangles_quantized(b: &mut ::test::Bencher) {
        let mesh = random_mesh(12_000, 0);
        b.iter(|| OptimizedBvh::build(&mesh, true));
    }

    #[bench]
    /// Benchmark the construction of a full precision tree with 12,000 triangles.
    fn bench_build_12k_triangles_float(b: &mut ::test::Bencher) {
        let mesh = random_mesh(12_000, 0);
        b.iter(|| OptimizedBvh::build(&mesh, false));
    }

    fn bench_query(mode: TraversalMode, b: &mut ::test::Bencher) {
        let mesh = random_mesh(12_000, 0);
        let mut bvh = OptimizedBvh::build(&mesh, true).unwrap();
        bvh.set_traversal_mode(mode);
        let query = Aabb::with_bounds(Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0));
        b.iter(|| {
            let mut count = 0;
            bvh.traverse_aabb(&query, |_| count += 1);
            count
        });
    }

    #[bench]
    fn bench_query_stackless(b: &mut ::test::Bencher) {
        bench_query(TraversalMode::Stackless, b);
    }

    #[bench]
    fn bench_query_cache_friendly(b: &mut ::test::Bencher) {
        bench_query(TraversalMode::StacklessCacheFriendly, b);
    }

    #[bench]
    fn bench_query_recursive(b: &mut ::test::Bencher) {
        bench_query(TraversalMode::Recursive, b);
    }
}
