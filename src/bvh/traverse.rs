//! Query predicates and the three walking strategies over the flat node array.

use crate::aabb::{Aabb, IntersectsAabb};
use crate::bvh::{BvhNode, FloatBvhNode, QuantizedBvhNode, StacklessIter, SubtreeHeader};
use crate::error::{Error, Result};
use crate::mesh::TriangleId;
use crate::quantization::{QuantizedAabb, Quantizer};
use crate::ray::Ray;
use crate::{Point3, Vector3};
use std::fmt;

/// The strategy used to walk the node array.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u32)]
pub enum TraversalMode {
    /// Linear walk over all nodes, skipping rejected subtrees by their escape index.
    #[default]
    Stackless = 0,
    /// Tests the subtree headers first and walks only the subtrees they accept.
    StacklessCacheFriendly = 1,
    /// Depth-first recursion from the root.
    Recursive = 2,
}

impl TryFrom<u32> for TraversalMode {
    type Error = Error;

    fn try_from(value: u32) -> Result<TraversalMode> {
        match value {
            0 => Ok(TraversalMode::Stackless),
            1 => Ok(TraversalMode::StacklessCacheFriendly),
            2 => Ok(TraversalMode::Recursive),
            other => Err(Error::invalid_header(format!(
                "unknown traversal mode {}",
                other
            ))),
        }
    }
}

impl fmt::Display for TraversalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TraversalMode::Stackless => "stackless",
            TraversalMode::StacklessCacheFriendly => "stackless cache friendly",
            TraversalMode::Recursive => "recursive",
        };
        write!(f, "{}", name)
    }
}

/// Counters collected while answering one query.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TraversalStats {
    /// Nodes whose bounds were tested against the query.
    pub nodes_tested: usize,
    /// Subtree headers tested against the query.
    pub headers_tested: usize,
    /// Leaves passed to the visitor.
    pub leaves_reported: usize,
}

impl TraversalStats {
    fn merge(&mut self, other: &TraversalStats) {
        self.nodes_tested += other.nodes_tested;
        self.headers_tested += other.headers_tested;
        self.leaves_reported += other.leaves_reported;
    }
}

/// A test deciding which nodes of a tree a query can reach.
///
/// Implementations must be conservative: a node whose subtree contains a leaf the query
/// touches has to pass.
pub trait NodeQuery<N> {
    /// Returns true if the query may touch anything below `node`.
    fn overlaps(&self, node: &N) -> bool;

    /// Returns true if the query may touch anything in the subtree summarized by `header`.
    fn overlaps_header(&self, header: &SubtreeHeader) -> bool;
}

impl<N, Q: NodeQuery<N>> NodeQuery<N> for &Q {
    fn overlaps(&self, node: &N) -> bool {
        Q::overlaps(self, node)
    }

    fn overlaps_header(&self, header: &SubtreeHeader) -> bool {
        Q::overlaps_header(self, header)
    }
}

/// A box query against quantized nodes.
#[derive(Debug, Copy, Clone)]
pub struct QuantizedBoxQuery {
    /// The quantized query box.
    pub bounds: QuantizedAabb,
}

impl QuantizedBoxQuery {
    /// Quantizes `aabb` with the quantizer of the tree queried.
    pub fn new(aabb: &Aabb, quantizer: &Quantizer) -> QuantizedBoxQuery {
        QuantizedBoxQuery {
            bounds: quantizer.quantize_aabb(aabb),
        }
    }
}

impl NodeQuery<QuantizedBvhNode> for QuantizedBoxQuery {
    #[inline]
    fn overlaps(&self, node: &QuantizedBvhNode) -> bool {
        node.aabb.overlaps(&self.bounds)
    }

    #[inline]
    fn overlaps_header(&self, header: &SubtreeHeader) -> bool {
        header.aabb.overlaps(&self.bounds)
    }
}

/// A box query against full precision nodes.
#[derive(Debug, Copy, Clone)]
pub struct BoxQuery {
    /// The query box.
    pub bounds: Aabb,
}

impl NodeQuery<FloatBvhNode> for BoxQuery {
    #[inline]
    fn overlaps(&self, node: &FloatBvhNode) -> bool {
        self.bounds.intersects_aabb(&node.float_aabb())
    }

    fn overlaps_header(&self, _header: &SubtreeHeader) -> bool {
        true
    }
}

/// A box swept along a segment. A zero sized box makes this a plain segment query.
///
/// The box spans `extent_min..=extent_max` relative to its moving center. Nodes are first
/// rejected by the bounds of the whole sweep, then by a slab test of the segment against
/// node bounds grown by the box.
#[derive(Debug, Copy, Clone)]
pub struct SweptBoxQuery<'q> {
    ray: Ray,
    extent_min: Vector3,
    extent_max: Vector3,
    sweep_bounds: Aabb,
    quantized_sweep_bounds: QuantizedAabb,
    quantizer: &'q Quantizer,
    unit: Vector3,
}

impl<'q> SweptBoxQuery<'q> {
    /// Creates the query sweeping the box from `source` to `target`.
    pub fn new(
        source: &Point3,
        target: &Point3,
        extent_min: &Vector3,
        extent_max: &Vector3,
        quantizer: &'q Quantizer,
    ) -> SweptBoxQuery<'q> {
        let ray = Ray::segment(*source, *target);
        let segment = ray.segment_aabb();
        let sweep_bounds =
            Aabb::with_bounds(segment.min + extent_min, segment.max + extent_max);
        SweptBoxQuery {
            ray,
            extent_min: *extent_min,
            extent_max: *extent_max,
            sweep_bounds,
            quantized_sweep_bounds: quantizer.quantize_aabb(&sweep_bounds),
            quantizer,
            unit: quantizer.unit(),
        }
    }

    /// The bounds of the whole sweep.
    pub fn sweep_bounds(&self) -> &Aabb {
        &self.sweep_bounds
    }

    /// Slab test against `aabb` grown by the swept box and `slack` on every side.
    #[inline]
    fn hits_grown(&self, aabb: &Aabb, slack: &Vector3) -> bool {
        let grown = Aabb::with_bounds(
            aabb.min - self.extent_max - slack,
            aabb.max - self.extent_min + slack,
        );
        self.ray.intersects_aabb(&grown)
    }
}

impl NodeQuery<QuantizedBvhNode> for SweptBoxQuery<'_> {
    #[inline]
    fn overlaps(&self, node: &QuantizedBvhNode) -> bool {
        if !node.aabb.overlaps(&self.quantized_sweep_bounds) {
            return false;
        }
        // Rounding moves unquantized bounds by up to half a unit.
        let aabb = self.quantizer.unquantize_aabb(&node.aabb);
        self.hits_grown(&aabb, &self.unit)
    }

    #[inline]
    fn overlaps_header(&self, header: &SubtreeHeader) -> bool {
        header.aabb.overlaps(&self.quantized_sweep_bounds)
    }
}

impl NodeQuery<FloatBvhNode> for SweptBoxQuery<'_> {
    #[inline]
    fn overlaps(&self, node: &FloatBvhNode) -> bool {
        let aabb = node.float_aabb();
        self.sweep_bounds.intersects_aabb(&aabb) && self.hits_grown(&aabb, &Vector3::zeros())
    }

    fn overlaps_header(&self, _header: &SubtreeHeader) -> bool {
        true
    }
}

/// Answers `query` with the strategy `mode`.
pub(crate) fn traverse<N, Q, V>(
    mode: TraversalMode,
    nodes: &[N],
    headers: &[SubtreeHeader],
    query: &Q,
    visitor: &mut V,
) -> TraversalStats
where
    N: BvhNode,
    Q: NodeQuery<N>,
    V: FnMut(TriangleId),
{
    match mode {
        TraversalMode::Stackless => traverse_range(nodes, 0..nodes.len(), query, visitor),
        TraversalMode::StacklessCacheFriendly => {
            traverse_cache_friendly(nodes, headers, query, visitor)
        }
        TraversalMode::Recursive => {
            let mut stats = TraversalStats::default();
            if !nodes.is_empty() {
                traverse_recursive(nodes, 0, query, visitor, &mut stats);
            }
            stats
        }
    }
}

/// Stackless walk over `range`, which must cover complete subtrees.
fn traverse_range<N, Q, V>(
    nodes: &[N],
    range: std::ops::Range<usize>,
    query: &Q,
    visitor: &mut V,
) -> TraversalStats
where
    N: BvhNode,
    Q: NodeQuery<N>,
    V: FnMut(TriangleId),
{
    let mut iter = StacklessIter::with_range(nodes, range, query);
    let mut leaves_reported = 0;
    for id in iter.by_ref() {
        visitor(id);
        leaves_reported += 1;
    }
    TraversalStats {
        nodes_tested: iter.nodes_tested(),
        headers_tested: 0,
        leaves_reported,
    }
}

/// Tests every subtree header and walks the accepted subtrees in header order.
///
/// Trees without headers are walked as a whole.
fn traverse_cache_friendly<N, Q, V>(
    nodes: &[N],
    headers: &[SubtreeHeader],
    query: &Q,
    visitor: &mut V,
) -> TraversalStats
where
    N: BvhNode,
    Q: NodeQuery<N>,
    V: FnMut(TriangleId),
{
    if headers.is_empty() {
        return traverse_range(nodes, 0..nodes.len(), query, visitor);
    }

    let mut stats = TraversalStats::default();
    for header in headers {
        stats.headers_tested += 1;
        if query.overlaps_header(header) {
            let subtree = traverse_range(nodes, header.node_range(), query, visitor);
            stats.merge(&subtree);
        }
    }
    stats
}

fn traverse_recursive<N, Q, V>(
    nodes: &[N],
    index: usize,
    query: &Q,
    visitor: &mut V,
    stats: &mut TraversalStats,
) where
    N: BvhNode,
    Q: NodeQuery<N>,
    V: FnMut(TriangleId),
{
    let node = &nodes[index];
    stats.nodes_tested += 1;
    if !query.overlaps(node) {
        return;
    }

    if node.is_leaf() {
        visitor(node.triangle_id());
        stats.leaves_reported += 1;
        return;
    }

    let left = index + 1;
    let right = left + nodes[left].subtree_size();
    traverse_recursive(nodes, left, query, visitor, stats);
    traverse_recursive(nodes, right, query, visitor, stats);
}
