//! The fixed-size node records of the node store and the subtree headers.
//!
//! All records are plain old data so a node array can be cast directly onto a serialized
//! byte buffer.

use crate::aabb::Aabb;
use crate::mesh::TriangleId;
use crate::quantization::{QuantizedAabb, Quantizer};
use crate::{Point3, Real};
use bytemuck::{Pod, Zeroable};
use std::fmt::Debug;

/// Bits of a quantized leaf reserved for the sub-part index.
pub const MAX_NUM_PARTS_IN_BITS: u32 = 10;

/// Bits of a quantized leaf left for the triangle index.
pub const TRIANGLE_INDEX_BITS: u32 = 31 - MAX_NUM_PARTS_IN_BITS;

/// Number of sub-parts a quantized leaf can address.
pub const MAX_NUM_PARTS: usize = 1 << MAX_NUM_PARTS_IN_BITS;

/// Number of triangles per part a quantized leaf can address.
pub const MAX_TRIANGLES_PER_PART: usize = 1 << TRIANGLE_INDEX_BITS;

/// Reverses the byte order of every multi-byte field in place.
pub trait ByteSwap {
    /// Swaps the byte order of all fields.
    fn swap_bytes(&mut self);
}

#[inline]
fn swap_real(value: Real) -> Real {
    Real::from_bits(value.to_bits().swap_bytes())
}

/// Operations shared by the quantized and the full precision node records.
///
/// A node is either a leaf, which carries the [`TriangleId`] of one triangle, or an inner
/// node, which carries the escape index of its subtree. Inner nodes are always directly
/// followed by their left subtree and then their right subtree.
pub trait BvhNode: Pod + Debug + ByteSwap + Send + Sync {
    /// Creates a leaf for the triangle `id` with bounds `triangle_aabb`.
    fn new_leaf(triangle_aabb: &Aabb, id: TriangleId, quantizer: &Quantizer) -> Self;

    /// Creates an inner node with empty bounds. The escape index must be set afterwards.
    fn new_inner() -> Self;

    /// Returns true for leaves.
    fn is_leaf(&self) -> bool;

    /// The number of slots to skip to leave the subtree of this inner node.
    fn escape_index(&self) -> usize;

    /// Turns this node into an inner node with the given escape index.
    fn set_escape_index(&mut self, escape_index: usize);

    /// The triangle referenced by this leaf.
    fn triangle_id(&self) -> TriangleId;

    /// Replaces the bounds of this leaf by those of its (moved) triangle.
    fn set_leaf_bounds(&mut self, triangle_aabb: &Aabb, quantizer: &Quantizer);

    /// Resets the bounds to the empty box.
    fn clear_bounds(&mut self);

    /// Grows the bounds of this node to contain those of `other`.
    fn join_bounds(&mut self, other: &Self);

    /// Returns true if both nodes carry identical bounds.
    fn same_bounds(&self, other: &Self) -> bool;

    /// The bounds of this node in domain units.
    fn aabb(&self, quantizer: &Quantizer) -> Aabb;

    /// The quantized bounds, for quantized nodes only.
    fn quantized_aabb(&self) -> Option<QuantizedAabb>;

    /// The number of nodes in the subtree rooted at this node.
    fn subtree_size(&self) -> usize {
        if self.is_leaf() {
            1
        } else {
            self.escape_index()
        }
    }

    /// The center of the bounds of this node in domain units.
    fn center(&self, quantizer: &Quantizer) -> Point3 {
        self.aabb(quantizer).center()
    }
}

/// A node with 16 bit quantized bounds. 16 bytes.
///
/// The sign of `escape_index_or_triangle_index` decides the kind: non-negative values are
/// leaves holding `sub_part << 21 | triangle_index`, negative values are inner nodes holding
/// the negated escape index.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Pod, Zeroable)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QuantizedBvhNode {
    /// The quantized bounds of the node's subtree.
    pub aabb: QuantizedAabb,
    escape_index_or_triangle_index: i32,
}

impl QuantizedBvhNode {
    /// The raw packed field.
    pub fn escape_index_or_triangle_index(&self) -> i32 {
        self.escape_index_or_triangle_index
    }
}

impl ByteSwap for QuantizedBvhNode {
    fn swap_bytes(&mut self) {
        self.aabb.swap_bytes();
        self.escape_index_or_triangle_index = self.escape_index_or_triangle_index.swap_bytes();
    }
}

impl BvhNode for QuantizedBvhNode {
    fn new_leaf(triangle_aabb: &Aabb, id: TriangleId, quantizer: &Quantizer) -> Self {
        debug_assert!((id.sub_part as usize) < MAX_NUM_PARTS);
        debug_assert!((id.triangle_index as usize) < MAX_TRIANGLES_PER_PART);
        QuantizedBvhNode {
            aabb: quantizer.quantize_leaf_aabb(triangle_aabb),
            escape_index_or_triangle_index: ((id.sub_part << TRIANGLE_INDEX_BITS)
                | id.triangle_index) as i32,
        }
    }

    fn new_inner() -> Self {
        QuantizedBvhNode {
            aabb: QuantizedAabb::EMPTY,
            escape_index_or_triangle_index: 0,
        }
    }

    #[inline]
    fn is_leaf(&self) -> bool {
        self.escape_index_or_triangle_index >= 0
    }

    #[inline]
    fn escape_index(&self) -> usize {
        debug_assert!(!self.is_leaf());
        self.escape_index_or_triangle_index.unsigned_abs() as usize
    }

    fn set_escape_index(&mut self, escape_index: usize) {
        debug_assert!(escape_index > 0 && escape_index <= i32::MAX as usize);
        self.escape_index_or_triangle_index = -(escape_index as i32);
    }

    #[inline]
    fn triangle_id(&self) -> TriangleId {
        debug_assert!(self.is_leaf());
        let packed = self.escape_index_or_triangle_index as u32;
        TriangleId::new(
            packed >> TRIANGLE_INDEX_BITS,
            packed & ((1 << TRIANGLE_INDEX_BITS) - 1),
        )
    }

    fn set_leaf_bounds(&mut self, triangle_aabb: &Aabb, quantizer: &Quantizer) {
        self.aabb = quantizer.quantize_leaf_aabb(triangle_aabb);
    }

    fn clear_bounds(&mut self) {
        self.aabb = QuantizedAabb::EMPTY;
    }

    #[inline]
    fn join_bounds(&mut self, other: &Self) {
        self.aabb.join_mut(&other.aabb);
    }

    fn same_bounds(&self, other: &Self) -> bool {
        self.aabb == other.aabb
    }

    fn aabb(&self, quantizer: &Quantizer) -> Aabb {
        quantizer.unquantize_aabb(&self.aabb)
    }

    fn quantized_aabb(&self) -> Option<QuantizedAabb> {
        Some(self.aabb)
    }
}

/// A node with full precision bounds, used when quantization is disabled.
///
/// Leaves store an escape index of `-1`. The trailing padding keeps the record size a
/// multiple of 16 bytes for `f32`.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FloatBvhNode {
    /// Minimum bounds.
    pub min: [Real; 3],
    /// Maximum bounds.
    pub max: [Real; 3],
    escape_index: i32,
    sub_part: i32,
    triangle_index: i32,
    padding: [i32; 3],
}

/// Escape index marking a [`FloatBvhNode`] leaf.
const LEAF_ESCAPE_INDEX: i32 = -1;

impl ByteSwap for FloatBvhNode {
    fn swap_bytes(&mut self) {
        for i in 0..3 {
            self.min[i] = swap_real(self.min[i]);
            self.max[i] = swap_real(self.max[i]);
        }
        self.escape_index = self.escape_index.swap_bytes();
        self.sub_part = self.sub_part.swap_bytes();
        self.triangle_index = self.triangle_index.swap_bytes();
    }
}

impl BvhNode for FloatBvhNode {
    fn new_leaf(triangle_aabb: &Aabb, id: TriangleId, _quantizer: &Quantizer) -> Self {
        FloatBvhNode {
            min: triangle_aabb.min.into(),
            max: triangle_aabb.max.into(),
            escape_index: LEAF_ESCAPE_INDEX,
            sub_part: id.sub_part as i32,
            triangle_index: id.triangle_index as i32,
            padding: [0; 3],
        }
    }

    fn new_inner() -> Self {
        let empty = Aabb::empty();
        FloatBvhNode {
            min: empty.min.into(),
            max: empty.max.into(),
            escape_index: 0,
            sub_part: 0,
            triangle_index: 0,
            padding: [0; 3],
        }
    }

    #[inline]
    fn is_leaf(&self) -> bool {
        self.escape_index == LEAF_ESCAPE_INDEX
    }

    #[inline]
    fn escape_index(&self) -> usize {
        debug_assert!(!self.is_leaf());
        self.escape_index as usize
    }

    fn set_escape_index(&mut self, escape_index: usize) {
        debug_assert!(escape_index > 0 && escape_index <= i32::MAX as usize);
        self.escape_index = escape_index as i32;
    }

    #[inline]
    fn triangle_id(&self) -> TriangleId {
        TriangleId::new(self.sub_part as u32, self.triangle_index as u32)
    }

    fn set_leaf_bounds(&mut self, triangle_aabb: &Aabb, _quantizer: &Quantizer) {
        self.min = triangle_aabb.min.into();
        self.max = triangle_aabb.max.into();
    }

    fn clear_bounds(&mut self) {
        let empty = Aabb::empty();
        self.min = empty.min.into();
        self.max = empty.max.into();
    }

    #[inline]
    fn join_bounds(&mut self, other: &Self) {
        let joint = self.float_aabb().join(&other.float_aabb());
        self.min = joint.min.into();
        self.max = joint.max.into();
    }

    fn same_bounds(&self, other: &Self) -> bool {
        self.min == other.min && self.max == other.max
    }

    fn aabb(&self, _quantizer: &Quantizer) -> Aabb {
        self.float_aabb()
    }

    fn quantized_aabb(&self) -> Option<QuantizedAabb> {
        None
    }
}

impl FloatBvhNode {
    /// The bounds of this node.
    #[inline]
    pub fn float_aabb(&self) -> Aabb {
        Aabb::with_bounds(Point3::from(self.min), Point3::from(self.max))
    }
}

/// A cached summary of a subtree small enough to fit the subtree byte budget. 32 bytes.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Pod, Zeroable)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubtreeHeader {
    /// The quantized bounds of the subtree root.
    pub aabb: QuantizedAabb,
    root_node_index: i32,
    subtree_size: i32,
    padding: [i32; 3],
}

impl SubtreeHeader {
    /// Creates a header for the subtree of `subtree_size` nodes rooted at `root_node_index`.
    pub fn new(aabb: QuantizedAabb, root_node_index: usize, subtree_size: usize) -> SubtreeHeader {
        SubtreeHeader {
            aabb,
            root_node_index: root_node_index as i32,
            subtree_size: subtree_size as i32,
            padding: [0; 3],
        }
    }

    /// Index of the subtree root in the node array.
    pub fn root_node_index(&self) -> usize {
        self.root_node_index as usize
    }

    /// Number of nodes in the subtree.
    pub fn subtree_size(&self) -> usize {
        self.subtree_size as usize
    }

    /// The node index range covered by this subtree.
    pub fn node_range(&self) -> std::ops::Range<usize> {
        self.root_node_index()..self.root_node_index() + self.subtree_size()
    }

    /// Copies the bounds of the (refreshed) subtree root.
    pub fn set_aabb_from_root(&mut self, root: &QuantizedBvhNode) {
        self.aabb = root.aabb;
    }
}

impl ByteSwap for SubtreeHeader {
    fn swap_bytes(&mut self) {
        self.aabb.swap_bytes();
        self.root_node_index = self.root_node_index.swap_bytes();
        self.subtree_size = self.subtree_size.swap_bytes();
    }
}

#[cfg(test)]
mod tests {
    use crate::aabb::Aabb;
    use crate::bvh::{BvhNode, ByteSwap, FloatBvhNode, QuantizedBvhNode, SubtreeHeader};
    use crate::mesh::TriangleId;
    use crate::quantization::Quantizer;
    use crate::{Point3, Real};
    use std::mem::size_of;

    fn quantizer() -> Quantizer {
        Quantizer::new(
            &Aabb::with_bounds(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0)),
            0.0,
        )
    }

    #[test]
    /// The records have the documented sizes.
    fn test_record_sizes() {
        assert_eq!(size_of::<QuantizedBvhNode>(), 16);
        assert_eq!(size_of::<SubtreeHeader>(), 32);
        assert_eq!(size_of::<FloatBvhNode>(), 6 * size_of::<Real>() + 24);
    }

    #[test]
    /// A leaf packs the sub-part and triangle index into one signed field.
    fn test_quantized_leaf_encoding() {
        let aabb = Aabb::with_bounds(Point3::new(0.1, 0.1, 0.1), Point3::new(0.2, 0.2, 0.2));
        let id = TriangleId::new(1023, (1 << 21) - 1);
        let leaf = QuantizedBvhNode::new_leaf(&aabb, id, &quantizer());
        assert!(leaf.is_leaf());
        assert_eq!(leaf.triangle_id(), id);

        let mut inner = QuantizedBvhNode::new_inner();
        inner.set_escape_index(7);
        assert!(!inner.is_leaf());
        assert_eq!(inner.escape_index(), 7);
        assert_eq!(inner.escape_index_or_triangle_index(), -7);
    }

    #[test]
    fn test_float_leaf_encoding() {
        let aabb = Aabb::with_bounds(Point3::new(0.1, 0.1, 0.1), Point3::new(0.2, 0.2, 0.2));
        let leaf = FloatBvhNode::new_leaf(&aabb, TriangleId::new(3, 9), &quantizer());
        assert!(leaf.is_leaf());
        assert_eq!(leaf.triangle_id(), TriangleId::new(3, 9));
        assert_eq!(leaf.float_aabb(), aabb);
        assert_eq!(leaf.subtree_size(), 1);
    }

    #[test]
    /// Swapping twice restores the original record.
    fn test_swap_is_involution() {
        let aabb = Aabb::with_bounds(Point3::new(0.1, 0.3, 0.1), Point3::new(0.2, 0.7, 0.9));
        let mut leaf = FloatBvhNode::new_leaf(&aabb, TriangleId::new(2, 5), &quantizer());
        let original = leaf;
        leaf.swap_bytes();
        assert_ne!(leaf.sub_part, original.sub_part);
        leaf.swap_bytes();
        assert_eq!(leaf, original);

        let mut node = QuantizedBvhNode::new_leaf(&aabb, TriangleId::new(2, 5), &quantizer());
        let original = node;
        node.swap_bytes();
        node.swap_bytes();
        assert_eq!(node, original);
    }
}
