//! Mapping of real-valued bounds into the 16 bit per axis domain of a quantized BVH.

use crate::aabb::Aabb;
use crate::utils::{fast_max, fast_min};
use crate::{Point3, Real, Vector3, EPSILON};
use bytemuck::{Pod, Zeroable};
use num_traits::{clamp, ToPrimitive};

/// Largest quantized coordinate.
pub const QUANTIZED_MAX: u16 = u16::MAX;

/// Leaf boxes thinner than this on an axis are widened before quantization.
pub const MIN_AABB_DIMENSION: Real = 0.002;

/// Half of the width added to degenerate leaf axes.
pub const MIN_AABB_HALF_DIMENSION: Real = 0.001;

/// An axis aligned box in quantized coordinates.
///
/// Comparisons are inclusive, so two boxes sharing a face overlap.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Pod, Zeroable)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QuantizedAabb {
    /// Minimum quantized coordinates.
    pub min: [u16; 3],
    /// Maximum quantized coordinates.
    pub max: [u16; 3],
}

impl QuantizedAabb {
    /// The identity of [`QuantizedAabb::join`]: inverted bounds which contain nothing.
    pub const EMPTY: QuantizedAabb = QuantizedAabb {
        min: [QUANTIZED_MAX; 3],
        max: [0; 3],
    };

    /// Creates a new [`QuantizedAabb`] with the given bounds.
    pub fn with_bounds(min: [u16; 3], max: [u16; 3]) -> QuantizedAabb {
        QuantizedAabb { min, max }
    }

    /// Returns true if every axis interval of `self` intersects the one of `other`.
    ///
    /// # Examples
    /// ```
    /// use quantized_bvh::quantization::QuantizedAabb;
    ///
    /// let a = QuantizedAabb::with_bounds([0, 0, 0], [10, 10, 10]);
    /// let b = QuantizedAabb::with_bounds([10, 5, 5], [20, 20, 20]);
    /// let c = QuantizedAabb::with_bounds([11, 0, 0], [20, 20, 20]);
    ///
    /// assert!(a.overlaps(&b));
    /// assert!(!a.overlaps(&c));
    /// ```
    #[inline]
    pub fn overlaps(&self, other: &QuantizedAabb) -> bool {
        self.min[0] <= other.max[0]
            && other.min[0] <= self.max[0]
            && self.min[1] <= other.max[1]
            && other.min[1] <= self.max[1]
            && self.min[2] <= other.max[2]
            && other.min[2] <= self.max[2]
    }

    /// Returns the component-wise union of both boxes.
    #[inline]
    pub fn join(&self, other: &QuantizedAabb) -> QuantizedAabb {
        let mut joint = *self;
        joint.join_mut(other);
        joint
    }

    /// Mutable version of [`QuantizedAabb::join`].
    #[inline]
    pub fn join_mut(&mut self, other: &QuantizedAabb) {
        for i in 0..3 {
            self.min[i] = fast_min(self.min[i], other.min[i]);
            self.max[i] = fast_max(self.max[i], other.max[i]);
        }
    }

    /// Returns true if `self` contains no point.
    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.min[i] > self.max[i])
    }

    /// Reverses the byte order of every coordinate.
    pub fn swap_bytes(&mut self) {
        for i in 0..3 {
            self.min[i] = self.min[i].swap_bytes();
            self.max[i] = self.max[i].swap_bytes();
        }
    }
}

impl Default for QuantizedAabb {
    fn default() -> QuantizedAabb {
        QuantizedAabb::EMPTY
    }
}

/// The global domain of a quantized BVH and the per-axis scale into `0..=65535`.
///
/// All quantized coordinates of one tree are relative to the same [`Quantizer`]. The domain
/// must not shrink while quantized nodes built against it are in use.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Quantizer {
    min: Point3,
    max: Point3,
    scale: Vector3,
}

impl Quantizer {
    /// Creates a [`Quantizer`] whose domain is `domain` expanded by `margin` on every side.
    ///
    /// An empty `domain` (a mesh without triangles) is replaced by the point at the origin.
    ///
    /// # Examples
    /// ```
    /// use quantized_bvh::aabb::Aabb;
    /// use quantized_bvh::quantization::Quantizer;
    /// use quantized_bvh::Point3;
    ///
    /// let domain = Aabb::with_bounds(Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 10.0, 10.0));
    /// let quantizer = Quantizer::new(&domain, 0.0);
    ///
    /// assert_eq!(quantizer.quantize(&Point3::new(0.0, 5.0, 10.0)), [0, 32768, 65535]);
    /// assert_eq!(quantizer.quantize(&Point3::new(-3.0, 0.0, 12.0)), [0, 0, 65535]);
    /// ```
    pub fn new(domain: &Aabb, margin: Real) -> Quantizer {
        let mut quantizer = Quantizer {
            min: Point3::origin(),
            max: Point3::origin(),
            scale: Vector3::zeros(),
        };
        quantizer.set_domain(domain, margin);
        quantizer
    }

    /// Rebuilds a [`Quantizer`] from previously stored values.
    pub fn from_raw_parts(min: Point3, max: Point3, scale: Vector3) -> Quantizer {
        Quantizer { min, max, scale }
    }

    /// Replaces the domain by `domain` expanded by `margin` and recomputes the scale.
    pub fn set_domain(&mut self, domain: &Aabb, margin: Real) {
        debug_assert!(margin >= 0.0, "negative quantization margin {}", margin);
        let domain = if domain.is_empty() {
            Aabb::with_bounds(Point3::origin(), Point3::origin())
        } else {
            *domain
        };
        let margin = Vector3::repeat(margin);
        self.min = domain.min - margin;
        self.max = domain.max + margin;

        let size = self.max - self.min;
        self.scale = size.map(|extent| Real::from(QUANTIZED_MAX) / fast_max(extent, EPSILON));
    }

    /// Returns the (margin-expanded) quantization domain.
    pub fn domain(&self) -> Aabb {
        Aabb::with_bounds(self.min, self.max)
    }

    /// Returns the per-axis factor from domain units to quantized units.
    pub fn scale(&self) -> Vector3 {
        self.scale
    }

    /// Maps `point` into quantized coordinates.
    ///
    /// The point is clamped to the domain before and the result to `0..=65535` after the
    /// mapping, so points outside the domain land on its boundary.
    pub fn quantize(&self, point: &Point3) -> [u16; 3] {
        let mut out = [0u16; 3];
        for (i, q) in out.iter_mut().enumerate() {
            let clamped = clamp(point[i], self.min[i], self.max[i]);
            let scaled = ((clamped - self.min[i]) * self.scale[i]).round();
            *q = clamp(scaled, 0.0, Real::from(QUANTIZED_MAX))
                .to_u16()
                .unwrap_or(0);
        }
        out
    }

    /// Quantizes both corners of `aabb`.
    pub fn quantize_aabb(&self, aabb: &Aabb) -> QuantizedAabb {
        QuantizedAabb::with_bounds(self.quantize(&aabb.min), self.quantize(&aabb.max))
    }

    /// Quantizes the bounds of a single triangle.
    ///
    /// Axes thinner than [`MIN_AABB_DIMENSION`] are widened by [`MIN_AABB_HALF_DIMENSION`]
    /// on both sides first, and every quantized axis ends up at least one unit wide, so flat
    /// triangles are still found by zero-thickness queries.
    pub fn quantize_leaf_aabb(&self, aabb: &Aabb) -> QuantizedAabb {
        let mut quantized = self.quantize_aabb(&widen_degenerate_axes(aabb));
        for i in 0..3 {
            if quantized.min[i] >= quantized.max[i] {
                if quantized.max[i] < QUANTIZED_MAX {
                    quantized.max[i] = quantized.min[i] + 1;
                } else {
                    quantized.max[i] = QUANTIZED_MAX;
                    quantized.min[i] = QUANTIZED_MAX - 1;
                }
            }
        }
        quantized
    }

    /// Maps quantized coordinates back into the domain.
    pub fn unquantize(&self, quantized: &[u16; 3]) -> Point3 {
        Point3::new(
            self.min.x + Real::from(quantized[0]) / self.scale.x,
            self.min.y + Real::from(quantized[1]) / self.scale.y,
            self.min.z + Real::from(quantized[2]) / self.scale.z,
        )
    }

    /// Maps a [`QuantizedAabb`] back into the domain.
    pub fn unquantize_aabb(&self, quantized: &QuantizedAabb) -> Aabb {
        Aabb::with_bounds(
            self.unquantize(&quantized.min),
            self.unquantize(&quantized.max),
        )
    }

    /// The size of one quantized unit in domain units, per axis.
    pub fn unit(&self) -> Vector3 {
        self.scale.map(|scale| 1.0 / scale)
    }
}

/// Widens every axis of `aabb` thinner than [`MIN_AABB_DIMENSION`].
pub fn widen_degenerate_axes(aabb: &Aabb) -> Aabb {
    let mut widened = *aabb;
    for i in 0..3 {
        if widened.max[i] - widened.min[i] < MIN_AABB_DIMENSION {
            widened.max[i] += MIN_AABB_HALF_DIMENSION;
            widened.min[i] -= MIN_AABB_HALF_DIMENSION;
        }
    }
    widened
}
