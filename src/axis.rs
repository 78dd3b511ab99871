//! Axis enum for indexing three-dimensional structures.

use crate::Vector3;

/// An `Axis` in a three-dimensional coordinate system.
/// Used to select the splitting direction while building a BVH.
///
/// # Examples
/// ```
/// use quantized_bvh::axis::Axis;
/// use quantized_bvh::Vector3;
///
/// let spread = Vector3::new(1.0, 0.5, 42.0);
/// let axis = Axis::of_max_component(&spread);
///
/// assert_eq!(axis, Axis::Z);
/// assert_eq!(spread[axis as usize], 42.0);
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Axis {
    /// Index of the X axis.
    X = 0,

    /// Index of the Y axis.
    Y = 1,

    /// Index of the Z axis.
    Z = 2,
}

impl Axis {
    /// Returns the axis of the largest component of `v`.
    /// Ties resolve towards the earlier axis, so `(1, 1, 0)` yields [`Axis::X`].
    pub fn of_max_component(v: &Vector3) -> Axis {
        if v.x < v.y {
            if v.y < v.z {
                Axis::Z
            } else {
                Axis::Y
            }
        } else if v.x < v.z {
            Axis::Z
        } else {
            Axis::X
        }
    }
}
