use crate::aabb::Aabb;

/// A trait implemented by things that may or may not intersect an AABB and, by extension,
/// things that can be used to traverse a BVH.
pub trait IntersectsAabb {
    /// Returns whether this object intersects an [`Aabb`].
    ///
    /// # Examples
    /// ```
    /// use quantized_bvh::aabb::{Aabb, IntersectsAabb};
    /// use quantized_bvh::Point3;
    ///
    /// struct XyPlane;
    ///
    /// impl IntersectsAabb for XyPlane {
    ///     fn intersects_aabb(&self, aabb: &Aabb) -> bool {
    ///         aabb.min[2] <= 0.0 && aabb.max[2] >= 0.0
    ///     }
    /// }
    ///
    /// let xy_plane = XyPlane;
    /// let aabb = Aabb::with_bounds(Point3::new(-1.0,-1.0,-1.0), Point3::new(1.0,1.0,1.0));
    /// assert!(xy_plane.intersects_aabb(&aabb));
    /// ```
    ///
    /// [`Aabb`]: struct.Aabb.html
    ///
    fn intersects_aabb(&self, aabb: &Aabb) -> bool;
}

impl IntersectsAabb for Aabb {
    fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        for i in 0..3 {
            if self.max[i] < aabb.min[i] || aabb.max[i] < self.min[i] {
                return false;
            }
        }
        true
    }
}
