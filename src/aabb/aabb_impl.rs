//! Axis Aligned Bounding Boxes.

use crate::utils::{fast_max, fast_min};
use crate::{Point3, Real, Vector3};
use std::fmt;

/// [`Aabb`] struct.
///
/// [`Aabb`]: struct.Aabb.html
///
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Aabb {
    /// Minimum coordinates
    pub min: Point3,

    /// Maximum coordinates
    pub max: Point3,
}

impl fmt::Display for Aabb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Min bound: {}; Max bound: {}", self.min, self.max)
    }
}

impl Aabb {
    /// Creates a new [`Aabb`] with the given bounds.
    ///
    /// # Examples
    /// ```
    /// use quantized_bvh::aabb::Aabb;
    /// use quantized_bvh::Point3;
    ///
    /// let aabb = Aabb::with_bounds(Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0));
    /// assert_eq!(aabb.min.x, -1.0);
    /// assert_eq!(aabb.max.z, 1.0);
    /// ```
    ///
    /// [`Aabb`]: struct.Aabb.html
    ///
    pub fn with_bounds(min: Point3, max: Point3) -> Aabb {
        Aabb { min, max }
    }

    /// Creates a new empty [`Aabb`].
    ///
    /// # Examples
    /// ```
    /// use quantized_bvh::aabb::Aabb;
    ///
    /// let aabb = Aabb::empty();
    /// assert!(aabb.is_empty());
    /// ```
    ///
    /// [`Aabb`]: struct.Aabb.html
    ///
    pub fn empty() -> Aabb {
        Aabb {
            min: Point3::new(Real::INFINITY, Real::INFINITY, Real::INFINITY),
            max: Point3::new(Real::NEG_INFINITY, Real::NEG_INFINITY, Real::NEG_INFINITY),
        }
    }

    /// Creates the smallest [`Aabb`] containing all `points`.
    pub fn from_points(points: &[Point3]) -> Aabb {
        points.iter().fold(Aabb::empty(), |aabb, p| aabb.grow(p))
    }

    /// Returns true if the [`Point3`] is inside the [`Aabb`].
    ///
    /// # Examples
    /// ```
    /// use quantized_bvh::aabb::Aabb;
    /// use quantized_bvh::Point3;
    ///
    /// let aabb = Aabb::with_bounds(Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0));
    /// assert!(aabb.contains(&Point3::new(0.0, 0.5, -1.0)));
    /// assert!(!aabb.contains(&Point3::new(2.0, 0.0, 0.0)));
    /// ```
    ///
    /// [`Aabb`]: struct.Aabb.html
    ///
    pub fn contains(&self, p: &Point3) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }

    /// Returns true if `other` lies completely inside this [`Aabb`].
    pub fn contains_aabb(&self, other: &Aabb) -> bool {
        self.contains(&other.min) && self.contains(&other.max)
    }

    /// Returns a new minimal [`Aabb`] which contains both this [`Aabb`] and `other`.
    ///
    /// # Examples
    /// ```
    /// use quantized_bvh::aabb::Aabb;
    /// use quantized_bvh::Point3;
    ///
    /// let aabb1 = Aabb::with_bounds(Point3::new(-101.0, 0.0, 0.0), Point3::new(-100.0, 1.0, 1.0));
    /// let aabb2 = Aabb::with_bounds(Point3::new(100.0, 0.0, 0.0), Point3::new(101.0, 1.0, 1.0));
    /// let joint = aabb1.join(&aabb2);
    ///
    /// assert_eq!(joint.min, Point3::new(-101.0, 0.0, 0.0));
    /// assert_eq!(joint.max, Point3::new(101.0, 1.0, 1.0));
    /// ```
    ///
    /// [`Aabb`]: struct.Aabb.html
    ///
    pub fn join(&self, other: &Aabb) -> Aabb {
        Aabb::with_bounds(
            Point3::new(
                fast_min(self.min.x, other.min.x),
                fast_min(self.min.y, other.min.y),
                fast_min(self.min.z, other.min.z),
            ),
            Point3::new(
                fast_max(self.max.x, other.max.x),
                fast_max(self.max.y, other.max.y),
                fast_max(self.max.z, other.max.z),
            ),
        )
    }

    /// Mutable version of [`Aabb::join`].
    ///
    /// [`Aabb::join`]: struct.Aabb.html
    ///
    pub fn join_mut(&mut self, other: &Aabb) {
        *self = self.join(other);
    }

    /// Returns a new minimal [`Aabb`] which contains both
    /// this [`Aabb`] and the [`Point3`] `other`.
    ///
    /// [`Aabb`]: struct.Aabb.html
    ///
    pub fn grow(&self, other: &Point3) -> Aabb {
        Aabb::with_bounds(
            Point3::new(
                fast_min(self.min.x, other.x),
                fast_min(self.min.y, other.y),
                fast_min(self.min.z, other.z),
            ),
            Point3::new(
                fast_max(self.max.x, other.x),
                fast_max(self.max.y, other.y),
                fast_max(self.max.z, other.z),
            ),
        )
    }

    /// Returns the size of this [`Aabb`] in all three dimensions.
    pub fn size(&self) -> Vector3 {
        self.max - self.min
    }

    /// Returns the center [`Point3`] of the [`Aabb`].
    pub fn center(&self) -> Point3 {
        self.min + (self.size() / 2.0)
    }

    /// An empty [`Aabb`] is an [`Aabb`] where the lower bound is greater than
    /// the upper bound in at least one component.
    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.min[i] > self.max[i])
    }
}

/// Default instance for [`Aabb`]s. Returns an [`Aabb`] which is [`empty()`].
///
/// [`Aabb`]: struct.Aabb.html
/// [`empty()`]: #method.empty
///
impl Default for Aabb {
    fn default() -> Aabb {
        Aabb::empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::aabb::Aabb;
    use crate::testbase::{tuple_to_point, tuplevec_small_strategy, TupleVec};
    use crate::{Point3, Vector3, EPSILON};
    use float_eq::assert_float_eq;
    use proptest::prelude::*;

    proptest! {
        // Test whether an empty `Aabb` does not contains anything.
        #[test]
        fn test_empty_contains_nothing(tpl in tuplevec_small_strategy()) {
            let p = tuple_to_point(&tpl);
            let aabb = Aabb::empty();
            assert!(!aabb.contains(&p));
        }

        // Test whether a default `Aabb` is empty.
        #[test]
        fn test_default_is_empty(tpl in tuplevec_small_strategy()) {
            let p = tuple_to_point(&tpl);
            let aabb: Aabb = Default::default();
            assert!(!aabb.contains(&p));
        }

        // Test whether an `Aabb` always contains its center.
        #[test]
        fn test_aabb_contains_center(a in tuplevec_small_strategy(), b in tuplevec_small_strategy()) {
            let p1 = tuple_to_point(&a);
            let p2 = tuple_to_point(&b);
            let aabb = Aabb::empty().grow(&p1).join(&Aabb::with_bounds(p2, p2));
            let center = aabb.center();
            assert!((0..3).all(|i| center[i] > aabb.min[i] - EPSILON && center[i] < aabb.max[i] + EPSILON));
        }

        // Test whether the joint of two point-sets contains all the points.
        #[test]
        fn test_join_two_aabbs(a in (tuplevec_small_strategy(), tuplevec_small_strategy(), tuplevec_small_strategy()),
                               b in (tuplevec_small_strategy(), tuplevec_small_strategy(), tuplevec_small_strategy())) {
            let points: Vec<TupleVec> = vec![a.0, a.1, a.2, b.0, b.1, b.2];
            let points = points.iter().map(tuple_to_point).collect::<Vec<Point3>>();
            let aabb1 = Aabb::from_points(&points[..3]);
            let aabb2 = Aabb::from_points(&points[3..]);
            let joint = aabb1.join(&aabb2);

            assert!(points[..3].iter().all(|p| aabb1.contains(p)));
            assert!(points[3..].iter().all(|p| aabb2.contains(p)));
            assert!(points.iter().all(|p| joint.contains(p)));
        }
    }

    #[test]
    /// Test the size and center of a flat box.
    fn test_size_and_center() {
        let aabb = Aabb::with_bounds(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 5.0, 2.0));
        assert_eq!(aabb.size(), Vector3::new(1.0, 5.0, 2.0));
        assert_float_eq!(aabb.center().y, 2.5, abs <= EPSILON);
    }
}
