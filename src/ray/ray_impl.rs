//! This module defines a Ray structure and intersection algorithms
//! for axis aligned bounding boxes and triangles.

use crate::aabb::{Aabb, IntersectsAabb};
use crate::utils::{fast_max, fast_min};
use crate::{Point3, Real, Vector3, EPSILON};

/// A struct which defines a ray and some of its cached values.
///
/// A ray covers the points `origin + t * direction` for `t` in `0..=max_distance`. Segments
/// built with [`Ray::segment`] have an unnormalized direction and `max_distance == 1`.
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    /// The ray origin.
    pub origin: Point3,

    /// The ray direction.
    pub direction: Vector3,

    /// Inverse (1/x) ray direction. Cached for use in [`Aabb`] intersections.
    ///
    /// [`Aabb`]: struct.Aabb.html
    ///
    pub inv_direction: Vector3,

    /// Largest ray parameter that is still part of the ray.
    pub max_distance: Real,
}

/// A struct which is returned by the [`Ray::intersects_triangle()`] method.
pub struct Intersection {
    /// Ray parameter of the intersection point.
    pub distance: Real,

    /// U coordinate of the intersection.
    pub u: Real,

    /// V coordinate of the intersection.
    pub v: Real,
}

impl Intersection {
    /// Constructs an [`Intersection`]. `distance` should be set to positive infinity,
    /// if the intersection does not occur.
    pub fn new(distance: Real, u: Real, v: Real) -> Intersection {
        Intersection { distance, u, v }
    }

    fn miss() -> Intersection {
        Intersection::new(Real::INFINITY, 0.0, 0.0)
    }
}

impl Ray {
    /// Creates the segment running from `source` to `target`.
    ///
    /// # Examples
    /// ```
    /// use quantized_bvh::ray::Ray;
    /// use quantized_bvh::Point3;
    ///
    /// let ray = Ray::segment(Point3::new(1.0, 0.0, 0.0), Point3::new(3.0, 0.0, 0.0));
    /// assert_eq!(ray.end_point(), Point3::new(3.0, 0.0, 0.0));
    /// ```
    pub fn segment(source: Point3, target: Point3) -> Ray {
        let direction = target - source;
        Ray {
            origin: source,
            direction,
            inv_direction: direction.map(|x| 1.0 / x),
            max_distance: 1.0,
        }
    }

    /// The last point of the ray.
    pub fn end_point(&self) -> Point3 {
        self.origin + self.direction * self.max_distance
    }

    /// The bounds of the covered points.
    pub fn segment_aabb(&self) -> Aabb {
        let end = self.end_point();
        Aabb::with_bounds(
            self.origin.coords.inf(&end.coords).into(),
            self.origin.coords.sup(&end.coords).into(),
        )
    }

    /// Returns the parameter interval in which the ray is inside `aabb`, clipped to
    /// `0..=max_distance`, or `None` if it misses.
    ///
    /// Axes along which the ray does not move are tested by containment of the origin.
    ///
    /// # Examples
    /// ```
    /// use quantized_bvh::aabb::Aabb;
    /// use quantized_bvh::ray::Ray;
    /// use quantized_bvh::Point3;
    ///
    /// let ray = Ray::segment(Point3::new(0.0, 0.5, 0.5), Point3::new(4.0, 0.5, 0.5));
    /// let aabb = Aabb::with_bounds(Point3::new(1.0, 0.0, 0.0), Point3::new(2.0, 1.0, 1.0));
    ///
    /// assert_eq!(ray.intersection_interval(&aabb), Some((0.25, 0.5)));
    /// ```
    pub fn intersection_interval(&self, aabb: &Aabb) -> Option<(Real, Real)> {
        let mut entry: Real = 0.0;
        let mut exit = self.max_distance;
        for i in 0..3 {
            if self.direction[i] == 0.0 {
                if self.origin[i] < aabb.min[i] || self.origin[i] > aabb.max[i] {
                    return None;
                }
                continue;
            }
            let t1 = (aabb.min[i] - self.origin[i]) * self.inv_direction[i];
            let t2 = (aabb.max[i] - self.origin[i]) * self.inv_direction[i];
            entry = fast_max(entry, fast_min(t1, t2));
            exit = fast_min(exit, fast_max(t1, t2));
            if entry > exit {
                return None;
            }
        }
        Some((entry, exit))
    }

    /// Tests the intersection of a [`Ray`] with an [`Aabb`] using the slab method.
    /// Touching a face counts as an intersection.
    ///
    /// # Examples
    /// ```
    /// use quantized_bvh::aabb::Aabb;
    /// use quantized_bvh::ray::Ray;
    /// use quantized_bvh::Point3;
    ///
    /// let ray = Ray::segment(Point3::new(0.0, 0.0, 0.0), Point3::new(200.0, 0.0, 0.0));
    ///
    /// let point1 = Point3::new(99.9,-1.0,-1.0);
    /// let point2 = Point3::new(100.1,1.0,1.0);
    /// let aabb = Aabb::with_bounds(point1, point2);
    ///
    /// assert!(ray.intersects_aabb(&aabb));
    /// ```
    ///
    /// [`Ray`]: struct.Ray.html
    /// [`Aabb`]: struct.Aabb.html
    ///
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.intersection_interval(aabb).is_some()
    }

    /// Implementation of the
    /// [Möller-Trumbore triangle/ray intersection algorithm](https://en.wikipedia.org/wiki/M%C3%B6ller%E2%80%93Trumbore_intersection_algorithm).
    /// Returns the ray parameter of the intersection, as well as
    /// the u and v coordinates of the intersection.
    /// The distance is set to +INFINITY if the ray misses the triangle within
    /// `0..=max_distance`. Both faces are hit.
    #[allow(clippy::many_single_char_names)]
    pub fn intersects_triangle(&self, a: &Point3, b: &Point3, c: &Point3) -> Intersection {
        let a_to_b = *b - *a;
        let a_to_c = *c - *a;

        // u_vec lies in view plane
        let u_vec = self.direction.cross(&a_to_c);

        // If determinant is near zero, ray lies in plane of triangle
        let det = a_to_b.dot(&u_vec);
        if det.abs() < EPSILON {
            return Intersection::miss();
        }

        let inv_det = 1.0 / det;
        let a_to_origin = self.origin - *a;

        // Test bounds: u < 0 || u > 1 => outside of triangle
        let u = a_to_origin.dot(&u_vec) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return Intersection::new(Real::INFINITY, u, 0.0);
        }

        let v_vec = a_to_origin.cross(&a_to_b);
        let v = self.direction.dot(&v_vec) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return Intersection::new(Real::INFINITY, u, v);
        }

        let distance = a_to_c.dot(&v_vec) * inv_det;
        if (0.0..=self.max_distance).contains(&distance) {
            Intersection::new(distance, u, v)
        } else {
            Intersection::new(Real::INFINITY, u, v)
        }
    }
}

impl IntersectsAabb for Ray {
    fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        Ray::intersects_aabb(self, aabb)
    }
}
