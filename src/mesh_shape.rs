//! A triangle mesh bundled with the BVH built over it.

use crate::aabb::Aabb;
use crate::bvh::{BuildOptions, OptimizedBvh, TraversalStats};
use crate::error::Result;
use crate::mesh::{TriangleId, TriangleSource};
use crate::ray::Ray;
use crate::{Point3, Real, Vector3};

/// Owns a [`TriangleSource`] together with its [`OptimizedBvh`] and local bounds, and
/// answers queries with the vertices of the triangles found.
///
/// # Examples
/// ```
/// use quantized_bvh::mesh::IndexedMesh;
/// use quantized_bvh::mesh_shape::BvhTriangleMeshShape;
/// use quantized_bvh::Point3;
///
/// let mesh = IndexedMesh::from_triangles(&[[
///     Point3::new(0.0, 0.0, 0.0),
///     Point3::new(1.0, 0.0, 0.0),
///     Point3::new(0.0, 1.0, 0.0),
/// ]]);
/// let shape = BvhTriangleMeshShape::new(mesh, true).unwrap();
///
/// let hit = shape.closest_ray_hit(&Point3::new(0.2, 0.2, 1.0), &Point3::new(0.2, 0.2, -1.0));
/// assert_eq!(hit.map(|(id, _)| id.triangle_index), Some(0));
/// ```
#[derive(Debug)]
pub struct BvhTriangleMeshShape<S: TriangleSource> {
    mesh: S,
    bvh: OptimizedBvh<'static>,
    local_aabb: Aabb,
    options: BuildOptions,
}

impl<S: TriangleSource> BvhTriangleMeshShape<S> {
    /// Builds the BVH over `mesh` with default options.
    pub fn new(mesh: S, use_quantization: bool) -> Result<Self> {
        let options = BuildOptions {
            use_quantization,
            ..BuildOptions::default()
        };
        Self::with_options(mesh, options)
    }

    /// Builds the BVH over `mesh`.
    pub fn with_options(mesh: S, options: BuildOptions) -> Result<Self> {
        let bvh = OptimizedBvh::build_with_options(&mesh, &options)?;
        let local_aabb = mesh.bounding_box();
        Ok(BvhTriangleMeshShape {
            mesh,
            bvh,
            local_aabb,
            options,
        })
    }

    /// Wraps a mesh and a BVH that was built over it, e.g. one loaded from disk.
    pub fn with_bvh(mesh: S, bvh: OptimizedBvh<'static>) -> Self {
        let local_aabb = mesh.bounding_box();
        let options = BuildOptions {
            use_quantization: bvh.is_quantized(),
            quantization_margin: bvh.quantization_margin(),
            traversal_mode: bvh.traversal_mode(),
            ..BuildOptions::default()
        };
        BvhTriangleMeshShape {
            mesh,
            bvh,
            local_aabb,
            options,
        }
    }

    /// Rebuilds the tree from scratch, for when triangles were added or removed.
    pub fn build_optimized_bvh(&mut self) -> Result<()> {
        self.bvh = OptimizedBvh::build_with_options(&self.mesh, &self.options)?;
        self.local_aabb = self.mesh.bounding_box();
        Ok(())
    }

    /// The wrapped mesh.
    pub fn mesh(&self) -> &S {
        &self.mesh
    }

    /// Mutable access to the mesh. Call [`BvhTriangleMeshShape::refit_tree`] or
    /// [`BvhTriangleMeshShape::partial_refit_tree`] after moving vertices.
    pub fn mesh_mut(&mut self) -> &mut S {
        &mut self.mesh
    }

    /// The tree.
    pub fn bvh(&self) -> &OptimizedBvh<'static> {
        &self.bvh
    }

    /// The bounds of the mesh as of the last build or refit.
    pub fn local_aabb(&self) -> &Aabb {
        &self.local_aabb
    }

    /// Separates the mesh and its tree.
    pub fn into_parts(self) -> (S, OptimizedBvh<'static>) {
        (self.mesh, self.bvh)
    }

    /// Calls `callback` with the vertices and id of every triangle whose bounds overlap
    /// `aabb`.
    pub fn process_all_triangles<F>(&self, aabb: &Aabb, mut callback: F) -> TraversalStats
    where
        F: FnMut(&[Point3; 3], TriangleId),
    {
        let mesh = &self.mesh;
        self.bvh
            .traverse_aabb(aabb, |id| callback(&mesh.triangle(id), id))
    }

    /// Calls `callback` for every triangle whose bounds the segment from `source` to
    /// `target` passes through. The callback does its own exact intersection test.
    pub fn perform_raycast<F>(&self, source: &Point3, target: &Point3, mut callback: F) -> TraversalStats
    where
        F: FnMut(&[Point3; 3], TriangleId),
    {
        let mesh = &self.mesh;
        self.bvh
            .traverse_ray(source, target, |id| callback(&mesh.triangle(id), id))
    }

    /// Calls `callback` for every triangle whose bounds the box `aabb_min..=aabb_max`
    /// sweeps through while moving from `source` to `target`.
    pub fn perform_convexcast<F>(
        &self,
        source: &Point3,
        target: &Point3,
        aabb_min: &Vector3,
        aabb_max: &Vector3,
        mut callback: F,
    ) -> TraversalStats
    where
        F: FnMut(&[Point3; 3], TriangleId),
    {
        let mesh = &self.mesh;
        self.bvh
            .traverse_box_cast(source, target, aabb_min, aabb_max, |id| {
                callback(&mesh.triangle(id), id)
            })
    }

    /// The first triangle the segment from `source` to `target` crosses, with the segment
    /// parameter of the crossing in `0..=1`.
    pub fn closest_ray_hit(&self, source: &Point3, target: &Point3) -> Option<(TriangleId, Real)> {
        let ray = Ray::segment(*source, *target);
        let mut closest: Option<(TriangleId, Real)> = None;
        self.perform_raycast(source, target, |[a, b, c], id| {
            let distance = ray.intersects_triangle(a, b, c).distance;
            if distance.is_finite() && closest.map_or(true, |(_, best)| distance < best) {
                closest = Some((id, distance));
            }
        });
        closest
    }

    /// Refits the whole tree to the current mesh and recomputes the local bounds.
    pub fn refit_tree(&mut self) {
        self.bvh.refit(&self.mesh);
        self.local_aabb = self.mesh.bounding_box();
    }

    /// Refits the subtrees overlapping `region` and grows the local bounds by `region`.
    pub fn partial_refit_tree(&mut self, region: &Aabb) {
        self.bvh.refit_partial(&self.mesh, region);
        self.local_aabb.join_mut(region);
    }
}

#[cfg(test)]
mod tests {
    use crate::aabb::Aabb;
    use crate::mesh::TriangleId;
    use crate::mesh_shape::BvhTriangleMeshShape;
    use crate::testbase::{grid_mesh, sorted};
    use crate::{Point3, Vector3};
    use float_eq::assert_float_eq;

    fn grid_shape() -> BvhTriangleMeshShape<crate::mesh::IndexedMesh> {
        BvhTriangleMeshShape::new(grid_mesh(8), true).unwrap()
    }

    #[test]
    /// A box inside one grid cell reports the two triangles of that cell.
    fn test_process_all_triangles() {
        let shape = grid_shape();
        let query = Aabb::with_bounds(Point3::new(2.2, 3.2, -0.1), Point3::new(2.8, 3.8, 0.1));
        let mut hits = Vec::new();
        shape.process_all_triangles(&query, |vertices, id| {
            assert!(vertices.iter().all(|v| v.z == 0.0));
            hits.push(id);
        });
        assert_eq!(sorted(hits), vec![TriangleId::new(3, 4), TriangleId::new(3, 5)]);
    }

    #[test]
    /// A vertical segment through a cell hits the triangle below the diagonal first.
    fn test_raycast() {
        let shape = grid_shape();
        let source = Point3::new(2.5, 3.25, 5.0);
        let target = Point3::new(2.5, 3.25, -5.0);

        let mut candidates = Vec::new();
        shape.perform_raycast(&source, &target, |_, id| candidates.push(id));
        assert_eq!(
            sorted(candidates),
            vec![TriangleId::new(3, 4), TriangleId::new(3, 5)]
        );

        let (id, distance) = shape.closest_ray_hit(&source, &target).unwrap();
        assert_eq!(id, TriangleId::new(3, 4));
        assert_float_eq!(distance, 0.5, abs <= 1e-5);

        let miss = shape.closest_ray_hit(&Point3::new(20.0, 20.0, 5.0), &Point3::new(20.0, 20.0, -5.0));
        assert!(miss.is_none());
    }

    #[test]
    /// A box swept to the edge of the grid touches the first cell of the first row.
    fn test_convexcast() {
        let shape = grid_shape();
        let half = Vector3::new(0.6, 0.2, 0.2);
        let mut hits = Vec::new();
        shape.perform_convexcast(
            &Point3::new(-3.0, 0.5, 0.0),
            &Point3::new(0.0, 0.5, 0.0),
            &-half,
            &half,
            |_, id| hits.push(id),
        );
        assert_eq!(sorted(hits), vec![TriangleId::new(0, 0), TriangleId::new(0, 1)]);

        let mut short = 0;
        shape.perform_convexcast(
            &Point3::new(-3.0, 0.5, 0.0),
            &Point3::new(-1.0, 0.5, 0.0),
            &-half,
            &half,
            |_, _| short += 1,
        );
        assert_eq!(short, 0);
    }

    #[test]
    /// After lifting a row and refitting, queries find it at its new height.
    fn test_refit_tree() {
        let mut shape = grid_shape();
        for vertex in shape.mesh_mut().vertices_mut(0) {
            vertex.z += 2.0;
        }
        shape.refit_tree();
        shape.bvh().assert_consistent();
        assert_eq!(shape.local_aabb().max.z, 2.0);

        let lifted = Aabb::with_bounds(Point3::new(-1.0, -1.0, 1.9), Point3::new(10.0, 10.0, 2.1));
        let mut parts = Vec::new();
        shape.process_all_triangles(&lifted, |_, id| parts.push(id.sub_part));
        assert_eq!(parts.len(), 16);
        assert!(parts.iter().all(|&part| part == 0));
    }

    #[test]
    /// A partial refit covering a moved triangle finds it and grows the local bounds.
    fn test_partial_refit_tree() {
        let mut shape = grid_shape();
        let id = TriangleId::new(5, 9);
        shape
            .mesh_mut()
            .translate_triangle(id, &Vector3::new(0.0, 0.0, 0.5));
        let region = Aabb::with_bounds(Point3::new(4.0, 5.0, -0.1), Point3::new(5.0, 6.0, 0.6));
        shape.partial_refit_tree(&region);
        shape.bvh().assert_consistent();
        assert_eq!(shape.local_aabb().max.z, 0.6);

        let above = Aabb::with_bounds(Point3::new(4.1, 5.1, 0.45), Point3::new(4.9, 5.9, 0.55));
        let mut hits = Vec::new();
        shape.process_all_triangles(&above, |_, hit| hits.push(hit));
        assert_eq!(hits, vec![id]);
    }

    #[test]
    /// A rebuilt tree can be split off and wrapped again.
    fn test_rebuild() {
        let mut shape = grid_shape();
        shape.build_optimized_bvh().unwrap();
        assert_eq!(shape.bvh().node_count(), 2 * 128 - 1);
        let (mesh, bvh) = shape.into_parts();
        let shape = BvhTriangleMeshShape::with_bvh(mesh, bvh);
        assert!(shape.bvh().is_quantized());
    }
}
