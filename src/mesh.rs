//! Access to the triangles a BVH is built over.
//!
//! The BVH never owns mesh data. Builds and refits borrow a [`TriangleSource`] and read
//! vertex positions through it; between those calls the source may be mutated freely.

use crate::aabb::Aabb;
use crate::{Point3, Vector3};

/// The identity of one triangle: the sub-mesh it belongs to and its index inside that part.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TriangleId {
    /// Index of the owning sub-mesh part.
    pub sub_part: u32,
    /// Index of the triangle within its part.
    pub triangle_index: u32,
}

impl TriangleId {
    /// Creates a new [`TriangleId`].
    pub fn new(sub_part: u32, triangle_index: u32) -> TriangleId {
        TriangleId {
            sub_part,
            triangle_index,
        }
    }
}

/// An abstraction over the vertex and index buffers of a triangle mesh.
///
/// Implementors only provide per-part counts and raw vertex lookup. Scaling, iteration and
/// bounds are derived from those.
///
/// # Examples
/// ```
/// use quantized_bvh::mesh::{TriangleId, TriangleSource};
/// use quantized_bvh::Point3;
///
/// struct Soup(Vec<[Point3; 3]>);
///
/// impl TriangleSource for Soup {
///     fn num_sub_parts(&self) -> usize {
///         1
///     }
///
///     fn num_triangles_in_part(&self, _sub_part: usize) -> usize {
///         self.0.len()
///     }
///
///     fn raw_triangle(&self, id: TriangleId) -> [Point3; 3] {
///         self.0[id.triangle_index as usize]
///     }
/// }
///
/// let soup = Soup(vec![[
///     Point3::new(0.0, 0.0, 0.0),
///     Point3::new(1.0, 0.0, 0.0),
///     Point3::new(0.0, 2.0, 0.0),
/// ]]);
/// assert_eq!(soup.num_triangles(), 1);
/// assert_eq!(soup.bounding_box().max, Point3::new(1.0, 2.0, 0.0));
/// ```
pub trait TriangleSource {
    /// Number of sub-mesh parts.
    fn num_sub_parts(&self) -> usize;

    /// Number of triangles in part `sub_part`.
    fn num_triangles_in_part(&self, sub_part: usize) -> usize;

    /// The three vertices of triangle `id` before scaling.
    fn raw_triangle(&self, id: TriangleId) -> [Point3; 3];

    /// Per-axis factor applied to every vertex.
    fn scaling(&self) -> Vector3 {
        Vector3::repeat(1.0)
    }

    /// Total number of triangles over all parts.
    fn num_triangles(&self) -> usize {
        (0..self.num_sub_parts())
            .map(|part| self.num_triangles_in_part(part))
            .sum()
    }

    /// The three vertices of triangle `id` with [`TriangleSource::scaling`] applied.
    fn triangle(&self, id: TriangleId) -> [Point3; 3] {
        let scaling = self.scaling();
        self.raw_triangle(id)
            .map(|v| Point3::from(v.coords.component_mul(&scaling)))
    }

    /// Calls `f` with the scaled vertices and id of every triangle, part by part.
    fn for_each_triangle<F: FnMut([Point3; 3], TriangleId)>(&self, mut f: F)
    where
        Self: Sized,
    {
        for part in 0..self.num_sub_parts() {
            for index in 0..self.num_triangles_in_part(part) {
                let id = TriangleId::new(part as u32, index as u32);
                f(self.triangle(id), id);
            }
        }
    }

    /// The bounds of all scaled triangles. Empty if there are none.
    fn bounding_box(&self) -> Aabb
    where
        Self: Sized,
    {
        let mut aabb = Aabb::empty();
        self.for_each_triangle(|vertices, _| aabb.join_mut(&Aabb::from_points(&vertices)));
        aabb
    }
}

impl<S: TriangleSource> TriangleSource for &S {
    fn num_sub_parts(&self) -> usize {
        S::num_sub_parts(self)
    }

    fn num_triangles_in_part(&self, sub_part: usize) -> usize {
        S::num_triangles_in_part(self, sub_part)
    }

    fn raw_triangle(&self, id: TriangleId) -> [Point3; 3] {
        S::raw_triangle(self, id)
    }

    fn scaling(&self) -> Vector3 {
        S::scaling(self)
    }
}

/// One sub-mesh: a vertex buffer and triangles indexing into it.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MeshPart {
    /// Vertex positions.
    pub vertices: Vec<Point3>,
    /// Vertex indices, three per triangle.
    pub indices: Vec<[u32; 3]>,
}

impl MeshPart {
    /// Creates a part from its buffers.
    pub fn new(vertices: Vec<Point3>, indices: Vec<[u32; 3]>) -> MeshPart {
        MeshPart { vertices, indices }
    }

    /// Creates a part where every three consecutive vertices form one triangle.
    pub fn from_triangles(triangles: &[[Point3; 3]]) -> MeshPart {
        let mut part = MeshPart::default();
        for triangle in triangles {
            let base = part.vertices.len() as u32;
            part.vertices.extend_from_slice(triangle);
            part.indices.push([base, base + 1, base + 2]);
        }
        part
    }

    /// Adds a triangle with fresh vertices.
    pub fn push_triangle(&mut self, a: Point3, b: Point3, c: Point3) {
        let base = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&[a, b, c]);
        self.indices.push([base, base + 1, base + 2]);
    }
}

/// A multi-part indexed triangle mesh.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IndexedMesh {
    parts: Vec<MeshPart>,
    scaling: Vector3,
}

impl IndexedMesh {
    /// Creates an unscaled mesh from its parts.
    pub fn from_parts(parts: Vec<MeshPart>) -> IndexedMesh {
        IndexedMesh {
            parts,
            scaling: Vector3::repeat(1.0),
        }
    }

    /// Creates a single part mesh from a triangle soup.
    pub fn from_triangles(triangles: &[[Point3; 3]]) -> IndexedMesh {
        IndexedMesh::from_parts(vec![MeshPart::from_triangles(triangles)])
    }

    /// Replaces the scaling applied to every vertex.
    pub fn with_scaling(mut self, scaling: Vector3) -> IndexedMesh {
        self.scaling = scaling;
        self
    }

    /// Replaces the scaling applied to every vertex.
    pub fn set_scaling(&mut self, scaling: Vector3) {
        self.scaling = scaling;
    }

    /// The parts of this mesh.
    pub fn parts(&self) -> &[MeshPart] {
        &self.parts
    }

    /// Mutable access to the vertices of part `sub_part`, for deforming the mesh.
    ///
    /// Changing positions invalidates the bounds of a BVH built over this mesh until it is
    /// refit.
    pub fn vertices_mut(&mut self, sub_part: usize) -> &mut [Point3] {
        &mut self.parts[sub_part].vertices
    }

    /// Moves all vertices of triangle `id` by `offset`.
    ///
    /// Vertices shared with other triangles move as well.
    pub fn translate_triangle(&mut self, id: TriangleId, offset: &Vector3) {
        let part = &mut self.parts[id.sub_part as usize];
        let indices = part.indices[id.triangle_index as usize];
        for index in indices {
            part.vertices[index as usize] += *offset;
        }
    }
}

impl TriangleSource for IndexedMesh {
    fn num_sub_parts(&self) -> usize {
        self.parts.len()
    }

    fn num_triangles_in_part(&self, sub_part: usize) -> usize {
        self.parts[sub_part].indices.len()
    }

    fn raw_triangle(&self, id: TriangleId) -> [Point3; 3] {
        let part = &self.parts[id.sub_part as usize];
        part.indices[id.triangle_index as usize].map(|index| part.vertices[index as usize])
    }

    fn scaling(&self) -> Vector3 {
        self.scaling
    }
}
