#![cfg_attr(feature = "bench", feature(test))]
//! A crate which exports a quantized, stackless bounding volume hierarchy for static
//! triangle meshes, together with the axis-aligned bounding boxes and rays used to query it.
//!
//! ## About
//!
//! Collision shapes built from large triangle meshes need a spatial index which answers
//! "which triangles overlap this box" or "which triangles does this segment pass near"
//! without testing every triangle. This crate builds a binary BVH over the triangles of a
//! [`TriangleSource`] and stores it as one flat array in depth-first pre-order. Every inner
//! node knows its *escape index*, the number of slots to skip to leave its subtree, so
//! queries run as a single forward scan without a stack.
//!
//! Node bounds are quantized to 16 bits per axis relative to a global domain, which makes a
//! node 16 bytes. Subtrees that fit into a small byte budget are additionally summarised in
//! *subtree headers*, giving a cache-friendly two-level traversal and bounding the work of
//! partial refits. The whole tree can be serialized into one contiguous buffer and used again
//! directly from that buffer.
//!
//! ## Example
//!
//! ```
//! use quantized_bvh::aabb::Aabb;
//! use quantized_bvh::bvh::OptimizedBvh;
//! use quantized_bvh::mesh::{IndexedMesh, MeshPart};
//! use quantized_bvh::{Point3, Real};
//!
//! // A strip of 100 triangles along the x axis.
//! let mut part = MeshPart::default();
//! for i in 0..100u32 {
//!     let x = i as Real;
//!     let base = part.vertices.len() as u32;
//!     part.vertices.push(Point3::new(x, 0.0, 0.0));
//!     part.vertices.push(Point3::new(x + 0.5, 1.0, 0.0));
//!     part.vertices.push(Point3::new(x + 0.5, 0.0, 1.0));
//!     part.indices.push([base, base + 1, base + 2]);
//! }
//! let mesh = IndexedMesh::from_parts(vec![part]);
//!
//! let bvh = OptimizedBvh::build(&mesh, true).unwrap();
//!
//! let query = Aabb::with_bounds(Point3::new(10.2, 0.0, 0.0), Point3::new(10.4, 1.0, 1.0));
//! let mut hits = Vec::new();
//! bvh.traverse_aabb(&query, |id| hits.push(id.triangle_index));
//! assert_eq!(hits, vec![10]);
//! ```
//!
//! ## Features
//!
//! - `rayon` (default **enabled**) - adds batched parallel queries
//! - `serde` (default **disabled**) - adds `Serialize` and `Deserialize` implementations for some types
//! - `f64` (default **disabled**) - uses `f64` instead of `f32` as [`Real`]
//!

#[cfg(all(feature = "bench", test))]
extern crate test;

/// Float type used by this crate
#[cfg(feature = "f64")]
pub type Real = f64;

/// Float type used by this crate
#[cfg(not(feature = "f64"))]
pub type Real = f32;

/// Point math type used by this crate. Type alias for [`nalgebra::Point3`].
pub type Point3 = nalgebra::Point3<Real>;

/// Vector math type used by this crate. Type alias for [`nalgebra::Vector3`].
pub type Vector3 = nalgebra::Vector3<Real>;

/// A minimal floating value used as a lower bound.
pub const EPSILON: Real = 0.00001;

pub mod aabb;
pub mod axis;
pub mod bvh;
pub mod error;
pub mod mesh;
pub mod mesh_shape;
pub mod quantization;
pub mod ray;
mod utils;

#[cfg(test)]
mod testbase;

pub use error::{Error, Result};
pub use mesh::{TriangleId, TriangleSource};
