//! Common utilities shared by unit tests.
#![cfg(test)]

use crate::aabb::{Aabb, IntersectsAabb};
use crate::mesh::{IndexedMesh, MeshPart, TriangleId, TriangleSource};
use crate::{Point3, Real, Vector3};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A vector represented as a tuple
pub type TupleVec = (f32, f32, f32);

/// Generate a `TupleVec` for [`proptest::strategy::Strategy`] from -10e10 to 10e10
/// A small enough range to prevent most fp32 errors from breaking certain tests
/// Tests which rely on this strategy should probably be rewritten
pub fn tuplevec_small_strategy() -> impl Strategy<Value = TupleVec> {
    (
        -10e10_f32..10e10_f32,
        -10e10_f32..10e10_f32,
        -10e10_f32..10e10_f32,
    )
}

/// Convert a `TupleVec` to a [`Point3`].
pub fn tuple_to_point(tpl: &TupleVec) -> Point3 {
    Point3::new(tpl.0 as Real, tpl.1 as Real, tpl.2 as Real)
}

/// The box from the origin to `(1, 1, 1)`.
pub fn unit_aabb() -> Aabb {
    Aabb::with_bounds(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0))
}

/// Routes `log` output of the code under test through the test harness.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Creates `count` deterministic random triangles with centers in `[-5, 5]^3` and edges
/// shorter than one unit per axis.
pub fn random_triangles(count: usize, seed: u64) -> Vec<[Point3; 3]> {
    let mut rng = StdRng::seed_from_u64(seed);
    let point = |rng: &mut StdRng, extent: Real| {
        Vector3::new(
            rng.random_range(-extent..extent),
            rng.random_range(-extent..extent),
            rng.random_range(-extent..extent),
        )
    };
    (0..count)
        .map(|_| {
            let center = Point3::from(point(&mut rng, 5.0));
            [
                center + point(&mut rng, 0.5),
                center + point(&mut rng, 0.5),
                center + point(&mut rng, 0.5),
            ]
        })
        .collect()
}

/// A single part mesh of [`random_triangles`].
pub fn random_mesh(count: usize, seed: u64) -> IndexedMesh {
    IndexedMesh::from_triangles(&random_triangles(count, seed))
}

/// A flat `n` by `n` grid of unit quads in the plane `z = 0`, two triangles per quad,
/// split into one part per row.
pub fn grid_mesh(n: usize) -> IndexedMesh {
    let parts = (0..n)
        .map(|row| {
            let y = row as Real;
            let mut part = MeshPart::default();
            for column in 0..n {
                let x = column as Real;
                let a = Point3::new(x, y, 0.0);
                let b = Point3::new(x + 1.0, y, 0.0);
                let c = Point3::new(x + 1.0, y + 1.0, 0.0);
                let d = Point3::new(x, y + 1.0, 0.0);
                part.push_triangle(a, b, c);
                part.push_triangle(a, c, d);
            }
            part
        })
        .collect();
    IndexedMesh::from_parts(parts)
}

/// The exact bounds of triangle `id`.
pub fn triangle_aabb<S: TriangleSource>(source: &S, id: TriangleId) -> Aabb {
    Aabb::from_points(&source.triangle(id))
}

/// All triangles whose exact bounds overlap `query`, sorted.
pub fn brute_force_overlaps<S: TriangleSource>(source: &S, query: &Aabb) -> Vec<TriangleId> {
    let mut hits = Vec::new();
    source.for_each_triangle(|vertices, id| {
        if query.intersects_aabb(&Aabb::from_points(&vertices)) {
            hits.push(id);
        }
    });
    hits
}

/// Sorts triangle ids into part-then-index order.
pub fn sorted(mut ids: Vec<TriangleId>) -> Vec<TriangleId> {
    ids.sort_unstable();
    ids
}

/// Zeroed storage for at least `len` bytes, aligned to 8 bytes.
pub fn aligned_buffer(len: usize) -> Vec<u64> {
    vec![0u64; len.div_ceil(8)]
}
