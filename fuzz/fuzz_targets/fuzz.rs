#![no_main]
use std::fmt::{self, Debug, Formatter};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use ordered_float::NotNan;
use quantized_bvh::aabb::{Aabb, IntersectsAabb};
use quantized_bvh::bvh::{BuildOptions, OptimizedBvh, TraversalMode};
use quantized_bvh::mesh::{IndexedMesh, TriangleId, TriangleSource};
use quantized_bvh::{Point3, Real, Vector3};

const LIMIT: Real = 1_000.0;

fuzz_target!(|workload: Workload| {
    workload.fuzz();
});

#[derive(Arbitrary)]
struct ArbitraryPoint {
    coordinates: [NotNan<f32>; 3],
}

impl ArbitraryPoint {
    fn point(&self) -> Point3 {
        let [x, y, z] = self.coordinates.map(|f| (f.into_inner() as Real).clamp(-LIMIT, LIMIT));
        Point3::new(x, y, z)
    }
}

#[derive(Arbitrary)]
struct ArbitraryBox {
    a: ArbitraryPoint,
    b: ArbitraryPoint,
}

impl Debug for ArbitraryBox {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Debug::fmt(&self.aabb(), f)
    }
}

impl ArbitraryBox {
    fn aabb(&self) -> Aabb {
        Aabb::from_points(&[self.a.point(), self.b.point()])
    }
}

#[derive(Arbitrary)]
struct ArbitraryTriangle([ArbitraryPoint; 3]);

impl Debug for ArbitraryTriangle {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Debug::fmt(&self.vertices(), f)
    }
}

impl ArbitraryTriangle {
    fn vertices(&self) -> [Point3; 3] {
        [self.0[0].point(), self.0[1].point(), self.0[2].point()]
    }
}

#[derive(Debug, Arbitrary)]
struct Translation {
    triangle: usize,
    offset: ArbitraryPoint,
}

#[derive(Debug, Arbitrary)]
struct Workload {
    triangles: Vec<ArbitraryTriangle>,
    use_quantization: bool,
    max_subtree_size_in_bytes: u16,
    queries: Vec<ArbitraryBox>,
    translations: Vec<Translation>,
    garbage: Vec<u8>,
}

/// Answers every id, so trees read from arbitrary bytes can be refit.
struct AnyTriangle<'t>(&'t [[Point3; 3]]);

impl TriangleSource for AnyTriangle<'_> {
    fn num_sub_parts(&self) -> usize {
        1
    }

    fn num_triangles_in_part(&self, _sub_part: usize) -> usize {
        self.0.len()
    }

    fn raw_triangle(&self, id: TriangleId) -> [Point3; 3] {
        self.0
            .get(id.triangle_index as usize)
            .copied()
            .unwrap_or([Point3::origin(); 3])
    }
}

fn brute_force(mesh: &IndexedMesh, query: &Aabb) -> Vec<TriangleId> {
    let mut hits = Vec::new();
    mesh.for_each_triangle(|vertices, id| {
        if query.intersects_aabb(&Aabb::from_points(&vertices)) {
            hits.push(id);
        }
    });
    hits
}

fn sorted_hits(bvh: &OptimizedBvh, mode: TraversalMode, query: &Aabb) -> Vec<TriangleId> {
    let mut hits = Vec::new();
    bvh.traverse_aabb_with_mode(mode, query, |id| hits.push(id));
    hits.sort_unstable();
    hits
}

impl Workload {
    /// Checks that every strategy agrees, never misses an exact hit, and survives
    /// serialization and refits.
    fn check(&self, bvh: &OptimizedBvh, mesh: &IndexedMesh) {
        bvh.assert_consistent();
        for query in &self.queries {
            let query = query.aabb();
            let stackless = sorted_hits(bvh, TraversalMode::Stackless, &query);
            assert_eq!(stackless, sorted_hits(bvh, TraversalMode::StacklessCacheFriendly, &query));
            assert_eq!(stackless, sorted_hits(bvh, TraversalMode::Recursive, &query));
            for id in brute_force(mesh, &query) {
                assert!(stackless.binary_search(&id).is_ok(), "missed {id:?}");
            }
        }
    }

    fn fuzz(self) {
        if self.triangles.len() > 512 {
            return;
        }
        let triangles: Vec<_> = self.triangles.iter().map(ArbitraryTriangle::vertices).collect();
        let mut mesh = IndexedMesh::from_triangles(&triangles);
        let options = BuildOptions {
            use_quantization: self.use_quantization,
            max_subtree_size_in_bytes: self.max_subtree_size_in_bytes as usize,
            ..BuildOptions::default()
        };
        let mut bvh = match OptimizedBvh::build_with_options(&mesh, &options) {
            Ok(bvh) => bvh,
            Err(_) => return,
        };
        self.check(&bvh, &mesh);

        if let Ok(image) = bvh.serialize_to_vec(true) {
            let reloaded = OptimizedBvh::deserialize_owned(&image, true).expect("round trip");
            assert_eq!(reloaded.node_count(), bvh.node_count());
            self.check(&reloaded, &mesh);
        }

        // Arbitrary bytes are rejected, or accepted and safe to traverse and refit.
        if let Ok(mut garbage) = OptimizedBvh::deserialize_owned(&self.garbage, false) {
            for query in &self.queries {
                let query = query.aabb();
                for mode in [
                    TraversalMode::Stackless,
                    TraversalMode::StacklessCacheFriendly,
                    TraversalMode::Recursive,
                ] {
                    garbage.traverse_aabb_with_mode(mode, &query, |_| {});
                }
            }
            let source = AnyTriangle(&triangles);
            let domain = garbage.quantizer().domain();
            garbage.refit_partial(&source, &domain);
            for query in &self.queries {
                garbage.traverse_aabb(&query.aabb(), |_| {});
            }
        }

        if triangles.is_empty() {
            return;
        }
        for translation in &self.translations {
            let id = TriangleId::new(0, (translation.triangle % triangles.len()) as u32);
            let before = Aabb::from_points(&mesh.triangle(id));
            let offset: Vector3 = translation.offset.point().coords * 0.01;
            mesh.translate_triangle(id, &offset);
            let region = before.join(&Aabb::from_points(&mesh.triangle(id)));
            if bvh.quantizer().domain().contains_aabb(&region) {
                bvh.refit_partial(&mesh, &region);
            } else {
                bvh.refit(&mesh);
            }
            self.check(&bvh, &mesh);
        }
    }
}
