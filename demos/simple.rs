use quantized_bvh::aabb::Aabb;
use quantized_bvh::bvh::OptimizedBvh;
use quantized_bvh::mesh::{IndexedMesh, MeshPart};
use quantized_bvh::mesh_shape::BvhTriangleMeshShape;
use quantized_bvh::{Point3, Real, Vector3};

/// A terrain of `n * n` quads with a gentle height field.
fn terrain(n: u32) -> IndexedMesh {
    let height = |x: Real, y: Real| (x * 0.1).sin() * (y * 0.1).cos();
    let mut part = MeshPart::default();
    for i in 0..n {
        for j in 0..n {
            let (x, y) = (i as Real, j as Real);
            let a = Point3::new(x, y, height(x, y));
            let b = Point3::new(x + 1.0, y, height(x + 1.0, y));
            let c = Point3::new(x + 1.0, y + 1.0, height(x + 1.0, y + 1.0));
            let d = Point3::new(x, y + 1.0, height(x, y + 1.0));
            part.push_triangle(a, b, c);
            part.push_triangle(a, c, d);
        }
    }
    IndexedMesh::from_parts(vec![part])
}

pub fn main() -> quantized_bvh::Result<()> {
    env_logger::init();

    let shape = BvhTriangleMeshShape::new(terrain(256), true)?;
    let bvh = shape.bvh();
    println!(
        "{} nodes, {} subtree headers, bounds {}",
        bvh.node_count(),
        bvh.subtree_headers().len(),
        shape.local_aabb()
    );

    let query = Aabb::with_bounds(Point3::new(10.2, 10.2, -2.0), Point3::new(12.8, 11.8, 2.0));
    let mut count = 0;
    let stats = shape.process_all_triangles(&query, |_, _| count += 1);
    println!("box query: {count} triangles, {stats:?}");

    let source = Point3::new(100.5, 100.25, 10.0);
    let target = Point3::new(100.5, 100.25, -10.0);
    if let Some((id, t)) = shape.closest_ray_hit(&source, &target) {
        println!("ray hit {id:?} at {:.3}", source.z + (target.z - source.z) * t);
    }

    let half = Vector3::new(0.5, 0.5, 0.5);
    let mut swept = 0;
    shape.perform_convexcast(
        &Point3::new(50.0, 50.0, 5.0),
        &Point3::new(60.0, 50.0, 5.0),
        &-half,
        &half,
        |_, _| swept += 1,
    );
    println!("box cast above the terrain: {swept} triangles");

    let image = bvh.serialize_to_vec(false)?;
    let reloaded = OptimizedBvh::deserialize_owned(&image, false)?;
    let mut reloaded_count = 0;
    reloaded.traverse_aabb(&query, |_| reloaded_count += 1);
    println!("{} byte image, reloaded tree finds {reloaded_count}", image.len());
    Ok(())
}
