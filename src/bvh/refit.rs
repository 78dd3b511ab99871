//! Bounds refresh after the triangles of the source moved, keeping the topology.

use crate::aabb::Aabb;
use crate::bvh::{BvhNode, NodeArray, OptimizedBvh, SubtreeHeader};
use crate::mesh::TriangleSource;
use crate::quantization::Quantizer;

impl OptimizedBvh<'_> {
    /// Recomputes all bounds from the current triangle positions of `source`.
    ///
    /// The quantization domain is reset to the bounds of `source` plus the margin the tree
    /// was built with. `source` must have the same triangles as at build time.
    pub fn refit<S: TriangleSource>(&mut self, source: &S) {
        self.refit_with_domain(source, &source.bounding_box());
    }

    /// Like [`OptimizedBvh::refit`], but quantizes against `domain` plus the margin.
    pub fn refit_with_domain<S: TriangleSource>(&mut self, source: &S, domain: &Aabb) {
        self.quantizer.set_domain(domain, self.margin);
        match &mut self.nodes {
            NodeArray::Quantized(nodes) => {
                let count = nodes.len();
                update_nodes(nodes, 0, count, source, &self.quantizer);
                for header in self.subtree_headers.iter_mut() {
                    header.set_aabb_from_root(&nodes[header.root_node_index()]);
                }
            }
            NodeArray::Float(nodes) => {
                let count = nodes.len();
                update_nodes(nodes, 0, count, source, &self.quantizer);
            }
        }
        self.write_image_header();
        log::debug!(
            "Refit {} nodes against domain {}",
            self.nodes.len(),
            self.quantizer.domain()
        );
    }

    /// Refreshes only the subtrees whose header overlaps `region`, plus the nodes above them.
    ///
    /// The domain is kept, so the triangles that moved must stay inside it. Parts of
    /// `region` outside the domain are clamped onto its boundary. Trees without quantization
    /// have no headers and are refit completely against their current domain.
    pub fn refit_partial<S: TriangleSource>(&mut self, source: &S, region: &Aabb) {
        let domain = self.quantizer.domain();
        match &mut self.nodes {
            NodeArray::Quantized(nodes) => {
                if !domain.contains_aabb(region) {
                    log::warn!(
                        "Partial refit region {} exceeds the quantization domain {}, \
                         bounds outside it are clamped",
                        region,
                        domain
                    );
                }
                let query = self.quantizer.quantize_aabb(region);
                let mut refreshed = 0;
                for header in self.subtree_headers.iter_mut() {
                    if !header.aabb.overlaps(&query) {
                        continue;
                    }
                    let range = header.node_range();
                    update_nodes(nodes, range.start, range.end, source, &self.quantizer);
                    header.set_aabb_from_root(&nodes[range.start]);
                    refreshed += 1;
                }
                if refreshed > 0 {
                    update_nodes_above_headers(nodes, &self.subtree_headers);
                }
                log::debug!(
                    "Partial refit of {} of {} subtrees",
                    refreshed,
                    self.subtree_headers.len()
                );
            }
            NodeArray::Float(nodes) => {
                let count = nodes.len();
                update_nodes(nodes, 0, count, source, &self.quantizer);
            }
        }
    }
}

/// Recomputes the bounds of `nodes[first..end]` from the back, so children are refreshed
/// before their parents. The range must cover complete subtrees.
fn update_nodes<N: BvhNode, S: TriangleSource>(
    nodes: &mut [N],
    first: usize,
    end: usize,
    source: &S,
    quantizer: &Quantizer,
) {
    for index in (first..end).rev() {
        if nodes[index].is_leaf() {
            let vertices = source.triangle(nodes[index].triangle_id());
            nodes[index].set_leaf_bounds(&Aabb::from_points(&vertices), quantizer);
        } else {
            update_inner_node(nodes, index);
        }
    }
}

#[inline]
fn update_inner_node<N: BvhNode>(nodes: &mut [N], index: usize) {
    debug_assert!(!nodes[index].is_leaf(), "node {index} is a leaf");
    let left = index + 1;
    let right = left + nodes[left].subtree_size();
    let mut node = nodes[index];
    node.clear_bounds();
    node.join_bounds(&nodes[left]);
    node.join_bounds(&nodes[right]);
    nodes[index] = node;
}

/// Recomputes the inner nodes that lie outside every header subtree.
///
/// Header subtrees are disjoint and every node outside them is an ancestor of some header
/// root, so walking the gaps between them from the back refreshes children first.
fn update_nodes_above_headers<N: BvhNode>(nodes: &mut [N], headers: &[SubtreeHeader]) {
    let mut ranges: Vec<_> = headers.iter().map(|header| header.node_range()).collect();
    ranges.sort_unstable_by_key(|range| range.start);

    let mut end = nodes.len();
    for range in ranges.iter().rev() {
        for index in (range.end..end).rev() {
            update_inner_node(nodes, index);
        }
        end = range.start;
    }
    for index in (0..end).rev() {
        update_inner_node(nodes, index);
    }
}

#[cfg(test)]
mod tests {
    use crate::aabb::Aabb;
    use crate::bvh::{BuildOptions, OptimizedBvh};
    use crate::mesh::{IndexedMesh, TriangleId, TriangleSource};
    use crate::testbase::{brute_force_overlaps, init_logger, random_mesh, sorted};
    use crate::{Point3, Vector3};

    fn small_subtrees() -> BuildOptions {
        BuildOptions {
            max_subtree_size_in_bytes: 256,
            ..BuildOptions::default()
        }
    }

    fn five_triangles() -> IndexedMesh {
        let triangles: Vec<_> = (0..5)
            .map(|i| {
                let x = i as crate::Real * 2.0;
                [
                    Point3::new(x, 0.0, 0.0),
                    Point3::new(x + 1.0, 0.0, 0.0),
                    Point3::new(x, 1.0, 0.0),
                ]
            })
            .collect();
        IndexedMesh::from_triangles(&triangles)
    }

    #[test]
    /// Refitting an unchanged source leaves the tree untouched.
    fn test_refit_is_idempotent() {
        let mesh = random_mesh(500, 21);
        for use_quantization in [true, false] {
            let mut bvh = OptimizedBvh::build(&mesh, use_quantization).unwrap();
            let before = bvh.serialize_to_vec(false).unwrap();
            bvh.refit(&mesh);
            bvh.assert_consistent();
            assert_eq!(before, bvh.serialize_to_vec(false).unwrap());
        }
    }

    #[test]
    /// A moved triangle is found at its new position after a full refit, and the domain
    /// follows the source.
    fn test_refit_follows_moved_triangle() {
        let mut mesh = random_mesh(200, 22);
        for use_quantization in [true, false] {
            let mut bvh = OptimizedBvh::build(&mesh, use_quantization).unwrap();
            mesh.translate_triangle(TriangleId::new(0, 17), &Vector3::new(40.0, 0.0, 0.0));
            bvh.refit(&mesh);
            bvh.assert_consistent();
            assert!(bvh.quantizer().domain().contains_aabb(&mesh.bounding_box()));

            let far = Aabb::with_bounds(Point3::new(30.0, -10.0, -10.0), Point3::new(60.0, 10.0, 10.0));
            let mut hits = Vec::new();
            bvh.traverse_aabb(&far, |id| hits.push(id));
            assert_eq!(hits, vec![TriangleId::new(0, 17)]);

            mesh.translate_triangle(TriangleId::new(0, 17), &Vector3::new(-40.0, 0.0, 0.0));
        }
    }

    #[test]
    /// Moving one of five triangles inside the domain and refitting a region around its
    /// old and new position keeps the tree consistent and finds it at the new position.
    fn test_partial_refit_five_triangles() {
        init_logger();
        let mut mesh = five_triangles();
        let mut bvh = OptimizedBvh::build(&mesh, true).unwrap();
        let id = TriangleId::new(0, 2);

        mesh.translate_triangle(id, &Vector3::new(0.0, 0.0, 0.5));
        let region = Aabb::with_bounds(Point3::new(3.5, -0.5, -0.5), Point3::new(5.5, 1.5, 1.0));
        bvh.refit_partial(&mesh, &region);
        bvh.assert_consistent();

        let query = Aabb::with_bounds(Point3::new(4.2, 0.2, 0.45), Point3::new(4.4, 0.4, 0.55));
        let mut hits = Vec::new();
        bvh.traverse_aabb(&query, |hit| hits.push(hit));
        assert_eq!(hits, vec![id]);

        let old_position = Aabb::with_bounds(Point3::new(4.2, 0.2, -0.01), Point3::new(4.4, 0.4, 0.01));
        let mut hits = Vec::new();
        bvh.traverse_aabb(&old_position, |hit| hits.push(hit));
        assert!(hits.is_empty());
    }

    #[test]
    /// With many subtrees, a partial refit refreshes the touched ones and their ancestors.
    fn test_partial_refit_many_subtrees() {
        let mut mesh = random_mesh(1000, 23);
        let mut bvh = OptimizedBvh::build_with_options(&mesh, &small_subtrees()).unwrap();
        assert!(bvh.subtree_headers().len() > 4);

        let id = TriangleId::new(0, 123);
        let before = Aabb::from_points(&mesh.triangle(id));
        let offset = Vector3::new(0.3, -0.2, 0.1);
        mesh.translate_triangle(id, &offset);
        let after = Aabb::from_points(&mesh.triangle(id));
        bvh.refit_partial(&mesh, &before.join(&after));
        bvh.assert_consistent();

        let mut hits = Vec::new();
        bvh.traverse_aabb_cache_friendly(&after, |hit| hits.push(hit));
        assert!(hits.contains(&id));
        for expected in brute_force_overlaps(&mesh, &after) {
            assert!(hits.contains(&expected));
        }
    }

    #[test]
    /// Full precision trees refit completely on a partial request.
    fn test_partial_refit_float() {
        let mut mesh = random_mesh(100, 24);
        let mut bvh = OptimizedBvh::build(&mesh, false).unwrap();
        mesh.translate_triangle(TriangleId::new(0, 3), &Vector3::new(0.0, 0.1, 0.0));
        let region = Aabb::with_bounds(Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0));
        bvh.refit_partial(&mesh, &region);
        bvh.assert_consistent();

        let query = Aabb::with_bounds(Point3::new(-3.0, -3.0, -3.0), Point3::new(3.0, 3.0, 3.0));
        let mut hits = Vec::new();
        bvh.traverse_aabb(&query, |hit| hits.push(hit));
        assert_eq!(sorted(hits), brute_force_overlaps(&mesh, &query));
    }
}
