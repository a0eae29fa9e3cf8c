use crate::bvh::{Blas, BlasNode, Tlas, TlasLeaf, TlasNode};
use crate::{gpu, GeometryData, Hit, Ray, TraceStats};

impl Tlas {
    /// Traces `ray` through the scene and returns its nearest hit.
    pub fn trace_nearest(&self, ray: Ray) -> (Hit, TraceStats) {
        let mut hit = Hit::none();
        let mut stats = TraceStats::default();

        if let Some(root) = self.root() {
            trace_tlas(root, ray, TracingMode::Nearest, &mut hit, &mut stats);
        }

        (hit, stats)
    }

    /// Traces `ray` and returns whether it hits anything up to
    /// `max_distance`.
    ///
    /// The answer comes from the first triangle found in traversal order -
    /// not necessarily the nearest one under the bound. That ordering is
    /// part of the contract: occlusion probes only care *whether* something
    /// is in the way.
    pub fn trace_any(
        &self,
        ray: Ray,
        max_distance: f32,
    ) -> (bool, TraceStats) {
        let mut hit = Hit {
            distance: max_distance,
            ..Hit::none()
        };

        let mut stats = TraceStats::default();

        if let Some(root) = self.root() {
            trace_tlas(root, ray, TracingMode::Any, &mut hit, &mut stats);
        }

        (hit.distance < max_distance, stats)
    }
}

impl Blas {
    /// Traces `ray`, given in object-local space, against this mesh alone.
    pub fn trace_nearest(&self, ray: Ray) -> (Hit, TraceStats) {
        let mut hit = Hit::none();
        let mut stats = TraceStats::default();

        trace_blas(
            self.root(),
            self.geometry(),
            ray,
            TracingMode::Nearest,
            &mut hit,
            &mut stats,
        );

        (hit, stats)
    }

    /// Object-local counterpart of [`Tlas::trace_any`], with the same
    /// first-found-wins contract.
    pub fn trace_any(
        &self,
        ray: Ray,
        max_distance: f32,
    ) -> (bool, TraceStats) {
        let mut hit = Hit {
            distance: max_distance,
            ..Hit::none()
        };

        let mut stats = TraceStats::default();

        trace_blas(
            self.root(),
            self.geometry(),
            ray,
            TracingMode::Any,
            &mut hit,
            &mut stats,
        );

        (hit.distance < max_distance, stats)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum TracingMode {
    Nearest,
    Any,
}

fn trace_tlas(
    node: &TlasNode,
    ray: Ray,
    mode: TracingMode,
    hit: &mut Hit,
    stats: &mut TraceStats,
) -> bool {
    stats.nodes_visited += 1;

    let bounds = node.bounds();

    if ray.distance_to_node(bounds.min(), bounds.max()) >= hit.distance {
        return false;
    }

    match node {
        TlasNode::Branch {
            axis, left, right, ..
        } => {
            // The child on the ray's near side first: a hit there tightens
            // the distance bound and often prunes the far child entirely
            let (near, far) = if ray.direction()[*axis] < 0.0 {
                (right, left)
            } else {
                (left, right)
            };

            let found = trace_tlas(near, ray, mode, hit, stats);

            if found && mode == TracingMode::Any {
                return true;
            }

            trace_tlas(far, ray, mode, hit, stats) || found
        }

        TlasNode::Leaf(leaf) => trace_instance(leaf, ray, mode, hit, stats),
    }
}

/// Re-casts the ray into the instance's local space, traces the BLAS
/// there, and carries the result back; it only sticks if it still beats
/// the world-space best, since the double transform can wobble the
/// distance.
fn trace_instance(
    leaf: &TlasLeaf,
    ray: Ray,
    mode: TracingMode,
    hit: &mut Hit,
    stats: &mut TraceStats,
) -> bool {
    let origin = leaf.world_to_local().transform_point3(ray.origin());
    let direction = leaf.world_to_local().transform_vector3(ray.direction());
    let scale = direction.length();

    if scale == 0.0 {
        return false;
    }

    let local_ray = Ray::new(origin, direction / scale);

    // The local direction got renormalized, so the distance bound travels
    // into local space rescaled by the same factor
    let bound = hit.distance * scale;

    let mut local_hit = Hit {
        distance: bound,
        ..Hit::none()
    };

    trace_blas(
        leaf.blas().root(),
        leaf.blas().geometry(),
        local_ray,
        mode,
        &mut local_hit,
        stats,
    );

    if local_hit.distance >= bound {
        return false;
    }

    let distance = local_hit.distance / scale;

    if distance >= hit.distance {
        return false;
    }

    let normal_to_world = leaf.world_to_local().matrix3.transpose();

    hit.distance = distance;
    hit.geometry_normal =
        normal_to_world.mul_vec3(local_hit.geometry_normal).normalize();
    hit.shading_normal = normal_to_world.mul_vec3(local_hit.shading_normal);
    hit.barycentric = local_hit.barycentric;
    hit.triangle = local_hit.triangle;

    true
}

fn trace_blas(
    node: &BlasNode,
    geometry: &GeometryData,
    ray: Ray,
    mode: TracingMode,
    hit: &mut Hit,
    stats: &mut TraceStats,
) -> bool {
    stats.nodes_visited += 1;

    let bounds = node.bounds();

    if ray.distance_to_node(bounds.min(), bounds.max()) >= hit.distance {
        return false;
    }

    match node {
        BlasNode::Branch {
            axis, left, right, ..
        } => {
            let (near, far) = if ray.direction()[*axis] < 0.0 {
                (right, left)
            } else {
                (left, right)
            };

            let found = trace_blas(near, geometry, ray, mode, hit, stats);

            if found && mode == TracingMode::Any {
                return true;
            }

            trace_blas(far, geometry, ray, mode, hit, stats) || found
        }

        BlasNode::Leaf { start, len, .. } => {
            let mut found = false;

            for slot in *start..(*start + *len) {
                stats.triangles_tested += 1;

                let triangle = gpu::Triangle::new(
                    geometry.triangle_positions(slot),
                    geometry.triangle_normals(slot),
                );

                if triangle.hit(ray, hit) {
                    hit.triangle = slot;
                    found = true;

                    if mode == TracingMode::Any {
                        return true;
                    }
                }
            }

            found
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use approx::assert_relative_eq;
    use glam::{vec3, Affine3A, Quat, Vec3};

    use crate::tests::{grid_mesh, triangle_mesh};
    use crate::{Blas, SplitMethod, Tlas, TlasLeaf};

    use super::*;

    fn single_triangle_blas() -> Blas {
        let mesh = triangle_mesh(
            [
                vec3(0.0, 0.0, 0.0),
                vec3(1.0, 0.0, 0.0),
                vec3(0.0, 1.0, 0.0),
            ],
            Vec3::Z,
        );

        Blas::of_mesh(&mesh, SplitMethod::Middle, 4)
            .unwrap()
            .unwrap()
    }

    fn single_instance_tlas(blas: Blas, transform: Affine3A) -> Tlas {
        let blas = Arc::new(blas);
        let bounds = blas.root().bounds();

        Tlas::build(
            vec![TlasLeaf::new(blas, bounds, transform)],
            SplitMethod::Middle,
        )
        .unwrap()
    }

    #[test]
    fn analytic_hit() {
        let target = single_triangle_blas();
        let ray = Ray::new(vec3(0.2, 0.2, 1.0), vec3(0.0, 0.0, -1.0));
        let (hit, stats) = target.trace_nearest(ray);

        assert!(hit.is_some());
        assert_relative_eq!(hit.distance, 1.0);
        assert_relative_eq!(
            hit.barycentric.x + hit.barycentric.y + hit.barycentric.z,
            1.0,
        );
        assert_relative_eq!(hit.geometry_normal.z, 1.0);
        assert_relative_eq!(hit.geometry_normal.x, 0.0);
        assert_relative_eq!(hit.geometry_normal.y, 0.0);
        assert_eq!(0, hit.triangle);
        assert!(stats.nodes_visited > 0);
        assert!(stats.triangles_tested > 0);
    }

    #[test]
    fn back_face_misses() {
        let target = single_triangle_blas();
        let ray = Ray::new(vec3(0.2, 0.2, -1.0), vec3(0.0, 0.0, 1.0));
        let (hit, _) = target.trace_nearest(ray);

        assert!(hit.is_none());
    }

    #[test]
    fn parallel_ray_misses() {
        let target = single_triangle_blas();
        let ray = Ray::new(vec3(-1.0, 0.2, 0.0), vec3(1.0, 0.0, 0.0));
        let (hit, _) = target.trace_nearest(ray);

        assert!(hit.is_none());
    }

    #[test]
    fn nearest_beats_any() {
        // Two parallel triangles, one at z=0 and one at z=0.5; the ray
        // crosses both
        let mesh = crate::Mesh::default()
            .with_positions(vec![
                0.0, 0.0, 0.0, //
                1.0, 0.0, 0.0, //
                0.0, 1.0, 0.0, //
                0.0, 0.0, 0.5, //
                1.0, 0.0, 0.5, //
                0.0, 1.0, 0.5, //
            ])
            .with_normals(vec![
                0.0, 0.0, 1.0, //
                0.0, 0.0, 1.0, //
                0.0, 0.0, 1.0, //
                0.0, 0.0, 1.0, //
                0.0, 0.0, 1.0, //
                0.0, 0.0, 1.0, //
            ])
            .with_indices(vec![0, 1, 2, 3, 4, 5]);

        let target = Blas::of_mesh(&mesh, SplitMethod::Middle, 1)
            .unwrap()
            .unwrap();

        let ray = Ray::new(vec3(0.2, 0.2, 1.0), vec3(0.0, 0.0, -1.0));
        let (hit, _) = target.trace_nearest(ray);

        assert_relative_eq!(hit.distance, 0.5);

        let (found, _) = target.trace_any(ray, 2.0);
        assert!(found);

        let (found, _) = target.trace_any(ray, 0.4);
        assert!(!found);
    }

    #[test]
    fn traces_through_instances() {
        let tlas = single_instance_tlas(
            single_triangle_blas(),
            Affine3A::from_translation(vec3(10.0, 0.0, 0.0)),
        );

        let ray = Ray::new(vec3(10.2, 0.2, 1.0), vec3(0.0, 0.0, -1.0));
        let (hit, _) = tlas.trace_nearest(ray);

        assert!(hit.is_some());
        assert_relative_eq!(hit.distance, 1.0);

        let (miss, _) =
            tlas.trace_nearest(Ray::new(vec3(0.2, 0.2, 1.0), -Vec3::Z));

        assert!(miss.is_none());
    }

    #[test]
    fn rescales_distances_under_scaled_instances() {
        // The instance doubles the mesh; a ray from z=4 should hit the
        // plane z=0 after exactly four units of world-space travel
        let tlas = single_instance_tlas(
            single_triangle_blas(),
            Affine3A::from_scale(Vec3::splat(2.0)),
        );

        let ray = Ray::new(vec3(0.4, 0.4, 4.0), vec3(0.0, 0.0, -1.0));
        let (hit, _) = tlas.trace_nearest(ray);

        assert!(hit.is_some());
        assert_relative_eq!(hit.distance, 4.0);
        assert_relative_eq!(hit.geometry_normal.z, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn transforms_normals_through_rotation() {
        let rotation = Quat::from_rotation_x(std::f32::consts::FRAC_PI_2);
        let tlas = single_instance_tlas(
            single_triangle_blas(),
            Affine3A::from_rotation_translation(rotation, Vec3::ZERO),
        );

        // The triangle's plane now faces -y
        let ray = Ray::new(vec3(0.2, -1.0, 0.2), vec3(0.0, 1.0, 0.0));
        let (hit, _) = tlas.trace_nearest(ray);

        assert!(hit.is_some());
        assert_relative_eq!(hit.geometry_normal.y, -1.0, epsilon = 1e-6);
        assert_relative_eq!(hit.distance, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn picks_nearest_across_instances() {
        let blas = Arc::new(single_triangle_blas());
        let bounds = blas.root().bounds();

        let leaves = [2.0, 0.5, 1.0]
            .into_iter()
            .map(|z| {
                TlasLeaf::new(
                    blas.clone(),
                    bounds,
                    Affine3A::from_translation(vec3(0.0, 0.0, z)),
                )
            })
            .collect();

        let tlas = Tlas::build(leaves, SplitMethod::Middle).unwrap();
        let ray = Ray::new(vec3(0.2, 0.2, 5.0), vec3(0.0, 0.0, -1.0));
        let (hit, _) = tlas.trace_nearest(ray);

        assert_relative_eq!(hit.distance, 3.0);
    }

    #[test]
    fn prunes_against_grid() {
        let mesh = grid_mesh(16, 16);
        let target = Blas::of_mesh(&mesh, SplitMethod::Middle, 4)
            .unwrap()
            .unwrap();

        let ray = Ray::new(vec3(7.3, 9.6, 2.0), vec3(0.0, 0.0, -1.0));
        let (hit, stats) = target.trace_nearest(ray);

        assert!(hit.is_some());
        assert_relative_eq!(hit.distance, 2.0);

        // Pruning must skip most of the 512 triangles
        assert!(stats.triangles_tested < 64);
    }
}
