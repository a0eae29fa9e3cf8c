use glam::{Vec3, Vec4Swizzles};

use crate::{
    BvhView, Hit, Instance, InstancesView, TraceStats, TrianglesView,
    BVH_STACK_SIZE, LEAF_TAG, MAX_TRAVERSAL_STEPS,
};

#[derive(Copy, Clone, Debug, Default)]
pub struct Ray {
    origin: Vec3,
    direction: Vec3,
    inv_direction: Vec3,
}

impl Ray {
    /// `direction` is expected to be normalized; distances are measured
    /// along it.
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction,
            inv_direction: 1.0 / direction,
        }
    }

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    pub fn direction(&self) -> Vec3 {
        self.direction
    }

    /// Traces this ray through the flattened scene and returns its nearest
    /// hit.
    pub fn trace_nearest(
        self,
        bvh: BvhView,
        triangles: TrianglesView,
        instances: InstancesView,
    ) -> (Hit, TraceStats) {
        let mut hit = Hit::none();
        let mut stats = TraceStats::default();

        self.trace(
            bvh,
            triangles,
            instances,
            TracingMode::Nearest,
            &mut hit,
            &mut stats,
        );

        (hit, stats)
    }

    /// Traces this ray and returns whether it hits anything up to the given
    /// distance.
    ///
    /// The answer comes from the first triangle found in traversal order,
    /// not from the nearest one.
    pub fn trace_any(
        self,
        bvh: BvhView,
        triangles: TrianglesView,
        instances: InstancesView,
        max_distance: f32,
    ) -> (bool, TraceStats) {
        let mut hit = Hit {
            distance: max_distance,
            ..Hit::none()
        };

        let mut stats = TraceStats::default();

        self.trace(
            bvh,
            triangles,
            instances,
            TracingMode::Any,
            &mut hit,
            &mut stats,
        );

        (hit.distance < max_distance, stats)
    }

    /// Walks the TLAS portion of the node buffer with an explicit stack;
    /// leaves hand over to [`Self::trace_blas`].
    fn trace(
        self,
        bvh: BvhView,
        triangles: TrianglesView,
        instances: InstancesView,
        mode: TracingMode,
        hit: &mut Hit,
        stats: &mut TraceStats,
    ) {
        let mut stack = [0; BVH_STACK_SIZE];
        let mut stack_ptr = 0;
        let mut ptr = 0;
        let mut steps = 0;

        loop {
            steps += 1;

            if steps > MAX_TRAVERSAL_STEPS {
                break;
            }

            stats.nodes_visited += 1;

            let [d0, d1] = bvh.get(ptr);
            let tag = d0.w.to_bits();

            if self.distance_to_node(d0.xyz(), d1.xyz()) < hit.distance {
                if tag < LEAF_TAG {
                    let left = d1.w.to_bits();
                    let goes_left =
                        (self.direction[tag as usize] < 0.0) as u32;

                    if stack_ptr < BVH_STACK_SIZE {
                        stack[stack_ptr] = left + 1 - goes_left;
                        stack_ptr += 1;
                    }

                    ptr = left + goes_left;
                    continue;
                }

                let first = d1.w.to_bits();
                let mut found = false;

                for id in first..(first + tag - LEAF_TAG) {
                    found |= self.trace_blas(
                        instances.get(id),
                        bvh,
                        triangles,
                        mode,
                        hit,
                        stats,
                    );
                }

                if found && mode == TracingMode::Any {
                    break;
                }
            }

            if stack_ptr > 0 {
                stack_ptr -= 1;
                ptr = stack[stack_ptr];
            } else {
                break;
            }
        }
    }

    /// Re-casts the ray into the instance's local space and walks the
    /// pointed-at BLAS; a hit gets carried back into world space and is
    /// accepted only if it still beats the world-space best.
    fn trace_blas(
        self,
        instance: Instance,
        bvh: BvhView,
        triangles: TrianglesView,
        mode: TracingMode,
        hit: &mut Hit,
        stats: &mut TraceStats,
    ) -> bool {
        let origin = instance.transform_point(self.origin);
        let direction = instance.transform_vector(self.direction);
        let scale = direction.length();

        if scale == 0.0 {
            return false;
        }

        let ray = Ray::new(origin, direction / scale);

        // The local direction got renormalized, so the bound travels into
        // local space rescaled as well.
        let bound = hit.distance * scale;

        let mut local_hit = Hit {
            distance: bound,
            ..Hit::none()
        };

        let mut stack = [0; BVH_STACK_SIZE];
        let mut stack_ptr = 0;
        let mut ptr = instance.blas_ptr();
        let mut steps = 0;

        'walk: loop {
            steps += 1;

            if steps > MAX_TRAVERSAL_STEPS {
                break;
            }

            stats.nodes_visited += 1;

            let [d0, d1] = bvh.get(ptr);
            let tag = d0.w.to_bits();

            if ray.distance_to_node(d0.xyz(), d1.xyz()) < local_hit.distance
            {
                if tag < LEAF_TAG {
                    let left = d1.w.to_bits();
                    let goes_left =
                        (ray.direction[tag as usize] < 0.0) as u32;

                    if stack_ptr < BVH_STACK_SIZE {
                        stack[stack_ptr] = left + 1 - goes_left;
                        stack_ptr += 1;
                    }

                    ptr = left + goes_left;
                    continue;
                }

                let first = d1.w.to_bits();

                for id in first..(first + tag - LEAF_TAG) {
                    stats.triangles_tested += 1;

                    if triangles.get(id).hit(ray, &mut local_hit) {
                        local_hit.triangle = id;

                        if let TracingMode::Any = mode {
                            break 'walk;
                        }
                    }
                }
            }

            if stack_ptr > 0 {
                stack_ptr -= 1;
                ptr = stack[stack_ptr];
            } else {
                break;
            }
        }

        if local_hit.distance >= bound {
            return false;
        }

        let distance = local_hit.distance / scale;

        // The double transform can nudge the result past the current best;
        // such hits are dropped.
        if distance >= hit.distance {
            return false;
        }

        hit.distance = distance;
        hit.geometry_normal = instance
            .transform_normal(local_hit.geometry_normal)
            .normalize();
        hit.shading_normal =
            instance.transform_normal(local_hit.shading_normal);
        hit.barycentric = local_hit.barycentric;
        hit.triangle = local_hit.triangle;

        true
    }

    /// Slab test; returns the entry distance, or `f32::MAX` on a miss.
    pub fn distance_to_node(self, aabb_min: Vec3, aabb_max: Vec3) -> f32 {
        let hit_min = (aabb_min - self.origin) * self.inv_direction;
        let hit_max = (aabb_max - self.origin) * self.inv_direction;

        let tmin = hit_min.min(hit_max).max_element();
        let tmax = hit_min.max(hit_max).min_element();

        if tmax >= tmin && tmax >= 0.0 {
            tmin
        } else {
            f32::MAX
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum TracingMode {
    Nearest,
    Any,
}
