use glam::{vec3, Mat3A, Vec2, Vec3};

use crate::bvh::{Blas, BlasNode, Tlas, TlasLeaf, TlasNode};
use crate::utils::BoundingBox;
use crate::{GeometryData, Ray, TraceStats};

/// A packet of coherent rays: one shared origin, a chief direction, and two
/// differential basis directions spanning the packet's angular extent; each
/// ray is the chief nudged by its own offset along `dx`/`dy`.
///
/// Per-ray best hits accumulate inside the group, so one packet can be
/// traced against several structures in a row.
#[derive(Clone, Debug)]
pub struct RayGroup {
    origin: Vec3,
    chief: Vec3,
    dx: Vec3,
    dy: Vec3,
    offsets: Vec<Vec2>,
    dir_scales: Vec<f32>,
    hits: Vec<GroupHit>,
    corner_offsets: [Vec2; 4],
    tolerance: f32,
}

/// One packet-ray's running best hit; distances are Euclidean along that
/// ray's own direction.
#[derive(Clone, Copy, Debug)]
pub struct GroupHit {
    pub distance: f32,
    pub geometry_normal: Vec3,
    pub shading_normal: Vec3,
}

impl GroupHit {
    pub fn none() -> Self {
        Self {
            distance: f32::MAX,
            geometry_normal: Vec3::ZERO,
            shading_normal: Vec3::ZERO,
        }
    }

    pub fn is_some(&self) -> bool {
        self.distance < f32::MAX
    }

    pub fn is_none(&self) -> bool {
        !self.is_some()
    }
}

impl RayGroup {
    /// `tolerance` controls when the per-triangle responses across the
    /// packet are considered flat enough to extrapolate linearly instead
    /// of testing every ray on its own.
    pub fn new(
        origin: Vec3,
        chief: Vec3,
        dx: Vec3,
        dy: Vec3,
        offsets: Vec<Vec2>,
        tolerance: f32,
    ) -> Self {
        let chief = chief.normalize();

        // The beam's corner offsets always enclose the chief ray itself
        let mut lo = Vec2::ZERO;
        let mut hi = Vec2::ZERO;

        for offset in &offsets {
            lo = lo.min(*offset);
            hi = hi.max(*offset);
        }

        let dir_scales = offsets
            .iter()
            .map(|offset| (chief + offset.x * dx + offset.y * dy).length())
            .collect();

        let hits = vec![GroupHit::none(); offsets.len()];

        Self {
            origin,
            chief,
            dx,
            dy,
            offsets,
            dir_scales,
            hits,
            corner_offsets: [
                lo,
                Vec2::new(hi.x, lo.y),
                hi,
                Vec2::new(lo.x, hi.y),
            ],
            tolerance,
        }
    }

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    pub fn chief(&self) -> Vec3 {
        self.chief
    }

    pub fn offsets(&self) -> &[Vec2] {
        &self.offsets
    }

    pub fn hits(&self) -> &[GroupHit] {
        &self.hits
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Re-arms every ray for a fresh query.
    pub fn reset(&mut self) {
        self.hits.fill(GroupHit::none());
    }

    fn frame(&self) -> GroupFrame {
        GroupFrame {
            origin: self.origin,
            chief: self.chief,
            dx: self.dx,
            dy: self.dy,
            corners: self.corner_offsets.map(|offset| {
                self.chief + offset.x * self.dx + offset.y * self.dy
            }),
        }
    }
}

impl Tlas {
    /// Traces the whole packet through the scene, refining each ray's
    /// running best hit.
    pub fn trace_packet(&self, group: &mut RayGroup) -> TraceStats {
        let mut stats = TraceStats::default();

        if group.is_empty() {
            return stats;
        }

        if let Some(root) = self.root() {
            let frame = group.frame();

            trace_packet_tlas(root, &frame, group, &mut stats);
        }

        stats
    }
}

impl Blas {
    /// Object-local counterpart of [`Tlas::trace_packet`].
    pub fn trace_packet(&self, group: &mut RayGroup) -> TraceStats {
        let mut stats = TraceStats::default();

        if group.is_empty() {
            return stats;
        }

        let frame = group.frame();

        trace_packet_blas(
            self.root(),
            self.geometry(),
            &frame,
            Mat3A::IDENTITY,
            group,
            &mut stats,
        );

        stats
    }
}

/// The packet in some space: apex, chief and differential directions, plus
/// the four beam-corner directions used for whole-packet rejection.
#[derive(Clone, Copy, Debug)]
struct GroupFrame {
    origin: Vec3,
    chief: Vec3,
    dx: Vec3,
    dy: Vec3,
    corners: [Vec3; 4],
}

impl GroupFrame {
    fn with_transform(&self, transform: &glam::Affine3A) -> Self {
        Self {
            origin: transform.transform_point3(self.origin),
            chief: transform.transform_vector3(self.chief),
            dx: transform.transform_vector3(self.dx),
            dy: transform.transform_vector3(self.dy),
            corners: self
                .corners
                .map(|corner| transform.transform_vector3(corner)),
        }
    }

    fn direction(&self, offset: Vec2) -> Vec3 {
        self.chief + offset.x * self.dx + offset.y * self.dy
    }
}

fn trace_packet_tlas(
    node: &TlasNode,
    frame: &GroupFrame,
    group: &mut RayGroup,
    stats: &mut TraceStats,
) {
    stats.nodes_visited += 1;

    if !beam_hits_bounds(frame, node.bounds()) {
        return;
    }

    match node {
        TlasNode::Branch { left, right, .. } => {
            trace_packet_tlas(left, frame, group, stats);
            trace_packet_tlas(right, frame, group, stats);
        }

        TlasNode::Leaf(leaf) => {
            // The whole packet changes space at once; ray parameters are
            // affine-invariant, so the per-ray distances keep working
            let local = frame.with_transform(leaf.world_to_local());
            let normal_to_world = leaf.world_to_local().matrix3.transpose();

            trace_packet_blas(
                leaf.blas().root(),
                leaf.blas().geometry(),
                &local,
                normal_to_world,
                group,
                stats,
            );
        }
    }
}

fn trace_packet_blas(
    node: &BlasNode,
    geometry: &GeometryData,
    frame: &GroupFrame,
    normal_to_world: Mat3A,
    group: &mut RayGroup,
    stats: &mut TraceStats,
) {
    stats.nodes_visited += 1;

    if !beam_hits_bounds(frame, node.bounds()) {
        return;
    }

    match node {
        BlasNode::Branch { left, right, .. } => {
            trace_packet_blas(left, geometry, frame, normal_to_world, group, stats);
            trace_packet_blas(right, geometry, frame, normal_to_world, group, stats);
        }

        BlasNode::Leaf { start, len, .. } => {
            for slot in *start..(*start + *len) {
                intersect_triangle(
                    frame,
                    normal_to_world,
                    geometry,
                    slot,
                    group,
                    stats,
                );
            }
        }
    }
}

/// Whole-packet rejection: the beam is the convex hull of its four corner
/// rays, so a box lying fully outside any of the four side planes (or
/// fully behind the apex) cannot be hit by any ray of the packet.
fn beam_hits_bounds(frame: &GroupFrame, bounds: BoundingBox) -> bool {
    if !bounds.is_set() {
        return false;
    }

    let min = bounds.min();
    let max = bounds.max();

    let corners: [Vec3; 8] = std::array::from_fn(|i| {
        vec3(
            if i & 1 > 0 { max.x } else { min.x },
            if i & 2 > 0 { max.y } else { min.y },
            if i & 4 > 0 { max.z } else { min.z },
        ) - frame.origin
    });

    if corners.iter().all(|corner| frame.chief.dot(*corner) < 0.0) {
        return false;
    }

    let mut culled = false;

    for i in 0..4 {
        let normal = frame.corners[i].cross(frame.corners[(i + 1) % 4]);

        // Parallel corner rays span no plane
        if normal.length_squared() < 1e-12 {
            continue;
        }

        culled = true;

        let normal = if normal.dot(frame.chief) < 0.0 {
            -normal
        } else {
            normal
        };

        if corners.iter().all(|corner| normal.dot(*corner) < 0.0) {
            return false;
        }
    }

    if !culled {
        // Zero-spread packet: an ordinary slab test on the chief ray
        return Ray::new(frame.origin, frame.chief)
            .distance_to_node(bounds.min(), bounds.max())
            < f32::MAX;
    }

    true
}

fn intersect_triangle(
    frame: &GroupFrame,
    normal_to_world: Mat3A,
    geometry: &GeometryData,
    slot: u32,
    group: &mut RayGroup,
    stats: &mut TraceStats,
) {
    stats.triangles_tested += 1;

    let [a, b, c] = geometry.triangle_positions(slot);
    let [na, nb, nc] = geometry.triangle_normals(slot);
    let normal = (b - a).cross(c - a);

    // Plane responses at the four packet corners: chief, chief+dx,
    // chief+dy, chief+dx+dy (linear combinations, not renormalized)
    let response = [
        normal.dot(frame.chief),
        normal.dot(frame.chief + frame.dx),
        normal.dot(frame.chief + frame.dy),
        normal.dot(frame.chief + frame.dx + frame.dy),
    ];

    let lowest = response.iter().copied().fold(f32::MAX, f32::min);
    let highest = response.iter().copied().fold(f32::MIN, f32::max);

    // Signed double-area terms of `p` against the triangle's edges; all
    // three non-negative means `p` lies inside
    let edges = |p: Vec3| {
        vec3(
            (c - b).cross(p - b).dot(normal),
            (a - c).cross(p - c).dot(normal),
            (b - a).cross(p - a).dot(normal),
        )
    };

    let offset_to_apex = normal.dot(a - frame.origin);

    let RayGroup {
        offsets,
        dir_scales,
        hits,
        tolerance,
        ..
    } = group;

    if highest < 0.0 && (highest - lowest) <= *tolerance * (-lowest) {
        // The plane faces the whole packet and the responses are nearly
        // flat, so hit parameters and edge terms extrapolate linearly from
        // three evaluations: chief, chief+dx, chief+dy
        if offset_to_apex >= 0.0 {
            return;
        }

        let t0 = offset_to_apex / response[0];
        let tdx = offset_to_apex / response[1];
        let tdy = offset_to_apex / response[2];

        let e0 = edges(frame.origin + t0 * frame.chief);
        let edx = edges(frame.origin + tdx * (frame.chief + frame.dx));
        let edy = edges(frame.origin + tdy * (frame.chief + frame.dy));

        for (ray, offset) in offsets.iter().enumerate() {
            let t = t0 + offset.x * (tdx - t0) + offset.y * (tdy - t0);

            if t <= 0.0 {
                continue;
            }

            let distance = t * dir_scales[ray];
            let best = &mut hits[ray];

            if distance >= best.distance {
                continue;
            }

            let e = e0 + offset.x * (edx - e0) + offset.y * (edy - e0);

            if e.x < 0.0 || e.y < 0.0 || e.z < 0.0 {
                continue;
            }

            let sum = e.x + e.y + e.z;

            if sum <= 0.0 {
                continue;
            }

            let bary = e / sum;

            best.distance = distance;
            best.geometry_normal =
                normal_to_world.mul_vec3(normal).normalize();
            best.shading_normal = normal_to_world
                .mul_vec3(bary.x * na + bary.y * nb + bary.z * nc);
        }
    } else {
        // Edge-on triangle or a packet nearing a silhouette: reconstruct
        // and test every ray on its own
        for (ray, offset) in offsets.iter().enumerate() {
            let direction = frame.direction(*offset);
            let response = normal.dot(direction);

            if response >= 0.0 {
                continue;
            }

            let t = offset_to_apex / response;

            if t <= 0.0 {
                continue;
            }

            let distance = t * dir_scales[ray];
            let best = &mut hits[ray];

            if distance >= best.distance {
                continue;
            }

            let e = edges(frame.origin + t * direction);

            if e.x < 0.0 || e.y < 0.0 || e.z < 0.0 {
                continue;
            }

            let sum = e.x + e.y + e.z;

            if sum <= 0.0 {
                continue;
            }

            let bary = e / sum;

            best.distance = distance;
            best.geometry_normal =
                normal_to_world.mul_vec3(normal).normalize();
            best.shading_normal = normal_to_world
                .mul_vec3(bary.x * na + bary.y * nb + bary.z * nc);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use approx::assert_relative_eq;
    use glam::{vec2, Affine3A};

    use crate::tests::triangle_mesh;
    use crate::{SplitMethod, TlasLeaf};

    use super::*;

    fn floor_blas(size: f32) -> Blas {
        let mesh = triangle_mesh(
            [
                vec3(-size, -size, 0.0),
                vec3(size, -size, 0.0),
                vec3(0.0, size, 0.0),
            ],
            Vec3::Z,
        );

        Blas::of_mesh(&mesh, SplitMethod::Middle, 4)
            .unwrap()
            .unwrap()
    }

    fn packet_offsets() -> Vec<Vec2> {
        let mut offsets = Vec::new();

        for y in -1..=1 {
            for x in -1..=1 {
                offsets.push(vec2(x as f32, y as f32));
            }
        }

        offsets
    }

    #[test]
    fn degenerate_packet_matches_single_ray() {
        let target = floor_blas(4.0);

        let mut group = RayGroup::new(
            vec3(0.2, 0.2, 1.0),
            vec3(0.0, 0.0, -1.0),
            Vec3::ZERO,
            Vec3::ZERO,
            vec![Vec2::ZERO],
            1e-3,
        );

        target.trace_packet(&mut group);

        let (hit, _) = target
            .trace_nearest(Ray::new(vec3(0.2, 0.2, 1.0), vec3(0.0, 0.0, -1.0)));

        assert!(group.hits()[0].is_some());
        assert_relative_eq!(
            group.hits()[0].distance,
            hit.distance,
            epsilon = 1e-6,
        );
    }

    #[test]
    fn extrapolation_matches_per_ray_tracing() {
        let target = floor_blas(8.0);

        let origin = vec3(0.3, -0.4, 2.0);
        let chief = vec3(0.0, 0.0, -1.0);
        let dx = vec3(0.01, 0.0, 0.0);
        let dy = vec3(0.0, 0.01, 0.0);

        let mut group = RayGroup::new(
            origin,
            chief,
            dx,
            dy,
            packet_offsets(),
            0.5,
        );

        target.trace_packet(&mut group);

        for (hit, offset) in group.hits().iter().zip(group.offsets()) {
            let direction =
                (chief + offset.x * dx + offset.y * dy).normalize();

            let (expected, _) =
                target.trace_nearest(Ray::new(origin, direction));

            assert!(hit.is_some());
            assert_relative_eq!(
                hit.distance,
                expected.distance,
                epsilon = 1e-4,
            );
        }
    }

    #[test]
    fn silhouette_fallback_matches_per_ray_tracing() {
        // A tilted triangle spreads the plane responses, and the tight
        // tolerance forces the exact path
        let mesh = triangle_mesh(
            [
                vec3(-4.0, -4.0, 0.0),
                vec3(4.0, -4.0, 2.0),
                vec3(0.0, 4.0, 1.0),
            ],
            Vec3::Z,
        );

        let target = Blas::of_mesh(&mesh, SplitMethod::Middle, 4)
            .unwrap()
            .unwrap();

        let origin = vec3(0.0, 0.0, 5.0);
        let chief = vec3(0.0, 0.0, -1.0);
        let dx = vec3(0.05, 0.0, 0.0);
        let dy = vec3(0.0, 0.05, 0.0);

        let mut group =
            RayGroup::new(origin, chief, dx, dy, packet_offsets(), 1e-6);

        target.trace_packet(&mut group);

        for (hit, offset) in group.hits().iter().zip(group.offsets()) {
            let direction =
                (chief + offset.x * dx + offset.y * dy).normalize();

            let (expected, _) =
                target.trace_nearest(Ray::new(origin, direction));

            assert_eq!(hit.is_some(), expected.is_some());

            if hit.is_some() {
                assert_relative_eq!(
                    hit.distance,
                    expected.distance,
                    epsilon = 1e-4,
                );
            }
        }
    }

    #[test]
    fn rays_outside_the_triangle_stay_misses() {
        let target = floor_blas(0.5);

        // Corner rays fan far out and miss the small triangle
        let mut group = RayGroup::new(
            vec3(0.0, 0.0, 1.0),
            vec3(0.0, 0.0, -1.0),
            vec3(4.0, 0.0, 0.0),
            vec3(0.0, 4.0, 0.0),
            packet_offsets(),
            1e-3,
        );

        target.trace_packet(&mut group);

        let hit_count = group
            .hits()
            .iter()
            .filter(|hit| hit.is_some())
            .count();

        // Only the chief ray (offset 0,0) lands inside
        assert_eq!(1, hit_count);
    }

    #[test]
    fn traces_through_instances() {
        let blas = Arc::new(floor_blas(4.0));
        let bounds = blas.root().bounds();

        let tlas = crate::Tlas::build(
            vec![TlasLeaf::new(
                blas.clone(),
                bounds,
                Affine3A::from_scale_rotation_translation(
                    Vec3::splat(2.0),
                    glam::Quat::IDENTITY,
                    vec3(0.0, 0.0, -1.0),
                ),
            )],
            SplitMethod::Middle,
        )
        .unwrap();

        let mut group = RayGroup::new(
            vec3(0.2, 0.2, 1.0),
            vec3(0.0, 0.0, -1.0),
            vec3(0.02, 0.0, 0.0),
            vec3(0.0, 0.02, 0.0),
            packet_offsets(),
            0.5,
        );

        tlas.trace_packet(&mut group);

        for (hit, offset) in group.hits().iter().zip(group.offsets()) {
            let direction = (vec3(0.0, 0.0, -1.0)
                + offset.x * vec3(0.02, 0.0, 0.0)
                + offset.y * vec3(0.0, 0.02, 0.0))
            .normalize();

            let (expected, _) =
                tlas.trace_nearest(Ray::new(vec3(0.2, 0.2, 1.0), direction));

            assert!(hit.is_some());
            assert_relative_eq!(
                hit.distance,
                expected.distance,
                epsilon = 1e-4,
            );
        }
    }
}
