use glam::Vec3;

/// Result of a ray query.
///
/// `distance` starts out at the caller's bound and only ever decreases, so
/// a fresh record doubles as the early-reject bound during traversal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hit {
    pub distance: f32,

    /// Normalized triangle-plane normal, `(b - a) × (c - a)` winding.
    pub geometry_normal: Vec3,

    /// Barycentric blend of the three vertex normals; intentionally left
    /// unnormalized - callers that need a unit vector renormalize it
    /// themselves.
    pub shading_normal: Vec3,

    /// Per-vertex weights, summing to one.
    pub barycentric: Vec3,

    /// Slot of the hit triangle within its (build-reordered) buffer.
    pub triangle: u32,
}

impl Hit {
    pub fn none() -> Self {
        Self {
            distance: f32::MAX,
            geometry_normal: Vec3::ZERO,
            shading_normal: Vec3::ZERO,
            barycentric: Vec3::ZERO,
            triangle: u32::MAX,
        }
    }

    pub fn is_some(&self) -> bool {
        self.distance < f32::MAX
    }

    pub fn is_none(&self) -> bool {
        !self.is_some()
    }
}

impl Default for Hit {
    fn default() -> Self {
        Self::none()
    }
}

/// Traversal work counters, accumulated across one query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TraceStats {
    pub nodes_visited: u32,
    pub triangles_tested: u32,
}
