use bytemuck::{Pod, Zeroable};
use glam::{vec3, Affine3A, Vec3, Vec4, Vec4Swizzles};

/// One TLAS instance: the columns of its world-to-local transform plus the
/// pointer to its BLAS root node, packed into a spare lane.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Instance {
    pub d0: Vec4,
    pub d1: Vec4,
    pub d2: Vec4,
    pub d3: Vec4,
}

impl Instance {
    pub fn new(world_to_local: Affine3A, blas_ptr: u32) -> Self {
        let matrix = world_to_local.matrix3;

        Self {
            d0: Vec3::from(matrix.x_axis).extend(f32::from_bits(blas_ptr)),
            d1: Vec3::from(matrix.y_axis).extend(0.0),
            d2: Vec3::from(matrix.z_axis).extend(0.0),
            d3: Vec3::from(world_to_local.translation).extend(0.0),
        }
    }

    pub fn blas_ptr(&self) -> u32 {
        self.d0.w.to_bits()
    }

    /// Carries a world-space point into instance-local space.
    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.transform_vector(point) + self.d3.xyz()
    }

    /// Carries a world-space vector into instance-local space.
    pub fn transform_vector(&self, vector: Vec3) -> Vec3 {
        vector.x * self.d0.xyz()
            + vector.y * self.d1.xyz()
            + vector.z * self.d2.xyz()
    }

    /// Carries a local-space normal back into world space; the
    /// inverse-transpose of local-to-world is the transpose of the stored
    /// matrix.
    pub fn transform_normal(&self, normal: Vec3) -> Vec3 {
        vec3(
            self.d0.xyz().dot(normal),
            self.d1.xyz().dot(normal),
            self.d2.xyz().dot(normal),
        )
    }
}
