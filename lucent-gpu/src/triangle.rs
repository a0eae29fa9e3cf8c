use bytemuck::{Pod, Zeroable};
use glam::{vec3, Vec3, Vec4, Vec4Swizzles};

use crate::{Hit, Ray};

/// One triangle's vertex positions and normals, packed for the flat
/// buffer.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Triangle {
    pub d0: Vec4,
    pub d1: Vec4,
    pub d2: Vec4,
    pub d3: Vec4,
    pub d4: Vec4,
    pub d5: Vec4,
}

impl Triangle {
    pub fn new(positions: [Vec3; 3], normals: [Vec3; 3]) -> Self {
        Self {
            d0: positions[0].extend(0.0),
            d1: normals[0].extend(0.0),
            d2: positions[1].extend(0.0),
            d3: normals[1].extend(0.0),
            d4: positions[2].extend(0.0),
            d5: normals[2].extend(0.0),
        }
    }

    pub fn position0(&self) -> Vec3 {
        self.d0.xyz()
    }

    pub fn normal0(&self) -> Vec3 {
        self.d1.xyz()
    }

    pub fn position1(&self) -> Vec3 {
        self.d2.xyz()
    }

    pub fn normal1(&self) -> Vec3 {
        self.d3.xyz()
    }

    pub fn position2(&self) -> Vec3 {
        self.d4.xyz()
    }

    pub fn normal2(&self) -> Vec3 {
        self.d5.xyz()
    }

    pub fn positions(&self) -> [Vec3; 3] {
        [self.position0(), self.position1(), self.position2()]
    }

    pub fn normals(&self) -> [Vec3; 3] {
        [self.normal0(), self.normal1(), self.normal2()]
    }

    /// Front-face-only intersection; back-facing triangles (geometric
    /// normal running along the ray) and parallel rays are rejected.
    ///
    /// Updates `hit` only when the candidate lands strictly below
    /// `hit.distance`.
    pub fn hit(&self, ray: Ray, hit: &mut Hit) -> bool {
        let v0v1 = self.position1() - self.position0();
        let v0v2 = self.position2() - self.position0();

        let pvec = ray.direction().cross(v0v2);
        let det = v0v1.dot(pvec);

        // `det` equals `-dir · (v0v1 × v0v2)`, so `det > 0` is exactly the
        // front-face condition.
        if det < f32::EPSILON {
            return false;
        }

        let inv_det = 1.0 / det;
        let tvec = ray.origin() - self.position0();
        let u = tvec.dot(pvec) * inv_det;
        let qvec = tvec.cross(v0v1);
        let v = ray.direction().dot(qvec) * inv_det;
        let distance = v0v2.dot(qvec) * inv_det;

        if (u < 0.0)
            | (u > 1.0)
            | (v < 0.0)
            | (u + v > 1.0)
            | (distance <= 0.0)
            | (distance >= hit.distance)
        {
            return false;
        }

        let w = 1.0 - u - v;

        hit.distance = distance;
        hit.geometry_normal = v0v1.cross(v0v2).normalize();
        hit.shading_normal =
            w * self.normal0() + u * self.normal1() + v * self.normal2();
        hit.barycentric = vec3(w, u, v);

        true
    }
}
