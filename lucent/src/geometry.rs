use glam::{vec3, Vec3};

/// Per-mesh triangle data shared by a BLAS and its queries: flat vertex
/// positions and normals (same indexing), a triangle index array, and
/// optional per-vertex colors.
///
/// The index array gets reordered in place - triangle by triangle, never
/// resized - while the BLAS is built; afterwards the whole thing is frozen
/// behind an `Arc` and shared by every instance of the mesh.
#[derive(Clone, Debug, Default)]
pub struct GeometryData {
    positions: Vec<f32>,
    normals: Vec<f32>,
    indices: Vec<u32>,
    colors: Option<Vec<f32>>,
}

impl GeometryData {
    pub fn new(
        positions: Vec<f32>,
        normals: Vec<f32>,
        indices: Vec<u32>,
        colors: Option<Vec<f32>>,
    ) -> Self {
        assert_eq!(positions.len(), normals.len());
        assert_eq!(0, indices.len() % 3);

        Self {
            positions,
            normals,
            indices,
            colors,
        }
    }

    pub fn vertex_count(&self) -> u32 {
        (self.positions.len() / 3) as u32
    }

    pub fn triangle_count(&self) -> u32 {
        (self.indices.len() / 3) as u32
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn position(&self, vertex: u32) -> Vec3 {
        let idx = (vertex as usize) * 3;

        vec3(
            self.positions[idx],
            self.positions[idx + 1],
            self.positions[idx + 2],
        )
    }

    pub fn normal(&self, vertex: u32) -> Vec3 {
        let idx = (vertex as usize) * 3;

        vec3(
            self.normals[idx],
            self.normals[idx + 1],
            self.normals[idx + 2],
        )
    }

    pub fn color(&self, vertex: u32) -> Option<Vec3> {
        self.colors.as_ref().map(|colors| {
            let idx = (vertex as usize) * 3;

            vec3(colors[idx], colors[idx + 1], colors[idx + 2])
        })
    }

    pub fn triangle_indices(&self, slot: u32) -> [u32; 3] {
        let idx = (slot as usize) * 3;

        [
            self.indices[idx],
            self.indices[idx + 1],
            self.indices[idx + 2],
        ]
    }

    pub fn triangle_positions(&self, slot: u32) -> [Vec3; 3] {
        self.triangle_indices(slot).map(|vertex| self.position(vertex))
    }

    pub fn triangle_normals(&self, slot: u32) -> [Vec3; 3] {
        self.triangle_indices(slot).map(|vertex| self.normal(vertex))
    }

    /// Sum of the triangle's vertex positions: three times the true
    /// centroid, which compares the same and skips the division.
    pub(crate) fn centroid_proxy(&self, slot: u32) -> Vec3 {
        self.triangle_positions(slot).into_iter().sum()
    }

    pub(crate) fn swap_triangles(&mut self, a: u32, b: u32) {
        if a == b {
            return;
        }

        let a = (a as usize) * 3;
        let b = (b as usize) * 3;

        for lane in 0..3 {
            self.indices.swap(a + lane, b + lane);
        }
    }
}
