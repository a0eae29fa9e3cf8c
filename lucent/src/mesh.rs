use glam::vec3;

use crate::utils::BoundingBox;
use crate::GeometryData;

/// Mesh data as handed over by the geometry provider.
///
/// A mesh is allowed to come without positions - such meshes simply stay
/// invisible to ray queries.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    positions: Option<Vec<f32>>,
    normals: Vec<f32>,
    indices: Vec<u32>,
    colors: Option<Vec<f32>>,
    bounds: BoundingBox,
}

impl Mesh {
    pub fn with_positions(mut self, positions: Vec<f32>) -> Self {
        self.bounds = positions
            .chunks_exact(3)
            .map(|p| vec3(p[0], p[1], p[2]))
            .collect();

        self.positions = Some(positions);
        self
    }

    pub fn with_normals(mut self, normals: Vec<f32>) -> Self {
        self.normals = normals;
        self
    }

    pub fn with_indices(mut self, indices: Vec<u32>) -> Self {
        self.indices = indices;
        self
    }

    pub fn with_colors(mut self, colors: Vec<f32>) -> Self {
        self.colors = Some(colors);
        self
    }

    pub fn has_positions(&self) -> bool {
        self.positions.is_some()
    }

    /// Object-local bounds.
    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    pub(crate) fn to_geometry(&self) -> Option<GeometryData> {
        let positions = self.positions.clone()?;

        Some(GeometryData::new(
            positions,
            self.normals.clone(),
            self.indices.clone(),
            self.colors.clone(),
        ))
    }
}
