use glam::{Affine3A, Vec3};

use crate::{
    BlasCache, Error, Meshes, Params, SplitMethod, Tlas, TlasLeaf,
};

/// One frame's worth of visible geometry, as handed over by the scene and
/// rendering layers: plain draw requests plus instanced-mesh transform
/// stacks.
#[derive(Debug)]
pub struct Stage<P>
where
    P: Params,
{
    draws: Vec<DrawRequest<P>>,
    instanced: Vec<InstancedDraw<P>>,
}

#[derive(Clone, Debug)]
pub struct DrawRequest<P>
where
    P: Params,
{
    pub mesh_handle: P::MeshHandle,
    pub transform: Affine3A,
}

/// Many instances of one mesh, one transform each.
#[derive(Clone, Debug)]
pub struct InstancedDraw<P>
where
    P: Params,
{
    pub mesh_handle: P::MeshHandle,
    pub transforms: Vec<Affine3A>,
}

impl<P> Stage<P>
where
    P: Params,
{
    pub fn draw(&mut self, mesh_handle: P::MeshHandle, transform: Affine3A) {
        self.draws.push(DrawRequest {
            mesh_handle,
            transform,
        });
    }

    pub fn draw_instanced(
        &mut self,
        mesh_handle: P::MeshHandle,
        transforms: Vec<Affine3A>,
    ) {
        self.instanced.push(InstancedDraw {
            mesh_handle,
            transforms,
        });
    }

    pub fn clear(&mut self) {
        self.draws.clear();
        self.instanced.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.draws.is_empty() && self.instanced.is_empty()
    }

    fn instances(
        &self,
    ) -> impl Iterator<Item = (P::MeshHandle, Affine3A)> + '_ {
        let draws = self
            .draws
            .iter()
            .map(|draw| (draw.mesh_handle, draw.transform));

        let instanced = self.instanced.iter().flat_map(|draw| {
            draw.transforms
                .iter()
                .map(move |transform| (draw.mesh_handle, *transform))
        });

        draws.chain(instanced)
    }

    /// Assembles this frame's TLAS: resolves (or builds and caches) every
    /// instance's BLAS, conditions each transform, and invokes the TLAS
    /// builder once over the collected leaves.
    ///
    /// Queries then run in camera-centered, world-scaled coordinates;
    /// `camera_position` and `world_scale` come from the rendering layer
    /// for exactly that purpose. Meshes the collaborators haven't supplied
    /// yet are skipped - they'll show up in a later frame.
    pub fn build_tlas(
        &self,
        meshes: &Meshes<P>,
        blases: &mut BlasCache<P>,
        camera_position: Vec3,
        world_scale: f32,
        method: SplitMethod,
        max_leaf_len: u32,
    ) -> Result<Tlas, Error> {
        let conditioning = Affine3A::from_scale(Vec3::splat(world_scale))
            * Affine3A::from_translation(-camera_position);

        let mut leaves = Vec::new();

        for (mesh_handle, transform) in self.instances() {
            let Some(mesh) = meshes.get(&mesh_handle) else {
                continue;
            };

            let Some(blas) =
                blases.resolve(mesh_handle, mesh, method, max_leaf_len)?
            else {
                continue;
            };

            leaves.push(TlasLeaf::new(
                blas,
                mesh.bounds(),
                conditioning * transform,
            ));
        }

        log::debug!("assembled tlas: instances={}", leaves.len());

        Tlas::build(leaves, method)
    }
}

impl<P> Default for Stage<P>
where
    P: Params,
{
    fn default() -> Self {
        Self {
            draws: Default::default(),
            instanced: Default::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use glam::vec3;

    use crate::tests::{triangle_mesh, TestParams};
    use crate::Ray;

    use super::*;

    #[test]
    fn assembles_camera_centered_scene() {
        let mut meshes = Meshes::<TestParams>::default();
        let mut blases = BlasCache::default();
        let mut stage = Stage::default();

        meshes.insert(
            1,
            triangle_mesh(
                [
                    vec3(0.0, 0.0, 0.0),
                    vec3(1.0, 0.0, 0.0),
                    vec3(0.0, 1.0, 0.0),
                ],
                Vec3::Z,
            ),
        );

        stage.draw(1, Affine3A::from_translation(vec3(5.0, 0.0, 0.0)));

        let tlas = stage
            .build_tlas(
                &meshes,
                &mut blases,
                vec3(5.0, 0.0, 0.0),
                1.0,
                SplitMethod::Middle,
                4,
            )
            .unwrap();

        // With the camera sitting at the instance's position, the mesh
        // shows up around the origin
        let ray = Ray::new(vec3(0.2, 0.2, 1.0), vec3(0.0, 0.0, -1.0));
        let (hit, _) = tlas.trace_nearest(ray);

        assert!(hit.is_some());
        assert_relative_eq!(hit.distance, 1.0);
    }

    #[test]
    fn skips_missing_and_unsupported_meshes() {
        let mut meshes = Meshes::<TestParams>::default();
        let mut blases = BlasCache::default();
        let mut stage = Stage::default();

        meshes.insert(2, crate::Mesh::default().with_indices(vec![0, 1, 2]));

        stage.draw(1, Affine3A::IDENTITY); // never supplied
        stage.draw(2, Affine3A::IDENTITY); // no positions

        let tlas = stage
            .build_tlas(
                &meshes,
                &mut blases,
                Vec3::ZERO,
                1.0,
                SplitMethod::Middle,
                4,
            )
            .unwrap();

        assert!(tlas.root().is_none());
    }

    #[test]
    fn expands_instanced_draws() {
        let mut meshes = Meshes::<TestParams>::default();
        let mut blases = BlasCache::default();
        let mut stage = Stage::default();

        meshes.insert(
            1,
            triangle_mesh(
                [
                    vec3(0.0, 0.0, 0.0),
                    vec3(1.0, 0.0, 0.0),
                    vec3(0.0, 1.0, 0.0),
                ],
                Vec3::Z,
            ),
        );

        stage.draw_instanced(
            1,
            (0..4)
                .map(|i| {
                    Affine3A::from_translation(vec3(2.0 * i as f32, 0.0, 0.0))
                })
                .collect(),
        );

        let tlas = stage
            .build_tlas(
                &meshes,
                &mut blases,
                Vec3::ZERO,
                1.0,
                SplitMethod::Middle,
                4,
            )
            .unwrap();

        assert_eq!(7, tlas.root().unwrap().node_count());
        assert_eq!(1, blases.len());
    }
}
