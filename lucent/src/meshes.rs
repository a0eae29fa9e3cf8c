use std::collections::HashMap;

use crate::{Mesh, Params};

/// Meshes the collaborating layers have supplied so far, keyed by the
/// host's handles.
#[derive(Debug)]
pub struct Meshes<P>
where
    P: Params,
{
    meshes: HashMap<P::MeshHandle, Mesh>,
}

impl<P> Meshes<P>
where
    P: Params,
{
    pub fn insert(&mut self, mesh_handle: P::MeshHandle, mesh: Mesh) {
        self.meshes.insert(mesh_handle, mesh);
    }

    pub fn get(&self, mesh_handle: &P::MeshHandle) -> Option<&Mesh> {
        self.meshes.get(mesh_handle)
    }

    pub fn remove(&mut self, mesh_handle: &P::MeshHandle) -> Option<Mesh> {
        self.meshes.remove(mesh_handle)
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}

impl<P> Default for Meshes<P>
where
    P: Params,
{
    fn default() -> Self {
        Self {
            meshes: Default::default(),
        }
    }
}
