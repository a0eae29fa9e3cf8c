use std::sync::Arc;

use fxhash::FxHashMap;

use crate::{Blas, Error, Mesh, Params, SplitMethod};

/// Mesh-identity-keyed BLAS side table.
///
/// A mesh without positions caches a `None`, so it gets skipped without
/// retrying the build every frame. Whenever a mesh's geometry changes, its
/// entry must be evicted - entries never expire on their own.
#[derive(Debug)]
pub struct BlasCache<P>
where
    P: Params,
{
    entries: FxHashMap<P::MeshHandle, Option<Arc<Blas>>>,
}

impl<P> BlasCache<P>
where
    P: Params,
{
    /// Returns the mesh's BLAS, building and caching it on first sight.
    pub fn resolve(
        &mut self,
        mesh_handle: P::MeshHandle,
        mesh: &Mesh,
        method: SplitMethod,
        max_leaf_len: u32,
    ) -> Result<Option<Arc<Blas>>, Error> {
        if let Some(entry) = self.entries.get(&mesh_handle) {
            return Ok(entry.clone());
        }

        let blas = Blas::of_mesh(mesh, method, max_leaf_len)?.map(Arc::new);

        if blas.is_none() {
            log::warn!(
                "mesh {mesh_handle:?} has no positions; \
                 it stays invisible to ray queries",
            );
        }

        self.entries.insert(mesh_handle, blas.clone());

        Ok(blas)
    }

    /// Drops the mesh's entry; call whenever its geometry changed.
    pub fn evict(&mut self, mesh_handle: &P::MeshHandle) {
        self.entries.remove(mesh_handle);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<P> Default for BlasCache<P>
where
    P: Params,
{
    fn default() -> Self {
        Self {
            entries: Default::default(),
        }
    }
}
