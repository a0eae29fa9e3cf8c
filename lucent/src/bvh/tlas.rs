use std::sync::Arc;

use glam::{Affine3A, Vec3};

use super::{builder, Axis, Blas, SplitMethod};
use crate::utils::BoundingBox;
use crate::Error;

/// Top-level acceleration structure: a BVH over the scene's visible mesh
/// instances in world space.
///
/// Rebuilt whole whenever the visible set or any transform changes - there
/// is no incremental update - and immutable afterwards.
#[derive(Debug)]
pub struct Tlas {
    root: Option<TlasNode>,
}

#[derive(Debug)]
pub enum TlasNode {
    Branch {
        bounds: BoundingBox,
        axis: Axis,
        left: Box<Self>,
        right: Box<Self>,
    },

    Leaf(TlasLeaf),
}

/// One visible mesh instance: a shared BLAS plus the transforms that carry
/// rays between world and object space.
#[derive(Clone, Debug)]
pub struct TlasLeaf {
    centroid: Vec3,
    bounds: BoundingBox,
    blas: Arc<Blas>,
    local_to_world: Affine3A,
    world_to_local: Affine3A,
}

impl TlasLeaf {
    pub fn new(
        blas: Arc<Blas>,
        local_bounds: BoundingBox,
        local_to_world: Affine3A,
    ) -> Self {
        let bounds = local_bounds.with_transform(local_to_world);
        let centroid =
            local_to_world.transform_point3(local_bounds.center());

        Self {
            centroid,
            bounds,
            blas,
            local_to_world,
            world_to_local: local_to_world.inverse(),
        }
    }

    pub fn centroid(&self) -> Vec3 {
        self.centroid
    }

    /// World-space bounds.
    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    pub fn blas(&self) -> &Arc<Blas> {
        &self.blas
    }

    pub fn local_to_world(&self) -> &Affine3A {
        &self.local_to_world
    }

    pub fn world_to_local(&self) -> &Affine3A {
        &self.world_to_local
    }
}

impl Tlas {
    pub fn build(
        mut leaves: Vec<TlasLeaf>,
        method: SplitMethod,
    ) -> Result<Self, Error> {
        method.ensure_supported()?;

        let root = if leaves.is_empty() {
            None
        } else {
            let end = leaves.len() as u32;
            let root = build_node(&mut leaves, 0, end, method);

            root.validate();

            log::debug!(
                "built tlas: instances={}, depth={}",
                end,
                root.depth(),
            );

            Some(root)
        };

        Ok(Self { root })
    }

    pub fn root(&self) -> Option<&TlasNode> {
        self.root.as_ref()
    }
}

impl TlasNode {
    pub fn bounds(&self) -> BoundingBox {
        match self {
            Self::Branch { bounds, .. } => *bounds,
            Self::Leaf(leaf) => leaf.bounds(),
        }
    }

    pub fn depth(&self) -> u32 {
        match self {
            Self::Branch { left, right, .. } => {
                1 + left.depth().max(right.depth())
            }

            Self::Leaf(_) => 1,
        }
    }

    pub(crate) fn node_count(&self) -> u32 {
        match self {
            Self::Branch { left, right, .. } => {
                1 + left.node_count() + right.node_count()
            }

            Self::Leaf(_) => 1,
        }
    }

    /// Checks that every branch's bounds is the union of its children's.
    pub fn validate(&self) {
        if let Self::Branch {
            bounds,
            left,
            right,
            ..
        } = self
        {
            assert_eq!(*bounds, left.bounds() + right.bounds());

            left.validate();
            right.validate();
        }
    }
}

fn build_node(
    leaves: &mut [TlasLeaf],
    start: u32,
    end: u32,
    method: SplitMethod,
) -> TlasNode {
    if end - start <= 1 {
        return TlasNode::Leaf(leaves[start as usize].clone());
    }

    let (axis, mid) =
        builder::split(&mut CentroidSet { leaves }, start, end, method);

    let left = build_node(leaves, start, mid, method);
    let right = build_node(leaves, mid, end, method);

    TlasNode::Branch {
        bounds: left.bounds() + right.bounds(),
        axis,
        left: Box::new(left),
        right: Box::new(right),
    }
}

struct CentroidSet<'a> {
    leaves: &'a mut [TlasLeaf],
}

impl builder::SplitSet for CentroidSet<'_> {
    fn key(&self, slot: u32) -> Vec3 {
        self.leaves[slot as usize].centroid()
    }

    fn swap(&mut self, a: u32, b: u32) {
        self.leaves.swap(a as usize, b as usize);
    }
}

#[cfg(test)]
mod tests {
    use glam::vec3;

    use super::*;
    use crate::tests::grid_mesh;

    #[test]
    fn builds_over_instances() {
        let mesh = grid_mesh(4, 4);
        let blas = Arc::new(
            Blas::of_mesh(&mesh, SplitMethod::Middle, 4)
                .unwrap()
                .unwrap(),
        );

        let leaves = (0..5)
            .map(|i| {
                TlasLeaf::new(
                    blas.clone(),
                    mesh.bounds(),
                    Affine3A::from_translation(vec3(2.0 * i as f32, 0.0, 0.0)),
                )
            })
            .collect();

        let target = Tlas::build(leaves, SplitMethod::Middle).unwrap();
        let root = target.root().unwrap();

        assert_eq!(9, root.node_count());
        assert!(root.bounds().contains(vec3(8.5, 0.5, 0.0)));
    }

    #[test]
    fn builds_empty() {
        let target = Tlas::build(Vec::new(), SplitMethod::Middle).unwrap();

        assert!(target.root().is_none());
    }

    #[test]
    fn refuses_unimplemented_methods() {
        assert!(matches!(
            Tlas::build(Vec::new(), SplitMethod::SurfaceAreaHeuristic),
            Err(Error::UnsupportedSplitMethod(_)),
        ));
    }
}
