use std::sync::Arc;

use glam::Vec3;

use super::{builder, Axis, SplitMethod};
use crate::utils::BoundingBox;
use crate::{Error, GeometryData, Mesh};

/// Bottom-level acceleration structure: a BVH over one mesh's triangles in
/// object-local space.
///
/// Built once per mesh and shared - via `Arc` - by every instance of that
/// mesh; immutable afterwards, so queries need no locking.
#[derive(Debug)]
pub struct Blas {
    root: BlasNode,
    geometry: Arc<GeometryData>,
}

#[derive(Debug)]
pub enum BlasNode {
    Branch {
        bounds: BoundingBox,
        axis: Axis,
        left: Box<Self>,
        right: Box<Self>,
    },

    Leaf {
        bounds: BoundingBox,
        /// First triangle slot of this leaf's contiguous range within the
        /// (build-reordered) index array.
        start: u32,
        len: u32,
    },
}

impl Blas {
    /// Builds over `mesh`'s triangles; a mesh without positions cannot be
    /// traced and yields `None`.
    pub fn of_mesh(
        mesh: &Mesh,
        method: SplitMethod,
        max_leaf_len: u32,
    ) -> Result<Option<Self>, Error> {
        method.ensure_supported()?;

        let Some(geometry) = mesh.to_geometry() else {
            return Ok(None);
        };

        Self::build(geometry, method, max_leaf_len).map(Some)
    }

    pub fn build(
        mut geometry: GeometryData,
        method: SplitMethod,
        max_leaf_len: u32,
    ) -> Result<Self, Error> {
        method.ensure_supported()?;

        let max_leaf_len = max_leaf_len.max(1);
        let count = geometry.triangle_count();
        let root = build_node(&mut geometry, 0, count, method, max_leaf_len);

        root.validate(&geometry);

        log::debug!("built blas: triangles={}, depth={}", count, root.depth());

        Ok(Self {
            root,
            geometry: Arc::new(geometry),
        })
    }

    pub fn root(&self) -> &BlasNode {
        &self.root
    }

    pub fn geometry(&self) -> &GeometryData {
        &self.geometry
    }
}

impl BlasNode {
    pub fn bounds(&self) -> BoundingBox {
        match self {
            Self::Branch { bounds, .. } => *bounds,
            Self::Leaf { bounds, .. } => *bounds,
        }
    }

    pub fn depth(&self) -> u32 {
        match self {
            Self::Branch { left, right, .. } => {
                1 + left.depth().max(right.depth())
            }

            Self::Leaf { .. } => 1,
        }
    }

    pub(crate) fn node_count(&self) -> u32 {
        match self {
            Self::Branch { left, right, .. } => {
                1 + left.node_count() + right.node_count()
            }

            Self::Leaf { .. } => 1,
        }
    }

    /// Checks the containment invariants the queries rely on: a branch's
    /// bounds is the union of its children's, a leaf's bounds covers every
    /// vertex of every triangle it owns.
    pub fn validate(&self, geometry: &GeometryData) {
        match self {
            Self::Branch {
                bounds,
                left,
                right,
                ..
            } => {
                assert_eq!(*bounds, left.bounds() + right.bounds());

                left.validate(geometry);
                right.validate(geometry);
            }

            Self::Leaf { bounds, start, len } => {
                for slot in *start..(*start + *len) {
                    for position in geometry.triangle_positions(slot) {
                        assert!(bounds.contains(position));
                    }
                }
            }
        }
    }
}

fn build_node(
    geometry: &mut GeometryData,
    start: u32,
    end: u32,
    method: SplitMethod,
    max_leaf_len: u32,
) -> BlasNode {
    if end - start <= max_leaf_len {
        let bounds = (start..end)
            .flat_map(|slot| geometry.triangle_positions(slot))
            .collect();

        return BlasNode::Leaf {
            bounds,
            start,
            len: end - start,
        };
    }

    let (axis, mid) =
        builder::split(&mut ProxySet { geometry }, start, end, method);

    let left = build_node(geometry, start, mid, method, max_leaf_len);
    let right = build_node(geometry, mid, end, method, max_leaf_len);

    BlasNode::Branch {
        bounds: left.bounds() + right.bounds(),
        axis,
        left: Box::new(left),
        right: Box::new(right),
    }
}

struct ProxySet<'a> {
    geometry: &'a mut GeometryData,
}

impl builder::SplitSet for ProxySet<'_> {
    fn key(&self, slot: u32) -> Vec3 {
        self.geometry.centroid_proxy(slot)
    }

    fn swap(&mut self, a: u32, b: u32) {
        self.geometry.swap_triangles(a, b);
    }
}
