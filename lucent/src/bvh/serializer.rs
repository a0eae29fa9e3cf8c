use std::sync::Arc;

use fxhash::FxHashMap;
use glam::Vec4;

use super::{Axis, Blas, BlasNode, Tlas, TlasLeaf, TlasNode};
use crate::utils::BoundingBox;
use crate::gpu;

/// Flattened node/triangle/instance buffers in the layout the compute-side
/// traversal consumes; see `lucent-gpu` for the encoding.
#[derive(Clone, Debug, Default)]
pub struct FlatScene {
    pub nodes: Vec<Vec4>,
    pub triangles: Vec<gpu::Triangle>,
    pub instances: Vec<gpu::Instance>,

    /// Deepest tree among the TLAS and every BLAS; the traversal stacks
    /// must hold at least this many entries.
    pub depth: u32,
}

impl FlatScene {
    pub fn bvh(&self) -> gpu::BvhView {
        gpu::BvhView::new(&self.nodes)
    }

    pub fn triangles(&self) -> gpu::TrianglesView {
        gpu::TrianglesView::new(&self.triangles)
    }

    pub fn instances(&self) -> gpu::InstancesView {
        gpu::InstancesView::new(&self.instances)
    }
}

pub struct BvhSerializer;

impl BvhSerializer {
    /// Flattens `tlas` - and every distinct BLAS it references, each one
    /// exactly once - into the buffers the iterative traversal walks.
    ///
    /// The TLAS occupies the front of the node buffer, so the traversal
    /// always enters at node 0.
    pub fn process(tlas: &Tlas) -> FlatScene {
        let mut out = FlatScene::default();

        let Some(root) = tlas.root() else {
            // A leaf with no primitives; its never-intersecting bounds end
            // the walk on the first step
            let ptr = Self::alloc(&mut out);
            Self::set_leaf(&mut out, ptr, BoundingBox::default(), 0, 0);

            return out;
        };

        // Every pointer is known up front: the TLAS claims the first
        // `node_count` slots, the BLASes follow in first-seen order
        let mut layouts = FxHashMap::<*const Blas, BlasLayout>::default();
        let mut ordered = Vec::new();
        let mut next_ptr = root.node_count();
        let mut next_triangle = 0;
        let mut depth = root.depth();

        visit_leaves(root, &mut |leaf| {
            let key = Arc::as_ptr(leaf.blas());

            if layouts.contains_key(&key) {
                return;
            }

            let blas = leaf.blas().as_ref();

            layouts.insert(
                key,
                BlasLayout {
                    node_ptr: next_ptr,
                    triangle_base: next_triangle,
                },
            );

            next_ptr += blas.root().node_count();
            next_triangle += blas.geometry().triangle_count();
            depth = depth.max(blas.root().depth());

            ordered.push(blas);
        });

        assert!(depth as usize <= gpu::BVH_STACK_SIZE);

        let root_ptr = Self::alloc(&mut out);
        Self::write_tlas(&mut out, root, root_ptr, &layouts);

        for blas in ordered {
            let layout = layouts[&(blas as *const Blas)];
            let ptr = Self::alloc(&mut out);

            assert_eq!(layout.node_ptr, ptr);

            Self::write_blas(&mut out, blas.root(), ptr, layout.triangle_base);

            assert_eq!(layout.triangle_base, out.triangles.len() as u32);

            let geometry = blas.geometry();

            for slot in 0..geometry.triangle_count() {
                out.triangles.push(gpu::Triangle::new(
                    geometry.triangle_positions(slot),
                    geometry.triangle_normals(slot),
                ));
            }
        }

        out.depth = depth;

        log::debug!(
            "serialized bvh: nodes={}, triangles={}, instances={}, depth={}",
            out.nodes.len() / 2,
            out.triangles.len(),
            out.instances.len(),
            out.depth,
        );

        out
    }

    fn alloc(out: &mut FlatScene) -> u32 {
        let ptr = (out.nodes.len() / 2) as u32;

        out.nodes.push(Vec4::ZERO);
        out.nodes.push(Vec4::ZERO);

        ptr
    }

    fn set_branch(
        out: &mut FlatScene,
        ptr: u32,
        bounds: BoundingBox,
        axis: Axis,
        left: u32,
    ) {
        let idx = (ptr as usize) * 2;

        out.nodes[idx] = bounds
            .min()
            .extend(f32::from_bits(usize::from(axis) as u32));

        out.nodes[idx + 1] = bounds.max().extend(f32::from_bits(left));
    }

    fn set_leaf(
        out: &mut FlatScene,
        ptr: u32,
        bounds: BoundingBox,
        len: u32,
        first: u32,
    ) {
        let idx = (ptr as usize) * 2;

        out.nodes[idx] =
            bounds.min().extend(f32::from_bits(gpu::LEAF_TAG + len));

        out.nodes[idx + 1] = bounds.max().extend(f32::from_bits(first));
    }

    fn write_tlas(
        out: &mut FlatScene,
        node: &TlasNode,
        ptr: u32,
        layouts: &FxHashMap<*const Blas, BlasLayout>,
    ) {
        match node {
            TlasNode::Branch {
                bounds,
                axis,
                left,
                right,
            } => {
                let left_ptr = Self::alloc(out);
                let right_ptr = Self::alloc(out);

                debug_assert_eq!(left_ptr + 1, right_ptr);

                Self::set_branch(out, ptr, *bounds, *axis, left_ptr);
                Self::write_tlas(out, left, left_ptr, layouts);
                Self::write_tlas(out, right, right_ptr, layouts);
            }

            TlasNode::Leaf(leaf) => {
                let layout = layouts[&Arc::as_ptr(leaf.blas())];
                let instance = out.instances.len() as u32;

                out.instances.push(gpu::Instance::new(
                    *leaf.world_to_local(),
                    layout.node_ptr,
                ));

                Self::set_leaf(out, ptr, leaf.bounds(), 1, instance);
            }
        }
    }

    fn write_blas(
        out: &mut FlatScene,
        node: &BlasNode,
        ptr: u32,
        triangle_base: u32,
    ) {
        match node {
            BlasNode::Branch {
                bounds,
                axis,
                left,
                right,
            } => {
                let left_ptr = Self::alloc(out);
                let right_ptr = Self::alloc(out);

                debug_assert_eq!(left_ptr + 1, right_ptr);

                Self::set_branch(out, ptr, *bounds, *axis, left_ptr);
                Self::write_blas(out, left, left_ptr, triangle_base);
                Self::write_blas(out, right, right_ptr, triangle_base);
            }

            BlasNode::Leaf { bounds, start, len } => {
                Self::set_leaf(
                    out,
                    ptr,
                    *bounds,
                    *len,
                    triangle_base + start,
                );
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct BlasLayout {
    node_ptr: u32,
    triangle_base: u32,
}

fn visit_leaves<'a>(
    node: &'a TlasNode,
    visit: &mut impl FnMut(&'a TlasLeaf),
) {
    match node {
        TlasNode::Branch { left, right, .. } => {
            visit_leaves(left, visit);
            visit_leaves(right, visit);
        }

        TlasNode::Leaf(leaf) => visit(leaf),
    }
}
