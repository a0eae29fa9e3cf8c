use std::fmt::Debug;
use std::hash::Hash;

/// Integration surface for the host engine: how the embedding application
/// identifies its meshes.
pub trait Params
where
    Self: 'static,
{
    type MeshHandle: Copy + Debug + Eq + Hash;
}
