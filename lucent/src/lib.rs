//! Two-level bounding-volume hierarchy behind the engine's ray queries.
//!
//! Per mesh, a BLAS partitions the triangles in object-local space; per
//! frame, a TLAS gathers the visible instances - each one a shared BLAS
//! plus its transforms - in world space. Queries (closest-hit, any-hit and
//! coherent packets) run recursively over the built pair, and a serializer
//! flattens it into the buffers the GPU mirror in `lucent-gpu` traverses
//! iteratively.
//!
//! Building and querying are strictly separated: once built, the
//! structures are immutable and may be traced from any number of threads.

mod blas_cache;
mod bvh;
mod error;
mod geometry;
mod mesh;
mod meshes;
mod params;
mod ray;
mod ray_group;
mod stage;
mod utils;

pub use lucent_gpu as gpu;
pub use lucent_gpu::{Hit, Ray, TraceStats};

pub use self::blas_cache::*;
pub use self::bvh::*;
pub use self::error::*;
pub use self::geometry::*;
pub use self::mesh::*;
pub use self::meshes::*;
pub use self::params::*;
pub use self::ray_group::*;
pub use self::stage::*;
pub use self::utils::*;
