mod axis;
mod blas;
mod builder;
mod serializer;
mod tlas;

pub use self::axis::*;
pub use self::blas::*;
pub use self::builder::*;
pub use self::serializer::*;
pub use self::tlas::*;
