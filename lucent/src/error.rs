use crate::SplitMethod;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested split method is part of the configuration surface but
    /// has no implementation; building refuses outright rather than
    /// silently partitioning some other way.
    #[error("unsupported split method: {0:?}")]
    UnsupportedSplitMethod(SplitMethod),
}
