//! Error types shared across the crate.

use thiserror::Error;

/// Failure while parsing or evaluating a style expression.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("expression must not be an empty array")]
    Empty,

    #[error("unknown expression operator `{0}`")]
    UnknownOperator(String),

    #[error("`{op}` expects {expected} argument(s), got {got}")]
    Arity {
        op: String,
        expected: &'static str,
        got: usize,
    },

    #[error("`{op}`: expected {expected}, found {found}")]
    Type {
        op: String,
        expected: &'static str,
        found: String,
    },

    #[error("invalid color {0}")]
    Color(String),

    #[error("unknown paint property `{0}`")]
    UnknownProperty(String),
}

/// Failure reported by a [`GpuContext`](crate::gpu::GpuContext).
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("buffer `{label}` needs {size} bytes, device allows at most {max}")]
    BufferTooLarge { label: String, size: u64, max: u64 },

    #[error("buffer handle was not created by this context")]
    ForeignBuffer,

    #[error("cannot write {size} bytes into a {capacity}-byte buffer")]
    UpdateTooLarge { size: u64, capacity: u64 },
}

/// Failure raised while populating, updating or uploading a bucket.
///
/// Collaborator failures pass through untouched.
#[derive(Debug, Error)]
pub enum BucketError {
    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error("bucket {index} was already populated")]
    AlreadyPopulated { index: usize },
}
