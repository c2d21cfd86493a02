//! Error types surfaced by every pricer variant.

use thiserror::Error;

/// Failure modes of a pricing call.
///
/// Both variants are recoverable from the caller's point of view: the pricer
/// never aborts the process and never encodes a failure as a NaN price.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LsmError {
    /// The arena could not satisfy an allocation. The call that raised it has
    /// already written into the arena and cannot be resumed.
    #[error("arena exhausted: requested {requested} bytes, {remaining} bytes remaining")]
    OutOfMemory {
        /// Bytes asked for, including alignment padding.
        requested: usize,
        /// Bytes left between the cursor and the end of the arena.
        remaining: usize,
    },

    /// Bad input, detected before any simulation work starts.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, LsmError>;

#[test]
fn error_messages_carry_context() {
    let oom = LsmError::OutOfMemory {
        requested: 128,
        remaining: 64,
    };
    assert_eq!(
        oom.to_string(),
        "arena exhausted: requested 128 bytes, 64 bytes remaining"
    );

    let bad = LsmError::InvalidArgument("num_paths must be > 0".to_string());
    assert!(bad.to_string().contains("num_paths"));
}
