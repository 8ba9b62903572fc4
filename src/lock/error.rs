//! Wake-lock error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the underlying wake-lock primitive.
#[derive(Debug, Error)]
pub enum LockError {
    /// The primitive is already acquired.
    #[error("Wake lock already held: {0}")]
    AlreadyHeld(PathBuf),

    /// I/O failure while acquiring or releasing the primitive.
    #[error("Wake lock I/O error at {path}: {source}")]
    Io {
        /// Lock file path involved.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}
