//! Error types for `tiercache`.
//!
//! Per the crate's error-handling contract (see the crate-level docs),
//! almost nothing in the public `Cache` API returns `Result`: logical
//! failures (unknown key, misaligned segment, ...) are silent no-ops and
//! physical failures (filesystem, mmap) are unrecoverable. [`Error`] and
//! [`Result`] exist for the narrow internal surface where that physical
//! failure is first observed, right before it is turned into a panic.

use std::path::PathBuf;

/// Errors produced by `tiercache`'s storage layer.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A filesystem operation failed (open, truncate, rename, remove, ...).
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path the failing operation was performed on.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Serializing a snapshot failed.
    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] bincode::Error),

    /// Deserializing a snapshot failed.
    #[error("failed to decode snapshot: {0}")]
    Decode(#[source] bincode::Error),

    /// Loading layered configuration failed.
    #[error("failed to load configuration: {0}")]
    Config(#[from] figment::Error),

    /// A segment locator referenced a block the tier's store no longer has.
    #[error("block {block_id} referenced by a segment locator is not present in the store")]
    BlockNotFound {
        /// The missing block's identifier.
        block_id: u64,
    },
}

/// Convenience alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
