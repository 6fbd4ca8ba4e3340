//! # Store Error Types
//!
//! Hard failures of the store. Business rejections (already registered,
//! out of stock, rate limited) are outcome values, not errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in the store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A filesystem operation failed.
    #[error("io error during {op} on {}: {source}", path.display())]
    Io {
        /// The operation that failed.
        op: &'static str,
        /// The file or directory involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The aggregate could not be serialized.
    #[error("failed to serialize store document: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A stored document could not be parsed.
    #[error("failed to decode {}: {reason}", path.display())]
    Decode {
        /// File that was read.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },

    /// The new document was written but could not be moved into place.
    ///
    /// The in-memory state has already been mutated; the change is applied
    /// but not confirmed durable. `Store::flush` retries the write.
    #[error("failed to replace {}: {reason}", path.display())]
    Persist {
        /// Target file.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// A tier name did not match any known tier.
    #[error("unknown tier: {0}")]
    UnknownTier(String),
}

impl StoreError {
    /// Wraps an io error with the operation and path it came from.
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
