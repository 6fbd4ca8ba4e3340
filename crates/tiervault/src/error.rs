//! # Host Error Types

use std::path::PathBuf;

use thiserror::Error;
use tiervault_store::StoreError;

/// Errors raised by the host layer.
#[derive(Error, Debug)]
pub enum HostError {
    /// The inventory store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The plugin config could not be encoded.
    #[error("config encode failed: {0}")]
    ConfigEncode(#[from] toml::ser::Error),

    /// A file the host reads directly could not be read.
    #[error("{op} failed for {}: {source}", path.display())]
    Io {
        /// What was being attempted.
        op: &'static str,
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A command-line argument was missing or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A global subscriber was already installed.
    #[error("logging init failed: {0}")]
    Telemetry(String),
}

/// Result alias for host operations.
pub type HostResult<T> = Result<T, HostError>;
