//! Error types for bundle operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BundleError {
    /// The path is not present in the bundle index
    #[error("Asset '{0}' doesn't exist")]
    NotFound(String),

    /// Bad signature, malformed index or checksum mismatch
    #[error("The asset bundle at \"{path}\" has been corrupted: {reason}")]
    Corrupted { path: String, reason: String },

    /// The on-disk format differs from the one this build understands.
    /// The bundle has to be rebuilt.
    #[error("Bundle format version {found} is not supported (expected {expected}); rebuild the bundle")]
    VersionMismatch { found: i32, expected: i32 },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BundleError {
    pub(crate) fn corrupted(path: impl Into<String>, reason: impl Into<String>) -> Self {
        BundleError::Corrupted {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that mean the bundle must be rebuilt
    pub fn requires_rebuild(&self) -> bool {
        matches!(
            self,
            BundleError::Corrupted { .. } | BundleError::VersionMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BundleError>;
