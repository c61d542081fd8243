//! Cache Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// Cloneable so a single download outcome can be fanned out to every caller
/// waiting on it.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Descriptor failed validation; nothing was started.
    #[display("invalid media descriptor")]
    InvalidMedia,
    /// Cache directory is unusable (relative, or not a directory).
    #[display("invalid cache directory: {}", _0.display())]
    InvalidDirectory(#[error(not(source))] PathBuf),
    /// The downloader failed.
    #[display("download failed: {reason}")]
    Download { reason: String, retryable: bool },
    /// Moving a finished download into place, or touching the cache
    /// directory, failed.
    #[display("cache I/O error")]
    Io,
    /// The prefetch was cancelled before it completed.
    #[display("prefetch cancelled")]
    Cancelled,
    /// No async runtime to run downloads on.
    #[display("no tokio runtime available")]
    Runtime,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Download { retryable, .. } => *retryable,
            Self::Io => true,
            _ => false,
        }
    }
}
