//! Download Error Types

use derive_more::{Display, Error};
use std::io::Error as IoError;

/// A download error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for download operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Source does not exist.
    #[display("resource not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The downloader can't handle this URI at all.
    #[display("unsupported or malformed uri: {_0}")]
    InvalidUri(#[error(not(source))] String),
    /// Transport failed or the server refused the request.
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// Writing the destination (or reading a local source) failed.
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// The cancellation token fired before the download finished.
    #[display("download cancelled")]
    Cancelled,
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Network(_))
    }
}
