//! Prefetch Error Types

use derive_more::{Display, Error};

/// A prefetch error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for prefetch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// Cloneable so one failure can be delivered to every subscriber of a key.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Descriptor failed validation; nothing was registered.
    #[display("invalid media descriptor")]
    InvalidMedia,
    /// The low-level player or asset could not be created.
    #[display("could not prepare media: {_0}")]
    Prepare(#[error(not(source))] String),
    /// The media was prepared but can't be played.
    #[display("media is not playable: {_0}")]
    Unplayable(#[error(not(source))] String),
    /// No async runtime to prepare media on.
    #[display("no tokio runtime available")]
    Runtime,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Prepare(_))
    }
}
