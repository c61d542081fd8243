//! Coordinator Error Types

use derive_more::{Display, Error};
use preroll_cache::error::ErrorKind as CacheErrorKind;
use preroll_prefetch::error::ErrorKind as PrefetchErrorKind;

/// A coordinator error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for coordinator operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Configuration failed validation.
    #[display("invalid configuration")]
    Config,
    /// The download cache directory could not be opened.
    #[display("could not open download cache")]
    Cache,
    /// The prefetch registry could not be started.
    #[display("could not start prefetch registry")]
    Registry,
    /// A feed item has an unusable descriptor.
    #[display("invalid media descriptor")]
    InvalidMedia,
    /// Preparing or probing a feed item failed.
    #[display("media failed to prepare: {_0}")]
    Prepare(PrefetchErrorKind),
    /// Downloading a feed item ahead of time failed. The next scheduling
    /// pass tries again while it stays in the window.
    #[display("media failed to download: {_0}")]
    Download(CacheErrorKind),
    /// No async runtime to run on.
    #[display("no tokio runtime available")]
    Runtime,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Prepare(inner) => inner.is_retryable(),
            Self::Download(inner) => inner.is_retryable(),
            _ => false,
        }
    }
}
