//! Media Error Types

use derive_more::{Display, Error};

/// A media error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reasons a descriptor or key was rejected.
///
/// None of these are worth retrying: the input has to change first.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Descriptor has no identity.
    #[display("media id is empty")]
    EmptyId,
    /// Source URI is missing a scheme, empty, or contains whitespace.
    #[display("invalid media uri: {_0}")]
    InvalidUri(#[error(not(source))] String),
    /// String is not a 64 character hex cache key.
    #[display("invalid cache key: {_0}")]
    InvalidKey(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
