//! Downloader trait and implementations.

mod file;
#[cfg(feature = "http")]
mod http;
#[cfg(any(test, feature = "mock"))]
mod mock;

pub use self::file::FileDownloader;
#[cfg(feature = "http")]
pub use self::http::HttpDownloader;
#[cfg(any(test, feature = "mock"))]
pub use self::mock::MockDownloader;
use crate::error::Result;
use async_trait::async_trait;
use preroll_media::MediaDescriptor;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared handle to a downloader.
pub type DownloaderHandle = Arc<dyn Downloader + Send + Sync>;

/// What to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub uri: String,
    pub headers: BTreeMap<String, String>,
    /// Stop after this many bytes. `None` fetches everything.
    pub byte_limit: Option<u64>,
}
impl DownloadRequest {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into(), headers: BTreeMap::new(), byte_limit: None }
    }

    pub fn for_media(descriptor: &MediaDescriptor, byte_limit: Option<u64>) -> Self {
        Self { uri: descriptor.uri().to_string(), headers: descriptor.headers().clone(), byte_limit }
    }

    pub fn with_byte_limit(mut self, limit: u64) -> Self {
        self.byte_limit = Some(limit);
        self
    }
}

/// Fetch a resource into a local file.
///
/// Implementations write the (possibly truncated) resource to `destination`,
/// creating or truncating it, and return the number of bytes written. They
/// must give up promptly with
/// [`Cancelled`](crate::error::ErrorKind::Cancelled) once `cancel` fires.
/// Cleaning up a partially written destination is the caller's job.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use tokio_util::sync::CancellationToken;
/// use preroll_fetch::{DownloadRequest, Downloader, error::Result};
///
/// async fn fetch_head(downloader: &dyn Downloader) -> Result<u64> {
///     let request = DownloadRequest::new("file:///videos/clip.mp4").with_byte_limit(64 * 1024);
///     downloader.download(&request, Path::new("/tmp/clip.part"), &CancellationToken::new()).await
/// }
/// ```
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Name of the downloader, for logging only.
    fn name(&self) -> &str;

    async fn download(&self, request: &DownloadRequest, destination: &Path, cancel: &CancellationToken) -> Result<u64>;
}
