//! Local filesystem downloader.
//!
//! Serves `file://` URIs by copying the source into the destination with
//! `tokio::fs`. Handy for bundled content, offline fixtures, and anything
//! already sitting on disk that should still flow through the cache.

use crate::backend::{DownloadRequest, Downloader};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

const FILE_SCHEME: &str = "file://";

/// Downloader for `file://` URIs.
///
/// # Examples
///
/// ```no_run
/// use preroll_fetch::FileDownloader;
///
/// let downloader = FileDownloader::new("bundled");
/// ```
#[derive(Clone, Debug)]
pub struct FileDownloader {
    name: String,
}
impl FileDownloader {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Extract the absolute source path from a `file://` URI.
    fn source_path(uri: &str) -> Result<PathBuf> {
        let Some(path) = uri.strip_prefix(FILE_SCHEME) else {
            exn::bail!(ErrorKind::InvalidUri(uri.to_string()));
        };
        let path = PathBuf::from(path);
        if !path.is_absolute() {
            exn::bail!(ErrorKind::InvalidUri(uri.to_string()));
        }
        Ok(path)
    }

    fn map_io_error(e: std::io::Error, uri: &str) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(uri.to_string()),
            _ => ErrorKind::Io(e),
        }
    }

    async fn copy(source: &Path, uri: &str, destination: &Path, limit: Option<u64>) -> Result<u64> {
        let file = File::open(source).await.map_err(|e| Self::map_io_error(e, uri))?;
        if fs::metadata(source).await.map_err(|e| Self::map_io_error(e, uri))?.is_dir() {
            exn::bail!(ErrorKind::InvalidUri(uri.to_string()));
        }
        let mut reader = file.take(limit.unwrap_or(u64::MAX));
        let mut writer = File::create(destination).await.map_err(ErrorKind::Io)?;
        let written = tokio::io::copy(&mut reader, &mut writer).await.map_err(ErrorKind::Io)?;
        writer.flush().await.map_err(ErrorKind::Io)?;
        Ok(written)
    }
}
impl Default for FileDownloader {
    fn default() -> Self {
        Self::new("file")
    }
}

#[async_trait]
impl Downloader for FileDownloader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn download(&self, request: &DownloadRequest, destination: &Path, cancel: &CancellationToken) -> Result<u64> {
        let source = Self::source_path(&request.uri)?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
            written = Self::copy(&source, &request.uri, destination, request.byte_limit) => {
                let written = written?;
                tracing::trace!(downloader = %self.name, uri = %request.uri, bytes = written, "Copied local resource");
                Ok(written)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn uri_for(path: &Path) -> String {
        format!("{FILE_SCHEME}{}", path.display())
    }

    #[tokio::test]
    async fn test_copies_whole_file() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        std::fs::write(&source, b"0123456789").unwrap();
        let destination = dir.path().join("out.part");

        let downloader = FileDownloader::default();
        let request = DownloadRequest::new(uri_for(&source));
        let written = downloader.download(&request, &destination, &CancellationToken::new()).await.unwrap();
        assert_eq!(written, 10);
        assert_eq!(std::fs::read(&destination).unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn test_respects_byte_limit() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        std::fs::write(&source, b"0123456789").unwrap();
        let destination = dir.path().join("out.part");

        let request = DownloadRequest::new(uri_for(&source)).with_byte_limit(4);
        let written = FileDownloader::default().download(&request, &destination, &CancellationToken::new()).await.unwrap();
        assert_eq!(written, 4);
        assert_eq!(std::fs::read(&destination).unwrap(), b"0123");
    }

    #[tokio::test]
    async fn test_missing_source() {
        let dir = tempdir().unwrap();
        let request = DownloadRequest::new(uri_for(&dir.path().join("missing.mp4")));
        let err = FileDownloader::default()
            .download(&request, &dir.path().join("out.part"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rejects_other_schemes() {
        let dir = tempdir().unwrap();
        for uri in ["https://example.com/a.mp4", "file://relative/a.mp4"] {
            let err = FileDownloader::default()
                .download(&DownloadRequest::new(uri), &dir.path().join("out.part"), &CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(&*err, ErrorKind::InvalidUri(_)), "{uri}");
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        std::fs::write(&source, b"data").unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = FileDownloader::default()
            .download(&DownloadRequest::new(uri_for(&source)), &dir.path().join("out.part"), &token)
            .await
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::Cancelled));
    }
}
