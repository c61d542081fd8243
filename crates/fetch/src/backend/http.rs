//! HTTP(S) downloader backed by `reqwest`.

use crate::backend::{DownloadRequest, Downloader};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use reqwest::{Client, StatusCode, header};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Streams an HTTP(S) resource to disk, forwarding descriptor headers and
/// asking for a byte range when the request carries a limit.
#[derive(Clone, Debug)]
pub struct HttpDownloader {
    name: String,
    client: Client,
}
impl HttpDownloader {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_client(name, Client::new())
    }

    pub fn with_client(name: impl Into<String>, client: Client) -> Self {
        Self { name: name.into(), client }
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(downloader = %self.name, uri = %request.uri, limit = ?request.byte_limit))]
    async fn download(&self, request: &DownloadRequest, destination: &Path, cancel: &CancellationToken) -> Result<u64> {
        if !(request.uri.starts_with("http://") || request.uri.starts_with("https://")) {
            exn::bail!(ErrorKind::InvalidUri(request.uri.clone()));
        }
        let mut builder = self.client.get(&request.uri);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        match request.byte_limit {
            Some(0) => {
                File::create(destination).await.map_err(ErrorKind::Io)?;
                return Ok(0);
            },
            Some(limit) => builder = builder.header(header::RANGE, format!("bytes=0-{}", limit - 1)),
            None => {},
        }

        let mut response = tokio::select! {
            _ = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
            response = builder.send() => response.or_raise(|| ErrorKind::Network(request.uri.clone()))?,
        };
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => exn::bail!(ErrorKind::NotFound(request.uri.clone())),
            status if !status.is_success() => exn::bail!(ErrorKind::Network(format!("{status} from {}", request.uri))),
            _ => {},
        }

        let mut file = File::create(destination).await.map_err(ErrorKind::Io)?;
        let mut written: u64 = 0;
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
                chunk = response.chunk() => chunk.or_raise(|| ErrorKind::Network(request.uri.clone()))?,
            };
            let Some(chunk) = chunk else {
                break;
            };
            // Servers may ignore the range header and send the whole body.
            let remaining = request.byte_limit.map_or(u64::MAX, |limit| limit - written);
            let take = chunk.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
            file.write_all(&chunk[..take]).await.map_err(ErrorKind::Io)?;
            written += take as u64;
            if request.byte_limit.is_some_and(|limit| written >= limit) {
                break;
            }
        }
        file.flush().await.map_err(ErrorKind::Io)?;
        tracing::debug!(bytes = written, "Downloaded resource");
        Ok(written)
    }
}
