//! In-memory downloader for testing.

use crate::backend::{DownloadRequest, Downloader};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Ledger {
    attempts: HashMap<String, usize>,
    active: usize,
    peak: usize,
}

/// In-memory downloader for testing.
///
/// Resources are served from a `HashMap` keyed by URI. Every call is
/// counted, so tests can assert how many physical downloads happened, and
/// downloads can be held at a gate to keep them in flight.
///
/// # Examples
///
/// ```
/// use preroll_fetch::MockDownloader;
///
/// let downloader = MockDownloader::with_resources([
///     ("https://cdn.example.com/a.mp4", b"aaaa".to_vec()),
/// ]);
/// downloader.hold();
/// // ... start downloads, assert they're in flight ...
/// downloader.release();
/// ```
pub struct MockDownloader {
    name: String,
    resources: Mutex<HashMap<String, Vec<u8>>>,
    failing: Mutex<HashSet<String>>,
    ledger: Mutex<Ledger>,
    gate: watch::Sender<bool>,
}

impl MockDownloader {
    /// Create a mock downloader serving the given resources.
    pub fn with_resources(resources: impl IntoIterator<Item = (impl Into<String>, impl Into<Vec<u8>>)>) -> Self {
        let resources = resources.into_iter().map(|(uri, data)| (uri.into(), data.into())).collect();
        Self {
            name: "mock".to_string(),
            resources: Mutex::new(resources),
            failing: Mutex::new(HashSet::new()),
            ledger: Mutex::new(Ledger::default()),
            gate: watch::Sender::new(true),
        }
    }

    /// Change the name of the mock downloader.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn insert(&self, uri: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.resources.lock().unwrap_or_else(PoisonError::into_inner).insert(uri.into(), data.into());
    }

    /// Make every download of `uri` fail with a network error.
    pub fn fail(&self, uri: impl Into<String>) {
        self.failing.lock().unwrap_or_else(PoisonError::into_inner).insert(uri.into());
    }

    pub fn recover(&self, uri: &str) {
        self.failing.lock().unwrap_or_else(PoisonError::into_inner).remove(uri);
    }

    /// Block downloads after they've been counted, until [`release`](Self::release).
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Number of download attempts for `uri`.
    pub fn attempts(&self, uri: &str) -> usize {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner).attempts.get(uri).copied().unwrap_or(0)
    }

    pub fn total_attempts(&self) -> usize {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner).attempts.values().sum()
    }

    /// Downloads currently running (including ones held at the gate).
    pub fn active(&self) -> usize {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner).active
    }

    /// Highest number of downloads that ran at once.
    pub fn peak_concurrency(&self) -> usize {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner).peak
    }

    async fn serve(&self, request: &DownloadRequest, destination: &Path) -> Result<u64> {
        let mut gate = self.gate.subscribe();
        // The sender lives in `self`, so the channel can't close under us.
        let _ = gate.wait_for(|open| *open).await;

        if self.failing.lock().unwrap_or_else(PoisonError::into_inner).contains(&request.uri) {
            exn::bail!(ErrorKind::Network(format!("injected failure for {}", request.uri)));
        }
        let data = self.resources.lock().unwrap_or_else(PoisonError::into_inner).get(&request.uri).cloned();
        let Some(mut data) = data else {
            exn::bail!(ErrorKind::NotFound(request.uri.clone()));
        };
        if let Some(limit) = request.byte_limit {
            data.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        tokio::fs::write(destination, &data).await.map_err(ErrorKind::Io)?;
        Ok(data.len() as u64)
    }
}
impl Default for MockDownloader {
    fn default() -> Self {
        let resources: [(&str, Vec<u8>); 0] = [];
        Self::with_resources(resources)
    }
}

#[async_trait]
impl Downloader for MockDownloader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn download(&self, request: &DownloadRequest, destination: &Path, cancel: &CancellationToken) -> Result<u64> {
        {
            let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
            *ledger.attempts.entry(request.uri.clone()).or_default() += 1;
            ledger.active += 1;
            ledger.peak = ledger.peak.max(ledger.active);
        }
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(exn::Exn::from(ErrorKind::Cancelled)),
            result = self.serve(request, destination) => result,
        };
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner).active -= 1;
        result
    }
}
