//! In-memory playability probe for testing.

use crate::error::{ErrorKind, Result};
use crate::probe::PlayabilityProbe;
use async_trait::async_trait;
use preroll_media::{MediaDescriptor, MediaId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// Stand-in for a prepared platform player.
#[derive(Debug, PartialEq, Eq)]
pub struct MockMedia {
    pub id: MediaId,
    pub uri: String,
    /// Unique per `prepare` call.
    pub serial: u64,
}

#[derive(Default)]
struct Ledger {
    prepared: HashMap<String, usize>,
    unplayable: HashSet<String>,
    unpreparable: HashSet<String>,
    released: Vec<u64>,
}

/// Probe that prepares [`MockMedia`] instantly and can be told to fail or to
/// hold probes at a gate.
///
/// # Examples
///
/// ```
/// use preroll_prefetch::MockProbe;
///
/// let probe = MockProbe::default();
/// probe.fail_probe("mem://broken.mp4");
/// probe.pause();
/// // ... registrations stay in `Buffering` until:
/// probe.resume();
/// ```
pub struct MockProbe {
    ledger: Mutex<Ledger>,
    serials: AtomicU64,
    gate: watch::Sender<bool>,
}
impl Default for MockProbe {
    fn default() -> Self {
        Self { ledger: Mutex::new(Ledger::default()), serials: AtomicU64::new(0), gate: watch::Sender::new(true) }
    }
}
impl MockProbe {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make probing `uri` report it as unplayable.
    pub fn fail_probe(&self, uri: impl Into<String>) {
        self.ledger().unplayable.insert(uri.into());
    }

    /// Make preparing `uri` fail outright.
    pub fn fail_prepare(&self, uri: impl Into<String>) {
        self.ledger().unpreparable.insert(uri.into());
    }

    pub fn recover(&self, uri: &str) {
        let mut ledger = self.ledger();
        ledger.unplayable.remove(uri);
        ledger.unpreparable.remove(uri);
    }

    /// Hold every probe until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.gate.send_replace(false);
    }

    pub fn resume(&self) {
        self.gate.send_replace(true);
    }

    /// Number of `prepare` calls for `uri`.
    pub fn prepare_count(&self, uri: &str) -> usize {
        self.ledger().prepared.get(uri).copied().unwrap_or(0)
    }

    pub fn total_prepares(&self) -> usize {
        self.ledger().prepared.values().sum()
    }

    /// Serials of every media handle passed to `release`.
    pub fn released(&self) -> Vec<u64> {
        self.ledger().released.clone()
    }
}

#[async_trait]
impl PlayabilityProbe for MockProbe {
    type Media = MockMedia;

    fn name(&self) -> &str {
        "mock"
    }

    async fn prepare(&self, descriptor: &MediaDescriptor) -> Result<MockMedia> {
        let mut ledger = self.ledger();
        *ledger.prepared.entry(descriptor.uri().to_string()).or_default() += 1;
        if ledger.unpreparable.contains(descriptor.uri()) {
            exn::bail!(ErrorKind::Prepare(descriptor.uri().to_string()));
        }
        Ok(MockMedia {
            id: descriptor.id().clone(),
            uri: descriptor.uri().to_string(),
            serial: self.serials.fetch_add(1, Ordering::Relaxed) + 1,
        })
    }

    async fn probe(&self, media: &MockMedia) -> Result<()> {
        let mut gate = self.gate.subscribe();
        // The sender lives in `self`, so the channel can't close under us.
        let _ = gate.wait_for(|open| *open).await;
        if self.ledger().unplayable.contains(&media.uri) {
            exn::bail!(ErrorKind::Unplayable(media.uri.clone()));
        }
        Ok(())
    }

    fn release(&self, media: &MockMedia) {
        self.ledger().released.push(media.serial);
    }
}
