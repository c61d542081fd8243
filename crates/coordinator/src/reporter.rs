//! Playback telemetry hooks.

use preroll_media::MediaId;
use preroll_schedule::PreloadMode;
use std::sync::Arc;
use std::time::Duration;

pub type ReporterHandle = Arc<dyn PlaybackEventReporter>;

/// Receives playback and preload telemetry.
///
/// Every method defaults to doing nothing, so implementations only override
/// what they forward. Calls may arrive from runtime worker threads.
pub trait PlaybackEventReporter: Send + Sync {
    fn preload_scheduled(&self, _id: &MediaId, _index: usize, _distance: isize, _mode: PreloadMode) {}

    fn preload_completed(&self, _id: &MediaId, _index: usize, _bytes: u64, _elapsed: Duration, _from_cache: bool) {}

    /// `reason` is a [`CancelReason`](preroll_schedule::CancelReason) name, or
    /// `"error"` when the preload failed.
    fn preload_canceled(&self, _id: &MediaId, _index: usize, _reason: &str) {}

    /// The item about to play has a downloaded file of `bytes` bytes.
    fn cache_hit(&self, _id: &MediaId, _bytes: u64) {}

    /// The item about to play streams from the network; `bytes` is `0`.
    fn cache_miss(&self, _id: &MediaId, _bytes: u64) {}

    fn feed_item_impression(&self, _id: &MediaId, _index: usize) {}

    fn play_start_request(&self, _id: &MediaId, _index: usize, _trigger: &str) {}

    fn playback_error(&self, _id: &MediaId, _index: usize, _category: &str, _message: &str) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;
impl PlaybackEventReporter for NoopReporter {}

/// Logs every event at debug level, then forwards it.
pub struct TracingReporter<R: ?Sized> {
    inner: Arc<R>,
}
impl<R: PlaybackEventReporter + ?Sized> TracingReporter<R> {
    pub fn new(inner: Arc<R>) -> Self {
        Self { inner }
    }
}

/// Wrap `reporter` in a [`TracingReporter`] when `enabled`.
pub fn with_tracing(reporter: ReporterHandle, enabled: bool) -> ReporterHandle {
    if enabled { Arc::new(TracingReporter::new(reporter)) } else { reporter }
}

impl<R: PlaybackEventReporter + ?Sized> PlaybackEventReporter for TracingReporter<R> {
    fn preload_scheduled(&self, id: &MediaId, index: usize, distance: isize, mode: PreloadMode) {
        tracing::debug!(%id, index, distance, %mode, "preload_scheduled");
        self.inner.preload_scheduled(id, index, distance, mode);
    }

    fn preload_completed(&self, id: &MediaId, index: usize, bytes: u64, elapsed: Duration, from_cache: bool) {
        tracing::debug!(%id, index, bytes, elapsed_ms = elapsed.as_millis() as u64, from_cache, "preload_completed");
        self.inner.preload_completed(id, index, bytes, elapsed, from_cache);
    }

    fn preload_canceled(&self, id: &MediaId, index: usize, reason: &str) {
        tracing::debug!(%id, index, reason, "preload_canceled");
        self.inner.preload_canceled(id, index, reason);
    }

    fn cache_hit(&self, id: &MediaId, bytes: u64) {
        tracing::debug!(%id, bytes, "cache_hit");
        self.inner.cache_hit(id, bytes);
    }

    fn cache_miss(&self, id: &MediaId, bytes: u64) {
        tracing::debug!(%id, bytes, "cache_miss");
        self.inner.cache_miss(id, bytes);
    }

    fn feed_item_impression(&self, id: &MediaId, index: usize) {
        tracing::debug!(%id, index, "feed_item_impression");
        self.inner.feed_item_impression(id, index);
    }

    fn play_start_request(&self, id: &MediaId, index: usize, trigger: &str) {
        tracing::debug!(%id, index, trigger, "play_start_request");
        self.inner.play_start_request(id, index, trigger);
    }

    fn playback_error(&self, id: &MediaId, index: usize, category: &str, message: &str) {
        tracing::debug!(%id, index, category, message, "playback_error");
        self.inner.playback_error(id, index, category, message);
    }
}
