use crate::error::{ErrorKind, Result};
use crate::handoff::{Handoff, ItemListener};
use crate::reporter::{NoopReporter, ReporterHandle, with_tracing};
use crate::surface::{NoopListener, PlaybackListener, PlayerSurface};
use exn::ResultExt;
use preroll_asyncutils::Dispatcher;
use preroll_cache::error::ErrorKind as CacheErrorKind;
use preroll_cache::{CacheOptions, DownloadCache};
use preroll_config::{Config, PreloadPolicy};
use preroll_fetch::DownloaderHandle;
use preroll_media::{CacheKey, MediaDescriptor};
use preroll_prefetch::{PlayabilityProbe, PrefetchRegistry, Subscription};
use preroll_schedule::{CancelReason, PreloadEventScheduler, PreloadMode, PreloadWindow, ScheduleEvent};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::runtime::Handle;

/// Assembles a [`PlaybackCoordinator`].
pub struct CoordinatorBuilder<P: PlayabilityProbe> {
    config: Config,
    probe: Arc<P>,
    downloader: DownloaderHandle,
    surface: Arc<dyn PlayerSurface<P::Media>>,
    listener: Arc<dyn PlaybackListener>,
    reporter: ReporterHandle,
    trace_events: bool,
}

impl<P: PlayabilityProbe> CoordinatorBuilder<P> {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn policy(mut self, policy: PreloadPolicy) -> Self {
        self.config.policy = policy;
        self
    }

    pub fn cache_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.config.cache.directory = Some(directory.into());
        self
    }

    pub fn listener(mut self, listener: Arc<dyn PlaybackListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn reporter(mut self, reporter: ReporterHandle) -> Self {
        self.reporter = reporter;
        self
    }

    /// Log every telemetry event through `tracing` before reporting it.
    pub fn trace_events(mut self, enabled: bool) -> Self {
        self.trace_events = enabled;
        self
    }

    /// Open the download cache and start the registry.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<PlaybackCoordinator<P>> {
        self.config.validate().map_err(|err| err.raise(ErrorKind::Config))?;
        let runtime = Handle::try_current().or_raise(|| ErrorKind::Runtime)?;
        let policy = self.config.policy;

        let options = CacheOptions::from_policy(self.config.cache.directory(), &policy);
        let cache = DownloadCache::open(options, self.downloader).map_err(|err| err.raise(ErrorKind::Cache))?;
        let dispatcher = Dispatcher::spawn_on(&runtime);
        let registry = PrefetchRegistry::new(self.probe, dispatcher, policy.registry_capacity())
            .map_err(|err| err.raise(ErrorKind::Registry))?;

        let reporter = with_tracing(self.reporter, self.trace_events);
        let handoff = Arc::new(Handoff::new(
            registry.clone(),
            cache.clone(),
            self.surface,
            self.listener,
            Arc::clone(&reporter),
        ));
        tracing::info!(
            prepared = policy.prepared_len(),
            disk = policy.disk_prefetch_next,
            registry_capacity = policy.registry_capacity(),
            secondary_player = policy.use_prepared_next_player,
            cache = %cache.directory().display(),
            "Playback coordinator ready",
        );

        Ok(PlaybackCoordinator {
            scheduler: PreloadEventScheduler::new(policy.clone()),
            policy,
            registry,
            cache,
            reporter,
            handoff,
            runtime,
            feed: Vec::new(),
            active: None,
            center: None,
            prepared: BTreeMap::new(),
            downloads: BTreeSet::new(),
            failed: Arc::default(),
            rejected: BTreeSet::new(),
            backgrounded: false,
            released: false,
        })
    }
}

/// Drives preloading for a vertically scrolling feed.
///
/// Every position change re-centers the preload window. Items entering the
/// prepared range are registered with the [`PrefetchRegistry`], items in the
/// disk range are downloaded through the [`DownloadCache`], and items leaving
/// the window are evicted or cancelled unless they are the one playing. The
/// active item's prepared media is handed to the [`PlayerSurface`] as soon as
/// it is both active and ready.
///
/// Single-writer: driven with `&mut self` from the UI's stream of feed and
/// position updates. Listener callbacks arrive on the coordinator's
/// [`Dispatcher`]. Dropping the coordinator releases it.
pub struct PlaybackCoordinator<P: PlayabilityProbe> {
    policy: PreloadPolicy,
    scheduler: PreloadEventScheduler,
    registry: PrefetchRegistry<P>,
    cache: DownloadCache,
    reporter: ReporterHandle,
    handoff: Arc<Handoff<P>>,
    runtime: Handle,
    feed: Vec<MediaDescriptor>,
    active: Option<usize>,
    /// Where the window is centered; the active index unless a scroll hint
    /// moved it ahead.
    center: Option<usize>,
    prepared: BTreeMap<usize, Subscription>,
    downloads: BTreeSet<usize>,
    /// Keys whose disk prefetch failed since the last scheduling pass.
    failed: Arc<Mutex<HashSet<CacheKey>>>,
    /// Indices whose descriptors failed validation; never retried.
    rejected: BTreeSet<usize>,
    backgrounded: bool,
    released: bool,
}

impl<P: PlayabilityProbe> PlaybackCoordinator<P> {
    pub fn builder(
        probe: Arc<P>,
        downloader: DownloaderHandle,
        surface: Arc<dyn PlayerSurface<P::Media>>,
    ) -> CoordinatorBuilder<P> {
        CoordinatorBuilder {
            config: Config::default(),
            probe,
            downloader,
            surface,
            listener: Arc::new(NoopListener),
            reporter: Arc::new(NoopReporter),
            trace_events: false,
        }
    }

    pub fn policy(&self) -> &PreloadPolicy {
        &self.policy
    }

    pub fn feed(&self) -> &[MediaDescriptor] {
        &self.feed
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn registry(&self) -> &PrefetchRegistry<P> {
        &self.registry
    }

    pub fn cache(&self) -> &DownloadCache {
        &self.cache
    }

    /// The context listener callbacks run on.
    pub fn dispatcher(&self) -> &Dispatcher {
        self.registry.dispatcher()
    }

    /// Indices currently registered for in-memory preparation.
    pub fn prepared_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.prepared.keys().copied()
    }

    /// Indices currently scheduled for disk prefetch.
    pub fn download_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.downloads.iter().copied()
    }

    /// `true` once the active item's media has been handed to the player.
    pub fn is_attached(&self) -> bool {
        self.handoff.is_attached()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Replace the whole feed.
    ///
    /// All scheduled work is cancelled with reason `feed_update`, except for
    /// the item playing. The active index is clamped to the new feed; if a
    /// different item ends up there it is activated afresh.
    pub fn set_feed(&mut self, items: Vec<MediaDescriptor>) {
        if self.released {
            return;
        }
        self.reset_schedule(CancelReason::FeedUpdate);
        let playing = self.playing_key();
        let kept = self.active.and_then(|index| self.prepared.remove(&index));
        self.stop_all(playing);
        self.rejected.clear();
        self.feed = items;
        self.center = None;
        tracing::debug!(items = self.feed.len(), "Feed replaced");

        let Some(previous) = self.active else {
            return;
        };
        let Some(last) = self.feed.len().checked_sub(1) else {
            drop(kept);
            self.evict_unless_prepared(playing);
            self.active = None;
            self.handoff.deactivate();
            return;
        };
        let index = previous.min(last);
        if playing.is_some() && Some(self.feed[index].cache_key()) == playing {
            if let Some(subscription) = kept {
                self.prepared.insert(index, subscription);
            }
            self.active = Some(index);
            self.center = Some(index);
            self.reschedule(index);
        } else {
            drop(kept);
            self.evict_unless_prepared(playing);
            self.active = None;
            self.set_active_index(index);
        }
    }

    /// Add items to the end of the feed.
    ///
    /// The first items ever appended to an empty, inactive feed activate
    /// index `0`.
    pub fn append_feed(&mut self, items: impl IntoIterator<Item = MediaDescriptor>) {
        if self.released {
            return;
        }
        let was_empty = self.feed.is_empty();
        self.feed.extend(items);
        if self.feed.is_empty() {
            return;
        }
        tracing::debug!(items = self.feed.len(), "Feed extended");
        if was_empty && self.active.is_none() {
            self.set_active_index(0);
        } else if let Some(center) = self.center {
            self.reschedule(center);
        }
    }

    /// The feed settled on `index`.
    pub fn on_position_changed(&mut self, index: usize) {
        self.set_active_index(index);
    }

    /// Make `index` the playing item and re-center the window on it.
    ///
    /// Out-of-range indices are ignored.
    pub fn set_active_index(&mut self, index: usize) {
        if self.released || self.active == Some(index) {
            return;
        }
        let Some(descriptor) = self.feed.get(index).cloned() else {
            tracing::trace!(index, items = self.feed.len(), "Ignoring out of range active index");
            return;
        };
        tracing::debug!(index, id = %descriptor.id(), "Active feed item changed");
        self.reporter.feed_item_impression(descriptor.id(), index);
        self.reporter.play_start_request(descriptor.id(), index, "active_index");
        self.active = Some(index);
        self.center = Some(index);
        self.refresh_consumed(index, descriptor.cache_key());
        self.handoff.activate(index, descriptor);
        self.reschedule(index);
        self.handoff.try_attach();
    }

    /// The UI expects to land on `predicted`; preload around it without
    /// changing what's playing.
    pub fn set_scroll_hint(&mut self, predicted: usize) {
        if self.released || predicted >= self.feed.len() || self.center == Some(predicted) {
            return;
        }
        tracing::trace!(predicted, "Scroll hint");
        self.center = Some(predicted);
        self.reschedule(predicted);
    }

    /// Stop all running disk prefetch while in the background. Prepared
    /// players and finished downloads are kept.
    pub fn on_app_background(&mut self) {
        if self.released || self.backgrounded {
            return;
        }
        self.backgrounded = true;
        let (running, finished): (BTreeSet<usize>, BTreeSet<usize>) = std::mem::take(&mut self.downloads)
            .into_iter()
            .partition(|&index| self.feed.get(index).is_some_and(|item| self.cache.is_in_flight(item)));
        self.downloads = finished;

        let feed = &self.feed;
        let events = self.scheduler.cancel(running.iter().copied(), CancelReason::Background, |index| {
            feed.get(index).map(|item| item.id().clone())
        });
        self.report(&events);
        let playing = self.playing_key();
        for &index in &running {
            self.cancel_download(index, playing);
        }
        tracing::debug!(canceled = running.len(), "Preloading paused for background");
    }

    pub fn on_app_foreground(&mut self) {
        if self.released || !self.backgrounded {
            return;
        }
        self.backgrounded = false;
        tracing::debug!("Preloading resumed");
        if let Some(center) = self.center {
            self.reschedule(center);
        }
        self.handoff.try_attach();
    }

    /// Tear down: cancel everything scheduled, dispose every registry entry
    /// and cancel every download. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.reset_schedule(CancelReason::Release);
        self.released = true;
        self.prepared.clear();
        self.downloads.clear();
        self.handoff.deactivate();
        let evicted = self.registry.evict_all();
        let canceled = self.cache.cancel_all();
        tracing::info!(evicted, canceled, "Playback coordinator released");
    }

    fn playing_key(&self) -> Option<CacheKey> {
        self.active.and_then(|index| self.feed.get(index)).map(MediaDescriptor::cache_key)
    }

    fn reset_schedule(&mut self, reason: CancelReason) {
        let feed = &self.feed;
        let events = self.scheduler.reset(reason, |index| feed.get(index).map(|item| item.id().clone()));
        self.report(&events);
    }

    fn reschedule(&mut self, center: usize) {
        if self.released || self.backgrounded {
            return;
        }
        let feed = &self.feed;
        let result = self.scheduler.update(center, feed.len(), |index| feed.get(index).map(|item| item.id().clone()));
        self.report(&result.events);
        self.apply(&result.window);
    }

    /// An item handed to the player earlier has nothing left in the
    /// registry; drop its entry so the next pass prepares it afresh.
    fn refresh_consumed(&mut self, index: usize, key: CacheKey) {
        if !self.registry.is_consumed(&key) {
            return;
        }
        tracing::debug!(index, key = %key, "Preparing previously attached item again");
        self.prepared.retain(|_, subscription| *subscription.key() != key);
        self.registry.evict(&key);
    }

    /// Forget downloads that failed since the last pass, so the window
    /// starts them again.
    fn forget_failed_downloads(&mut self) {
        let failed = std::mem::take(&mut *self.failed.lock().unwrap_or_else(PoisonError::into_inner));
        if failed.is_empty() {
            return;
        }
        let (feed, cache) = (&self.feed, &self.cache);
        self.downloads.retain(|&index| {
            feed.get(index).is_none_or(|item| !failed.contains(&item.cache_key()) || cache.is_in_flight(item))
        });
    }

    /// Bring registrations and downloads in line with `window`.
    fn apply(&mut self, window: &PreloadWindow) {
        self.forget_failed_downloads();
        let mut memory: BTreeSet<usize> = window
            .prepared
            .iter()
            .copied()
            .filter(|&index| self.policy.use_prepared_next_player || Some(index) == self.active)
            .collect();
        memory.extend(self.active);
        let disk: BTreeSet<usize> = window.all().difference(&memory).copied().collect();

        let playing = self.playing_key();
        let stale: Vec<usize> = self.prepared.keys().copied().filter(|index| !memory.contains(index)).collect();
        for index in stale {
            if let Some(subscription) = self.prepared.remove(&index) {
                let key = *subscription.key();
                drop(subscription);
                self.evict_unless_prepared(Some(key).filter(|key| Some(*key) != playing));
            }
        }
        let stale: Vec<usize> = self.downloads.iter().copied().filter(|index| !disk.contains(index)).collect();
        for index in stale {
            self.downloads.remove(&index);
            self.cancel_download(index, playing);
        }

        for index in memory {
            if !self.prepared.contains_key(&index) && self.accept(index) {
                self.start_prepared(index);
            }
        }
        for index in disk {
            if !self.downloads.contains(&index) && self.accept(index) {
                self.start_download(index);
            }
        }
    }

    /// Validate an index's descriptor once; rejected items are reported and
    /// skipped from then on.
    fn accept(&mut self, index: usize) -> bool {
        if self.rejected.contains(&index) {
            return false;
        }
        let Some(descriptor) = self.feed.get(index) else {
            return false;
        };
        let Err(err) = descriptor.validate() else {
            return true;
        };
        tracing::warn!(index, id = %descriptor.id(), error = ?err, "Skipping feed item with invalid descriptor");
        self.reporter.preload_canceled(descriptor.id(), index, "error");
        if Some(index) == self.active {
            self.reporter.playback_error(descriptor.id(), index, "invalid_media", &(*err).to_string());
            let id = descriptor.id().clone();
            let handoff = Arc::downgrade(&self.handoff);
            self.dispatcher().dispatch(move || {
                if let Some(handoff) = handoff.upgrade() {
                    handoff.listener().on_error(&id, &ErrorKind::InvalidMedia);
                }
            });
        }
        self.rejected.insert(index);
        false
    }

    fn start_prepared(&mut self, index: usize) {
        let Some(descriptor) = self.feed.get(index) else {
            return;
        };
        let listener = Arc::new(ItemListener::new(descriptor.id().clone(), index, Arc::downgrade(&self.handoff)));
        match self.registry.register(descriptor, listener) {
            Ok(subscription) => {
                tracing::trace!(index, id = %descriptor.id(), "Preparing feed item");
                self.prepared.insert(index, subscription);
            },
            Err(err) => {
                tracing::warn!(index, id = %descriptor.id(), error = ?err, "Could not register feed item");
                self.reporter.preload_canceled(descriptor.id(), index, "error");
            },
        }
    }

    fn start_download(&mut self, index: usize) {
        let Some(descriptor) = self.feed.get(index) else {
            return;
        };
        self.downloads.insert(index);
        let prefetch = self.cache.prefetch(descriptor);
        let id = descriptor.id().clone();
        let key = descriptor.cache_key();
        let reporter = Arc::clone(&self.reporter);
        let failed = Arc::clone(&self.failed);
        let dispatcher = self.dispatcher().clone();
        let handoff = Arc::downgrade(&self.handoff);
        let started = Instant::now();
        self.runtime.spawn(async move {
            match prefetch.await {
                Ok(fetched) => {
                    reporter.preload_completed(&id, index, fetched.bytes, started.elapsed(), fetched.from_cache);
                },
                Err(err) if *err == CacheErrorKind::Cancelled => {
                    tracing::trace!(%id, index, "Disk prefetch cancelled");
                },
                Err(err) => {
                    tracing::debug!(%id, index, error = ?err, "Disk prefetch failed");
                    failed.lock().unwrap_or_else(PoisonError::into_inner).insert(key);
                    reporter.preload_canceled(&id, index, "error");
                    let cause = ErrorKind::Download((*err).clone());
                    dispatcher.dispatch(move || {
                        if let Some(handoff) = handoff.upgrade() {
                            handoff.listener().on_error(&id, &cause);
                        }
                    });
                },
            }
        });
    }

    fn cancel_download(&self, index: usize, playing: Option<CacheKey>) {
        let Some(descriptor) = self.feed.get(index) else {
            return;
        };
        if Some(descriptor.cache_key()) != playing {
            self.cache.cancel_prefetch(descriptor);
        }
    }

    /// Evict `key` from the registry unless another index still holds a
    /// registration for it.
    fn evict_unless_prepared(&self, key: Option<CacheKey>) {
        let Some(key) = key else {
            return;
        };
        if !self.prepared.values().any(|subscription| *subscription.key() == key) {
            self.registry.evict(&key);
        }
    }

    /// Drop every registration and cancel every download except for `playing`.
    fn stop_all(&mut self, playing: Option<CacheKey>) {
        for subscription in std::mem::take(&mut self.prepared).into_values() {
            let key = *subscription.key();
            drop(subscription);
            if Some(key) != playing {
                self.registry.evict(&key);
            }
        }
        for index in std::mem::take(&mut self.downloads) {
            self.cancel_download(index, playing);
        }
    }

    fn report(&self, events: &[ScheduleEvent]) {
        for event in events {
            match event {
                ScheduleEvent::Scheduled { id, index, distance, mode } => {
                    self.reporter.preload_scheduled(id, *index, *distance, self.effective_mode(*index, *mode));
                },
                ScheduleEvent::Canceled { id, index, reason } => {
                    self.reporter.preload_canceled(id, *index, &reason.to_string());
                },
            }
        }
    }

    /// Without a secondary player only the active item is prepared in memory.
    fn effective_mode(&self, index: usize, mode: PreloadMode) -> PreloadMode {
        match mode {
            PreloadMode::Prepared if !self.policy.use_prepared_next_player && Some(index) != self.active => {
                PreloadMode::Disk
            },
            mode => mode,
        }
    }
}

impl<P: PlayabilityProbe> Drop for PlaybackCoordinator<P> {
    fn drop(&mut self) {
        self.release();
    }
}
