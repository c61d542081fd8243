use crate::error::ErrorKind;
use crate::reporter::ReporterHandle;
use crate::surface::{PlaybackListener, PlayerSurface};
use preroll_cache::DownloadCache;
use preroll_media::{CacheKey, MediaDescriptor, MediaId};
use preroll_prefetch::error::ErrorKind as PrefetchErrorKind;
use preroll_prefetch::{PlayabilityProbe, PrefetchListener, PrefetchRegistry};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

struct Active {
    index: usize,
    descriptor: MediaDescriptor,
    attached: bool,
}

/// Moves the active item's prepared media from the registry to the player.
///
/// Reached from two directions: the coordinator, when the active index
/// changes, and readiness callbacks on the dispatcher. Whichever first sees
/// the active item ready attaches it; the other finds it already attached.
pub(crate) struct Handoff<P: PlayabilityProbe> {
    registry: PrefetchRegistry<P>,
    cache: DownloadCache,
    surface: Arc<dyn PlayerSurface<P::Media>>,
    listener: Arc<dyn PlaybackListener>,
    reporter: ReporterHandle,
    active: Mutex<Option<Active>>,
}

impl<P: PlayabilityProbe> Handoff<P> {
    pub fn new(
        registry: PrefetchRegistry<P>,
        cache: DownloadCache,
        surface: Arc<dyn PlayerSurface<P::Media>>,
        listener: Arc<dyn PlaybackListener>,
        reporter: ReporterHandle,
    ) -> Self {
        Self { registry, cache, surface, listener, reporter, active: Mutex::new(None) }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Active>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn listener(&self) -> &Arc<dyn PlaybackListener> {
        &self.listener
    }

    pub fn activate(&self, index: usize, descriptor: MediaDescriptor) {
        *self.lock() = Some(Active { index, descriptor, attached: false });
    }

    pub fn deactivate(&self) {
        *self.lock() = None;
    }

    /// Index of the active item, if `key` is the active item.
    pub fn active_index(&self, key: &CacheKey) -> Option<usize> {
        self.lock().as_ref().filter(|active| active.descriptor.cache_key() == *key).map(|active| active.index)
    }

    pub fn is_attached(&self) -> bool {
        self.lock().as_ref().is_some_and(|active| active.attached)
    }

    /// Attach the active item if it is ready and nobody has attached it yet.
    ///
    /// Returns `true` if this call attached it.
    pub fn try_attach(&self) -> bool {
        let mut active = self.lock();
        let Some(item) = active.as_mut().filter(|item| !item.attached) else {
            return false;
        };
        let Some(media) = self.registry.consume(&item.descriptor.cache_key()) else {
            return false;
        };
        item.attached = true;

        let id = item.descriptor.id();
        let cached = self.cache.cached_file_location(&item.descriptor);
        match cached {
            Some(_) => {
                let bytes = self.cache.entry(&item.descriptor.cache_key()).map_or(0, |entry| entry.size);
                self.reporter.cache_hit(id, bytes);
            },
            None => self.reporter.cache_miss(id, 0),
        }
        tracing::debug!(%id, index = item.index, cached = cached.is_some(), "Attaching prepared media to player");
        // Held across `attach`: a later activation can't overtake this one.
        self.surface.attach(&item.descriptor, media, cached.as_deref());
        true
    }
}

/// Registry subscriber for one prepared feed item.
pub(crate) struct ItemListener<P: PlayabilityProbe> {
    id: MediaId,
    index: usize,
    handoff: Weak<Handoff<P>>,
}
impl<P: PlayabilityProbe> ItemListener<P> {
    pub fn new(id: MediaId, index: usize, handoff: Weak<Handoff<P>>) -> Self {
        Self { id, index, handoff }
    }
}

impl<P: PlayabilityProbe> PrefetchListener for ItemListener<P> {
    fn on_ready(&self, _key: &CacheKey) {
        let Some(handoff) = self.handoff.upgrade() else {
            return;
        };
        handoff.listener.on_ready(&self.id);
        handoff.try_attach();
    }

    fn on_error(&self, key: &CacheKey, cause: &PrefetchErrorKind) {
        let Some(handoff) = self.handoff.upgrade() else {
            return;
        };
        handoff.reporter.preload_canceled(&self.id, self.index, "error");
        if let Some(index) = handoff.active_index(key) {
            handoff.reporter.playback_error(&self.id, index, "prepare", &cause.to_string());
        }
        handoff.listener.on_error(&self.id, &ErrorKind::Prepare(cause.clone()));
    }
}
