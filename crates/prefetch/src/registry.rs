use crate::error::{Error, ErrorKind, Result};
use crate::listener::{Notification, PrefetchListener, PrefetchState};
use crate::probe::PlayabilityProbe;
use crate::subscription::{Subscription, Unsubscribe};
use exn::ResultExt;
use preroll_asyncutils::Dispatcher;
use preroll_media::{CacheKey, MediaDescriptor, MediaId};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
struct Subscriber {
    listener: Arc<dyn PrefetchListener>,
    active: Arc<AtomicBool>,
}

struct Entry<M> {
    /// Generation of this entry. Preparation tasks only write to an entry
    /// whose epoch still matches the one they were started for.
    epoch: u64,
    id: MediaId,
    state: PrefetchState,
    media: Option<Arc<M>>,
    /// The media has been handed out; the entry is kept for bookkeeping only.
    consumed: bool,
    subscribers: HashMap<u64, Subscriber>,
    token: CancellationToken,
}

struct Table<M> {
    entries: HashMap<CacheKey, Entry<M>>,
    /// Least recently registered or consumed first.
    usage: VecDeque<CacheKey>,
    max_entries: usize,
    epochs: u64,
    subscribers: u64,
}
impl<M> Table<M> {
    fn live(&mut self, key: &CacheKey, epoch: u64) -> Option<&mut Entry<M>> {
        self.entries.get_mut(key).filter(|entry| entry.epoch == epoch)
    }

    fn mark_used(&mut self, key: CacheKey) {
        self.usage.retain(|used| *used != key);
        self.usage.push_back(key);
    }

    fn remove(&mut self, key: &CacheKey) -> Option<Entry<M>> {
        self.usage.retain(|used| used != key);
        self.entries.remove(key)
    }

    /// Drop least recently used entries beyond capacity, never `keep`.
    fn trim(&mut self, keep: &CacheKey) -> Vec<Entry<M>> {
        let mut evicted = Vec::new();
        let mut cursor = 0;
        while self.entries.len() > self.max_entries && cursor < self.usage.len() {
            if self.usage[cursor] == *keep {
                cursor += 1;
                continue;
            }
            let Some(key) = self.usage.remove(cursor) else {
                break;
            };
            if let Some(entry) = self.entries.remove(&key) {
                evicted.push(entry);
            }
        }
        evicted
    }
}

struct Inner<P: PlayabilityProbe> {
    probe: Arc<P>,
    dispatcher: Dispatcher,
    runtime: Handle,
    table: Mutex<Table<P::Media>>,
}

/// Concurrency-safe registry of prepared media, one entry per [`CacheKey`].
///
/// All state lives behind a single lock. Preparation and probing run on
/// background tasks outside it; the lock is only retaken to commit a state
/// change and to queue the matching notifications on the [`Dispatcher`].
///
/// Cloning shares the same registry.
pub struct PrefetchRegistry<P: PlayabilityProbe> {
    inner: Arc<Inner<P>>,
}
impl<P: PlayabilityProbe> Clone for PrefetchRegistry<P> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<P: PlayabilityProbe> PrefetchRegistry<P> {
    /// Create a registry keeping at most `max_entries` entries alive.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(probe: Arc<P>, dispatcher: Dispatcher, max_entries: usize) -> Result<Self> {
        let runtime = Handle::try_current().or_raise(|| ErrorKind::Runtime)?;
        let table = Table {
            entries: HashMap::new(),
            usage: VecDeque::new(),
            max_entries: max_entries.max(1),
            epochs: 0,
            subscribers: 0,
        };
        Ok(Self { inner: Arc::new(Inner { probe, dispatcher, runtime, table: Mutex::new(table) }) })
    }

    /// Subscribe to `descriptor`, starting preparation if nobody has yet.
    ///
    /// The listener is told the entry's current state straight away
    /// (asynchronously, on the dispatcher), then every later transition.
    /// Invalid descriptors fail with [`InvalidMedia`](ErrorKind::InvalidMedia)
    /// and create nothing.
    pub fn register(&self, descriptor: &MediaDescriptor, listener: Arc<dyn PrefetchListener>) -> Result<Subscription> {
        descriptor.validate().map_err(|err| err.raise(ErrorKind::InvalidMedia))?;
        let key = descriptor.cache_key();
        let active = Arc::new(AtomicBool::new(true));
        let subscriber = Subscriber { listener, active: Arc::clone(&active) };

        let mut table = self.inner.lock();
        table.subscribers += 1;
        let subscriber_id = table.subscribers;
        let started = match table.entries.get(&key) {
            Some(_) => None,
            None => {
                table.epochs += 1;
                let epoch = table.epochs;
                let token = CancellationToken::new();
                table.entries.insert(key, Entry {
                    epoch,
                    id: descriptor.id().clone(),
                    state: PrefetchState::Idle,
                    media: None,
                    consumed: false,
                    subscribers: HashMap::new(),
                    token: token.clone(),
                });
                Some((epoch, token))
            },
        };
        if let Some(entry) = table.entries.get_mut(&key) {
            entry.subscribers.insert(subscriber_id, subscriber.clone());
            if let Some(notification) = Notification::for_state(entry.state) {
                self.inner.notify(key, vec![subscriber], notification);
            }
            tracing::trace!(key = %key, id = %entry.id, state = %entry.state, subscribers = entry.subscribers.len(), "Registered prefetch subscriber");
        }
        table.mark_used(key);
        let evicted = table.trim(&key);
        drop(table);

        if let Some((epoch, token)) = started {
            tracing::debug!(key = %key, id = %descriptor.id(), probe = self.inner.probe.name(), "Preparing media");
            let inner = Arc::clone(&self.inner);
            let descriptor = descriptor.clone();
            self.inner.runtime.spawn(async move { inner.prepare(key, epoch, descriptor, token).await });
        }
        for entry in evicted {
            tracing::debug!(id = %entry.id, "Registry over capacity; disposing least recently used entry");
            self.inner.dispose(entry);
        }

        let registry: Weak<dyn Unsubscribe> = Arc::downgrade(&self.inner) as Weak<Inner<P>>;
        Ok(Subscription::new(registry, key, subscriber_id, active))
    }

    /// Take the prepared media for a ready entry.
    ///
    /// One-shot: the registry forgets the handle (and will never release it),
    /// so a second call returns `None` until the key is registered afresh.
    pub fn consume(&self, key: &CacheKey) -> Option<Arc<P::Media>> {
        let mut table = self.inner.lock();
        let entry = table.entries.get_mut(key)?;
        if entry.state != PrefetchState::Ready {
            return None;
        }
        let media = entry.media.take()?;
        entry.consumed = true;
        tracing::debug!(key = %key, id = %entry.id, "Handing prepared media to player");
        table.mark_used(*key);
        Some(media)
    }

    /// `true` if the entry for `key` has already handed its media out.
    ///
    /// A consumed entry has nothing left to give; evict it and register again
    /// to prepare the media afresh.
    pub fn is_consumed(&self, key: &CacheKey) -> bool {
        self.inner.lock().entries.get(key).is_some_and(|entry| entry.consumed)
    }

    /// Force-dispose the entry for `key`, whoever is subscribed.
    ///
    /// Cancels preparation, releases any media still owned by the registry and
    /// silences every subscriber. Returns `false` if there was no entry.
    pub fn evict(&self, key: &CacheKey) -> bool {
        let Some(entry) = self.inner.lock().remove(key) else {
            return false;
        };
        tracing::debug!(key = %key, id = %entry.id, state = %entry.state, "Evicting prefetch entry");
        self.inner.dispose(entry);
        true
    }

    /// Dispose every entry. Used on teardown.
    pub fn evict_all(&self) -> usize {
        let entries: Vec<Entry<P::Media>> = {
            let mut table = self.inner.lock();
            table.usage.clear();
            table.entries.drain().map(|(_, entry)| entry).collect()
        };
        let count = entries.len();
        entries.into_iter().for_each(|entry| self.inner.dispose(entry));
        count
    }

    /// Current state for `key`; `None` if there's no live entry.
    pub fn state(&self, key: &CacheKey) -> Option<PrefetchState> {
        self.inner.lock().entries.get(key).map(|entry| entry.state)
    }

    pub fn subscriber_count(&self, key: &CacheKey) -> usize {
        self.inner.lock().entries.get(key).map_or(0, |entry| entry.subscribers.len())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }
}

impl<P: PlayabilityProbe> Inner<P> {
    fn lock(&self) -> MutexGuard<'_, Table<P::Media>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `notification` for `targets`. Called with the lock held so
    /// notifications keep the order of the transitions that caused them.
    fn notify(&self, key: CacheKey, targets: Vec<Subscriber>, notification: Notification) {
        self.dispatcher.dispatch(move || {
            for target in targets {
                if target.active.load(Ordering::Acquire) {
                    notification.deliver(target.listener.as_ref(), &key);
                }
            }
        });
    }

    fn notify_all(&self, key: CacheKey, entry: &Entry<P::Media>, notification: Notification) {
        self.notify(key, entry.subscribers.values().cloned().collect(), notification);
    }

    /// Tear down an entry already removed from the table.
    fn dispose(&self, entry: Entry<P::Media>) {
        entry.token.cancel();
        for subscriber in entry.subscribers.values() {
            subscriber.active.store(false, Ordering::Release);
        }
        if let Some(media) = entry.media {
            self.probe.release(&media);
        }
    }

    async fn prepare(self: Arc<Self>, key: CacheKey, epoch: u64, descriptor: MediaDescriptor, token: CancellationToken) {
        let prepared = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            prepared = self.probe.prepare(&descriptor) => prepared,
        };
        let media = match prepared {
            Ok(media) => Arc::new(media),
            Err(err) => return self.fail(key, epoch, err),
        };

        let committed = {
            let mut table = self.lock();
            match table.live(&key, epoch) {
                Some(entry) => {
                    entry.media = Some(Arc::clone(&media));
                    entry.state = PrefetchState::Buffering;
                    self.notify_all(key, entry, Notification::Buffering);
                    true
                },
                None => false,
            }
        };
        if !committed {
            // Evicted while preparing: nobody else will ever see this handle.
            self.probe.release(&media);
            return;
        }

        let probed = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            probed = self.probe.probe(&media) => probed,
        };
        drop(media);
        match probed {
            Ok(()) => {
                let mut table = self.lock();
                if let Some(entry) = table.live(&key, epoch) {
                    entry.state = PrefetchState::Ready;
                    tracing::debug!(key = %key, id = %entry.id, subscribers = entry.subscribers.len(), "Media ready");
                    self.notify_all(key, entry, Notification::Ready);
                }
            },
            Err(err) => self.fail(key, epoch, err),
        }
    }

    /// Move a live entry to `Error`: tell every subscriber, then drop the
    /// entry so the next registration starts from scratch.
    fn fail(&self, key: CacheKey, epoch: u64, err: Error) {
        let cause = (*err).clone();
        let entry = {
            let mut table = self.lock();
            if table.live(&key, epoch).is_none() {
                return;
            }
            let Some(mut entry) = table.remove(&key) else {
                return;
            };
            entry.state = PrefetchState::Error;
            self.notify_all(key, &entry, Notification::Error(cause));
            entry
        };
        tracing::warn!(key = %key, id = %entry.id, error = ?err, "Media preparation failed");
        if let Some(media) = entry.media {
            self.probe.release(&media);
        }
    }
}

impl<P: PlayabilityProbe> Unsubscribe for Inner<P> {
    fn unsubscribe(&self, key: &CacheKey, subscriber: u64) {
        let mut table = self.lock();
        if let Some(entry) = table.entries.get_mut(key)
            && entry.subscribers.remove(&subscriber).is_some()
        {
            tracing::trace!(key = %key, remaining = entry.subscribers.len(), "Prefetch subscriber disposed");
        }
    }
}
