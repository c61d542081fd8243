use crate::error::{ErrorKind, Result};
use crate::index::{CacheEntry, InFlight, Index, Waiter};
use crate::prefetch::{Fetched, Prefetch};
use exn::ResultExt;
use preroll_config::PreloadPolicy;
use preroll_fetch::error::ErrorKind as FetchErrorKind;
use preroll_fetch::{DownloadRequest, DownloaderHandle};
use preroll_media::{CacheKey, MediaDescriptor};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

const STAGING_DIRECTORY: &str = ".staging";

/// How a [`DownloadCache`] is laid out and bounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOptions {
    /// Absolute directory exclusively owned by the cache.
    pub directory: PathBuf,
    /// Total byte ceiling; `0` disables trimming.
    pub max_bytes: u64,
    /// Physical downloads allowed at once.
    pub max_concurrent: usize,
    /// Bytes to fetch per resource; `None` fetches everything.
    pub byte_target: Option<u64>,
}
impl CacheOptions {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self::from_policy(directory, &PreloadPolicy::default())
    }

    pub fn from_policy(directory: impl Into<PathBuf>, policy: &PreloadPolicy) -> Self {
        Self {
            directory: directory.into(),
            max_bytes: policy.cache_max_bytes,
            max_concurrent: policy.max_concurrent_prefetch,
            byte_target: policy.byte_target(),
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }
}

/// Deduplicated, size-bounded on-disk cache of downloaded media.
///
/// - At most one physical download per [`CacheKey`] runs at a time; every
///   caller asking for the same key while it runs waits on that download.
/// - Downloads land in `<directory>/.staging` and are only moved to
///   `<directory>/<key>.<ext>` once complete, so a partial file can never be
///   served.
/// - After every completed download, least recently used files are deleted
///   until the directory fits within `max_bytes`.
///
/// Cloning is cheap and shares the same cache.
#[derive(Clone)]
pub struct DownloadCache {
    inner: Arc<Inner>,
}

struct Inner {
    root: PathBuf,
    staging: PathBuf,
    max_bytes: u64,
    byte_target: Option<u64>,
    downloader: DownloaderHandle,
    runtime: Handle,
    permits: Arc<Semaphore>,
    index: Mutex<Index>,
}

impl DownloadCache {
    /// Open (or create) a cache directory and index whatever is already in it.
    ///
    /// Leftover staging files from a previous run are deleted, and the cache
    /// is trimmed to `max_bytes` before returning. Must be called from within
    /// a tokio runtime; downloads are spawned onto it.
    pub fn open(options: CacheOptions, downloader: DownloaderHandle) -> Result<Self> {
        let runtime = Handle::try_current().or_raise(|| ErrorKind::Runtime)?;
        let root = options.directory;
        if !root.is_absolute() || (root.exists() && !root.is_dir()) {
            exn::bail!(ErrorKind::InvalidDirectory(root));
        }
        let staging = root.join(STAGING_DIRECTORY);
        // Non-async on purpose: this only happens once when the cache is opened.
        if staging.exists() {
            fs::remove_dir_all(&staging).or_raise(|| ErrorKind::Io)?;
        }
        fs::create_dir_all(&staging).or_raise(|| ErrorKind::Io)?;

        let mut index = Index::rebuild(&root)?;
        for entry in index.trim_to_size(options.max_bytes) {
            discarded(&entry, fs::remove_file(&entry.path));
        }
        tracing::info!(
            directory = %root.display(),
            downloader = downloader.name(),
            entries = index.len(),
            bytes = index.total_bytes(),
            max_bytes = options.max_bytes,
            "Opened download cache",
        );

        Ok(Self {
            inner: Arc::new(Inner {
                root,
                staging,
                max_bytes: options.max_bytes,
                byte_target: options.byte_target,
                downloader,
                runtime,
                permits: Arc::new(Semaphore::new(options.max_concurrent.max(1))),
                index: Mutex::new(index),
            }),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.inner.root
    }

    /// Location of the cached file for `descriptor`, if it's fully downloaded.
    ///
    /// Counts as an access for eviction ordering, and bumps the file's mtime
    /// so the ordering survives a restart.
    pub fn cached_file_location(&self, descriptor: &MediaDescriptor) -> Option<PathBuf> {
        if descriptor.validate().is_err() {
            return None;
        }
        self.inner.lookup(&descriptor.cache_key()).map(|entry| entry.path)
    }

    /// Make sure `descriptor` ends up in the cache.
    ///
    /// Returns immediately. The returned [`Prefetch`] resolves:
    /// - straight away with `from_cache = true` if the file is already cached;
    /// - when the running download for the same key finishes, if there is one;
    /// - otherwise when a newly started download finishes.
    ///
    /// Invalid descriptors resolve straight away with
    /// [`InvalidMedia`](ErrorKind::InvalidMedia) and start nothing.
    pub fn prefetch(&self, descriptor: &MediaDescriptor) -> Prefetch {
        if let Err(err) = descriptor.validate() {
            tracing::debug!(id = %descriptor.id(), error = %*err, "Refusing to prefetch invalid media");
            return Prefetch::ready(Err(err.raise(ErrorKind::InvalidMedia)));
        }
        let key = descriptor.cache_key();
        if let Some(entry) = self.inner.lookup(&key) {
            tracing::trace!(key = %key, "Prefetch served from cache");
            return Prefetch::ready(Ok(Fetched { key, path: entry.path, bytes: entry.size, from_cache: true }));
        }

        let (sender, receiver) = oneshot::channel();
        let mut index = self.inner.lock();
        if let Some(in_flight) = index.in_flight.get_mut(&key) {
            tracing::trace!(key = %key, waiters = in_flight.waiters.len() + 1, "Joining in-flight download");
            in_flight.waiters.push(sender);
            return Prefetch::waiting(receiver);
        }
        // The lookup above ran without the lock; a download may have committed since.
        if let Some(entry) = index.peek(&key) {
            let fetched = Fetched { key, path: entry.path.clone(), bytes: entry.size, from_cache: true };
            index.touch(&key);
            return Prefetch::ready(Ok(fetched));
        }
        let id = index.next_download_id();
        let token = CancellationToken::new();
        index.in_flight.insert(key, InFlight { id, token: token.clone(), waiters: vec![sender] });
        drop(index);

        let request = DownloadRequest::for_media(descriptor, self.inner.byte_target);
        let extension = descriptor.container().extension();
        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(async move { inner.run_download(key, id, request, extension, token).await });
        Prefetch::waiting(receiver)
    }

    /// Cancel the running download for `descriptor`.
    ///
    /// Anyone waiting on it receives [`Cancelled`](ErrorKind::Cancelled).
    /// Returns `false` if nothing was in flight for it.
    pub fn cancel_prefetch(&self, descriptor: &MediaDescriptor) -> bool {
        let key = descriptor.cache_key();
        let Some(in_flight) = self.inner.lock().in_flight.remove(&key) else {
            return false;
        };
        tracing::debug!(key = %key, id = %descriptor.id(), "Cancelled prefetch");
        Self::cancel(in_flight);
        true
    }

    /// Cancel every running download.
    pub fn cancel_all(&self) -> usize {
        let in_flight: Vec<InFlight> = self.inner.lock().in_flight.drain().map(|(_, in_flight)| in_flight).collect();
        let count = in_flight.len();
        in_flight.into_iter().for_each(Self::cancel);
        if count > 0 {
            tracing::debug!(count, "Cancelled all prefetches");
        }
        count
    }

    fn cancel(in_flight: InFlight) {
        in_flight.token.cancel();
        for waiter in in_flight.waiters {
            let _ = waiter.send(Err(ErrorKind::Cancelled.into()));
        }
    }

    pub fn is_in_flight(&self, descriptor: &MediaDescriptor) -> bool {
        self.inner.lock().in_flight.contains_key(&descriptor.cache_key())
    }

    /// Metadata for a cached key, without counting as an access.
    pub fn entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.inner.lock().peek(key).cloned()
    }

    /// Bytes currently held by completed cache files.
    pub fn total_bytes(&self) -> u64 {
        self.inner.lock().total_bytes()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Index> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Find and touch an entry, forgetting it if its file has disappeared.
    ///
    /// The index lock is never held across file system calls.
    fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        let path = self.lock().peek(key)?.path.clone();
        if !path.is_file() {
            tracing::debug!(key = %key, path = %path.display(), "Cached file vanished; dropping entry");
            let mut index = self.lock();
            if index.peek(key).is_some_and(|entry| entry.path == path) {
                index.remove(key);
            }
            return None;
        }
        let entry = self.lock().touch(key).cloned()?;

        // Best effort: mtime is only used to order entries after a restart.
        let key = *key;
        let touched = entry.path.clone();
        self.runtime.spawn_blocking(move || {
            if let Err(e) = File::options().write(true).open(&touched).and_then(|f| f.set_modified(SystemTime::now())) {
                tracing::trace!(key = %key, error = %e, "Could not update cache file mtime");
            }
        });
        Some(entry)
    }

    /// `true` while `id` is still the running download for `key`.
    fn is_current(&self, key: &CacheKey, id: u64) -> bool {
        self.lock().in_flight.get(key).is_some_and(|in_flight| in_flight.id == id)
    }

    async fn run_download(
        self: Arc<Self>,
        key: CacheKey,
        id: u64,
        request: DownloadRequest,
        extension: &'static str,
        token: CancellationToken,
    ) {
        let downloaded = self.download(key, id, &request, &token).await;
        // Cancelled (or superseded) while downloading: the waiters have
        // already been told, and nothing may be committed.
        if !self.is_current(&key, id) {
            if let Ok((part, _)) = &downloaded {
                let _ = tokio::fs::remove_file(part).await;
            }
            return;
        }
        let outcome = match downloaded {
            Ok((part, bytes)) => self.commit(key, &part, extension, bytes).await,
            Err(kind) => Err(kind),
        };

        // Callers that joined while committing are still waiting on this
        // download. A cancellation that landed meanwhile already told its
        // waiters; the committed file is complete either way.
        let waiters = {
            let mut index = self.lock();
            match index.in_flight.get(&key) {
                Some(in_flight) if in_flight.id == id => {
                    index.in_flight.remove(&key).map(|in_flight| in_flight.waiters).unwrap_or_default()
                },
                _ => Vec::new(),
            }
        };
        Self::notify(waiters, outcome);
    }

    #[instrument(skip_all, fields(key = %key, uri = %request.uri, downloader = self.downloader.name()))]
    async fn download(
        &self,
        key: CacheKey,
        id: u64,
        request: &DownloadRequest,
        token: &CancellationToken,
    ) -> std::result::Result<(PathBuf, u64), ErrorKind> {
        let _permit = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(ErrorKind::Cancelled),
            permit = Arc::clone(&self.permits).acquire_owned() => permit.map_err(|_| ErrorKind::Cancelled)?,
        };
        let part = self.staging.join(format!("{key}.{id}.part"));
        tracing::debug!("Starting download");
        match self.downloader.download(request, &part, token).await {
            Ok(bytes) => Ok((part, bytes)),
            Err(err) => {
                let _ = tokio::fs::remove_file(&part).await;
                match &*err {
                    FetchErrorKind::Cancelled => Err(ErrorKind::Cancelled),
                    kind => {
                        tracing::warn!(error = ?err, "Download failed");
                        Err(ErrorKind::Download { reason: kind.to_string(), retryable: kind.is_retryable() })
                    },
                }
            },
        }
    }

    /// Move a finished download into place, index it and trim.
    ///
    /// Only the index update runs under the lock. Files the trim evicted are
    /// deleted after it is released; a lookup that races the deletion finds
    /// the file gone and drops the entry.
    async fn commit(
        &self,
        key: CacheKey,
        part: &Path,
        extension: &str,
        bytes: u64,
    ) -> std::result::Result<Fetched, ErrorKind> {
        let destination = self.root.join(format!("{key}.{extension}"));
        if let Err(e) = tokio::fs::rename(part, &destination).await {
            tracing::warn!(key = %key, error = %e, "Failed to move download into the cache");
            let _ = tokio::fs::remove_file(part).await;
            return Err(ErrorKind::Io);
        }
        let (stale, evicted) = {
            let mut index = self.lock();
            let stale = index.commit(key, destination.clone(), bytes).filter(|stale| stale.path != destination);
            (stale, index.trim_to_size(self.max_bytes))
        };
        tracing::debug!(key = %key, bytes, evicted = evicted.len(), "Download committed to cache");
        for entry in stale.iter().chain(&evicted) {
            discarded(entry, tokio::fs::remove_file(&entry.path).await);
        }
        Ok(Fetched { key, path: destination, bytes, from_cache: false })
    }

    fn notify(waiters: Vec<Waiter>, outcome: std::result::Result<Fetched, ErrorKind>) {
        for waiter in waiters {
            let _ = waiter.send(outcome.clone().map_err(exn::Exn::from));
        }
    }
}

/// Log the outcome of deleting a file that left the index.
fn discarded(entry: &CacheEntry, removed: std::io::Result<()>) {
    match removed {
        Ok(()) => tracing::debug!(key = %entry.key, bytes = entry.size, "Deleted evicted cache file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
        Err(e) => {
            tracing::warn!(key = %entry.key, path = %entry.path.display(), error = %e, "Failed to delete evicted cache file");
        },
    }
}
