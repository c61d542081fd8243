//! In-memory view of the cache directory.
//!
//! There's no manifest on disk: file names (`<key>.<ext>`) and mtimes are the
//! only persisted state, so the index can always be rebuilt by listing the
//! directory.

use crate::error::{ErrorKind, Result};
use crate::prefetch::Fetched;
use exn::ResultExt;
use preroll_media::CacheKey;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use time::OffsetDateTime;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// A fully downloaded file in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub path: PathBuf,
    pub size: u64,
    pub last_access: OffsetDateTime,
    /// Monotonic access counter; breaks ties between accesses that land on
    /// the same wall-clock instant.
    pub(crate) tick: u64,
}

pub(crate) type Waiter = oneshot::Sender<Result<Fetched>>;

pub(crate) struct InFlight {
    /// Distinguishes this download from a later one for the same key.
    pub id: u64,
    pub token: CancellationToken,
    pub waiters: Vec<Waiter>,
}

#[derive(Default)]
pub(crate) struct Index {
    entries: HashMap<CacheKey, CacheEntry>,
    pub in_flight: HashMap<CacheKey, InFlight>,
    total_bytes: u64,
    clock: u64,
    downloads: u64,
}
impl Index {
    /// Rebuild the index from files named `<key>.<ext>` directly inside `root`.
    ///
    /// Anything else is ignored. If the same key somehow appears twice, the
    /// most recently modified file wins and the other is deleted.
    pub fn rebuild(root: &Path) -> Result<Self> {
        let mut found: Vec<(CacheKey, PathBuf, u64, SystemTime)> = Vec::new();
        for entry in fs::read_dir(root).or_raise(|| ErrorKind::Io)? {
            let entry = entry.or_raise(|| ErrorKind::Io)?;
            let path = entry.path();
            let Some(key) = Self::key_from_path(&path) else {
                continue;
            };
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((key, path, metadata.len(), modified));
        }
        found.sort_by_key(|(_, _, _, modified)| *modified);

        let mut index = Self::default();
        for (key, path, size, modified) in found {
            let entry = CacheEntry { key, path, size, last_access: modified.into(), tick: index.next_tick() };
            if let Some(stale) = index.insert(entry) {
                tracing::debug!(key = %key, path = %stale.path.display(), "Removing duplicate cache file");
                let _ = fs::remove_file(&stale.path);
            }
        }
        Ok(index)
    }

    fn key_from_path(path: &Path) -> Option<CacheKey> {
        path.extension()?;
        path.file_stem()?.to_str()?.parse().ok()
    }

    fn next_tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    pub fn next_download_id(&mut self) -> u64 {
        self.downloads += 1;
        self.downloads
    }

    /// Look up an entry without counting it as an access.
    pub fn peek(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Mark `key` as just accessed.
    pub fn touch(&mut self, key: &CacheKey) -> Option<&CacheEntry> {
        let tick = self.next_tick();
        let entry = self.entries.get_mut(key)?;
        entry.tick = tick;
        entry.last_access = OffsetDateTime::now_utc();
        Some(entry)
    }

    /// Add a freshly committed file as the most recently used entry.
    ///
    /// Returns the entry it replaced, if any.
    pub fn commit(&mut self, key: CacheKey, path: PathBuf, size: u64) -> Option<CacheEntry> {
        let tick = self.next_tick();
        self.insert(CacheEntry { key, path, size, last_access: OffsetDateTime::now_utc(), tick })
    }

    fn insert(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        self.total_bytes += entry.size;
        let replaced = self.entries.insert(entry.key, entry);
        if let Some(old) = &replaced {
            self.total_bytes -= old.size;
        }
        replaced
    }

    pub fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let removed = self.entries.remove(key)?;
        self.total_bytes -= removed.size;
        Some(removed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Least recently used keys that have to go to fit within `max_bytes`.
    pub fn lru_victims(&self, max_bytes: u64) -> Vec<CacheKey> {
        if max_bytes == 0 || self.total_bytes <= max_bytes {
            return Vec::new();
        }
        let mut by_age: Vec<&CacheEntry> = self.entries.values().collect();
        by_age.sort_by_key(|entry| entry.tick);
        let mut remaining = self.total_bytes;
        by_age
            .into_iter()
            .take_while(|entry| {
                let over = remaining > max_bytes;
                remaining -= entry.size;
                over
            })
            .map(|entry| entry.key)
            .collect()
    }

    /// Drop least recently used entries until the cache fits `max_bytes`.
    ///
    /// Only the index changes; deleting the returned entries' files is up to
    /// the caller, outside the index lock.
    pub fn trim_to_size(&mut self, max_bytes: u64) -> Vec<CacheEntry> {
        let evicted: Vec<CacheEntry> =
            self.lru_victims(max_bytes).iter().filter_map(|key| self.remove(key)).collect();
        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), remaining = self.total_bytes, "Evicted cache entries");
        }
        evicted
    }
}
