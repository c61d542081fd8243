use preroll_media::CacheKey;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Removes a single subscriber from its registry.
pub(crate) trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, key: &CacheKey, subscriber: u64);
}

/// Handle for one registration.
///
/// Disposing it (explicitly, or by dropping it) removes only this
/// subscriber; the entry itself stays alive for everyone else.
pub struct Subscription {
    registry: Weak<dyn Unsubscribe>,
    key: CacheKey,
    id: u64,
    active: Arc<AtomicBool>,
}
impl Subscription {
    pub(crate) fn new(registry: Weak<dyn Unsubscribe>, key: CacheKey, id: u64, active: Arc<AtomicBool>) -> Self {
        Self { registry, key, id, active }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// `false` once disposed, or once the entry has been evicted.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn dispose(self) {
        // Work happens in `Drop`.
    }
}
impl Drop for Subscription {
    fn drop(&mut self) {
        // Still-queued notifications check this flag before delivering.
        self.active.store(false, Ordering::Release);
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(&self.key, self.id);
        }
    }
}
impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("key", &self.key).field("id", &self.id).finish_non_exhaustive()
    }
}
