use serde::{Deserialize, Serialize};

/// Extra registry slots kept beyond the prepared window, so an item that
/// scrolls out and straight back in doesn't have to buffer again.
pub const REGISTRY_SLACK: usize = 3;

/// Tunable knobs for preload behaviour.
///
/// Policies are plain values: to change behaviour at runtime, build a new
/// policy and a new coordinator rather than mutating one in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadPolicy {
    /// Items behind the center kept prepared in memory.
    pub prepared_prev: usize,
    /// Items ahead of the center kept prepared in memory.
    pub prepared_next: usize,
    /// Items beyond the prepared window downloaded to disk only.
    pub disk_prefetch_next: usize,
    /// Physical downloads allowed at once.
    pub max_concurrent_prefetch: usize,
    /// Bytes fetched per item; `0` fetches the whole resource.
    pub prefetch_bytes_per_item: u64,
    /// Total on-disk cache ceiling; `0` disables trimming.
    pub cache_max_bytes: u64,
    /// Whether neighbours of the active item get their own prepared player.
    pub use_prepared_next_player: bool,
}
impl Default for PreloadPolicy {
    fn default() -> Self {
        Self {
            prepared_prev: 1,
            prepared_next: 1,
            disk_prefetch_next: 3,
            max_concurrent_prefetch: 2,
            prefetch_bytes_per_item: 0,
            cache_max_bytes: 256 * 1024 * 1024,
            use_prepared_next_player: true,
        }
    }
}
impl PreloadPolicy {
    /// Number of items in a full prepared window.
    pub fn prepared_len(&self) -> usize {
        self.prepared_prev + 1 + self.prepared_next
    }

    /// Maximum live entries in the prefetch registry.
    pub fn registry_capacity(&self) -> usize {
        self.prepared_len() + REGISTRY_SLACK
    }

    /// Byte target handed to downloaders, if the policy limits one.
    pub fn byte_target(&self) -> Option<u64> {
        (self.prefetch_bytes_per_item > 0).then_some(self.prefetch_bytes_per_item)
    }
}
