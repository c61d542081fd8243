use derive_more::Display;
use preroll_config::PreloadPolicy;
use std::collections::BTreeSet;

/// How an index inside the window should be preloaded.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreloadMode {
    /// Pre-initialise a player so playback starts instantly.
    #[display("prepared")]
    Prepared,
    /// Download bytes ahead of time without involving a player.
    #[display("disk")]
    Disk,
}

/// Indices selected for preloading around a center item.
///
/// `prepared` and `disk` are always disjoint and never contain an index
/// outside the feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadWindow {
    pub prepared: BTreeSet<usize>,
    pub disk: BTreeSet<usize>,
}
impl PreloadWindow {
    /// Union of both sets.
    pub fn all(&self) -> BTreeSet<usize> {
        self.prepared.union(&self.disk).copied().collect()
    }

    pub fn mode_of(&self, index: usize) -> Option<PreloadMode> {
        if self.prepared.contains(&index) {
            Some(PreloadMode::Prepared)
        } else if self.disk.contains(&index) {
            Some(PreloadMode::Disk)
        } else {
            None
        }
    }

    /// Every index in the window with its mode, in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, PreloadMode)> + '_ {
        let prepared = self.prepared.iter().map(|&i| (i, PreloadMode::Prepared));
        let disk = self.disk.iter().map(|&i| (i, PreloadMode::Disk));
        // Disk indices always follow the prepared range.
        prepared.chain(disk)
    }

    pub fn is_empty(&self) -> bool {
        self.prepared.is_empty() && self.disk.is_empty()
    }
}

/// Compute the preload window for `center` in a feed of `item_count` items.
///
/// - `prepared` covers `[center - prepared_prev, center + prepared_next]`.
/// - `disk` covers the items after `prepared`, up to
///   `center + prepared_next + disk_prefetch_next`. It never looks backwards.
///
/// Both are clamped to `[0, item_count - 1]`. An empty feed, or a center
/// outside the feed, yields an empty window.
///
/// # Examples
///
/// ```
/// use preroll_config::PreloadPolicy;
/// use preroll_schedule::compute_window;
///
/// let policy = PreloadPolicy { prepared_prev: 1, prepared_next: 1, disk_prefetch_next: 3, ..Default::default() };
/// let window = compute_window(5, 10, &policy);
/// assert_eq!(window.prepared.into_iter().collect::<Vec<_>>(), vec![4, 5, 6]);
/// assert_eq!(window.disk.into_iter().collect::<Vec<_>>(), vec![7, 8, 9]);
/// ```
pub fn compute_window(center: usize, item_count: usize, policy: &PreloadPolicy) -> PreloadWindow {
    if item_count == 0 || center >= item_count {
        return PreloadWindow::default();
    }
    let last = item_count - 1;
    let prepared_start = center.saturating_sub(policy.prepared_prev);
    let prepared_end = center.saturating_add(policy.prepared_next).min(last);
    let disk_end = center.saturating_add(policy.prepared_next).saturating_add(policy.disk_prefetch_next).min(last);
    PreloadWindow {
        prepared: (prepared_start..=prepared_end).collect(),
        disk: (prepared_end + 1..=disk_end).collect(),
    }
}
