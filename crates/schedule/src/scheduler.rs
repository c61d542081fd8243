use crate::window::{PreloadMode, PreloadWindow, compute_window};
use derive_more::Display;
use preroll_config::PreloadPolicy;
use preroll_media::MediaId;
use std::collections::{BTreeMap, BTreeSet};

/// Why scheduled preload work was dropped.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    #[display("window_shift")]
    WindowShift,
    #[display("feed_update")]
    FeedUpdate,
    #[display("background")]
    Background,
    #[display("release")]
    Release,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleEvent {
    Scheduled {
        id: MediaId,
        index: usize,
        /// Signed distance from the center; negative is behind.
        distance: isize,
        mode: PreloadMode,
    },
    Canceled {
        id: MediaId,
        index: usize,
        reason: CancelReason,
    },
}

/// Outcome of a single [`PreloadEventScheduler::update`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleResult {
    pub window: PreloadWindow,
    /// Indices that entered the window.
    pub to_start: BTreeSet<usize>,
    /// Indices that left the window.
    pub to_cancel: BTreeSet<usize>,
    /// Indices that stayed in the window but moved from disk to prepared.
    pub promoted: BTreeSet<usize>,
    /// Indices that stayed in the window but moved from prepared to disk.
    pub demoted: BTreeSet<usize>,
    /// Telemetry for every start and cancel whose media id could be resolved.
    pub events: Vec<ScheduleEvent>,
}
impl ScheduleResult {
    /// `true` when nothing needs to be started, cancelled or changed.
    pub fn is_unchanged(&self) -> bool {
        self.to_start.is_empty() && self.to_cancel.is_empty() && self.promoted.is_empty() && self.demoted.is_empty()
    }
}

/// Diffs successive preload windows into start and cancel intents.
///
/// The scheduler is single-writer: it takes `&mut self` and is meant to be
/// driven from one stream of position updates.
#[derive(Debug, Clone)]
pub struct PreloadEventScheduler {
    policy: PreloadPolicy,
    scheduled: BTreeMap<usize, PreloadMode>,
}
impl PreloadEventScheduler {
    pub fn new(policy: PreloadPolicy) -> Self {
        Self { policy, scheduled: BTreeMap::new() }
    }

    pub fn policy(&self) -> &PreloadPolicy {
        &self.policy
    }

    /// Currently scheduled indices and their modes.
    pub fn scheduled(&self) -> impl Iterator<Item = (usize, PreloadMode)> + '_ {
        self.scheduled.iter().map(|(&index, &mode)| (index, mode))
    }

    pub fn is_scheduled(&self, index: usize) -> bool {
        self.scheduled.contains_key(&index)
    }

    /// Recompute the window around `center` and diff it against what was
    /// previously scheduled.
    ///
    /// `id_at` resolves an index to its media id. Indices it can't resolve
    /// (items not loaded yet) are still tracked, but emit no event.
    pub fn update(&mut self, center: usize, item_count: usize, id_at: impl Fn(usize) -> Option<MediaId>) -> ScheduleResult {
        let window = compute_window(center, item_count, &self.policy);
        let next: BTreeMap<usize, PreloadMode> = window.iter().collect();

        let mut result = ScheduleResult::default();
        for (&index, &mode) in &next {
            match self.scheduled.get(&index) {
                None => {
                    result.to_start.insert(index);
                    if let Some(id) = id_at(index) {
                        let distance = index as isize - center as isize;
                        result.events.push(ScheduleEvent::Scheduled { id, index, distance, mode });
                    }
                },
                Some(&previous) if previous != mode => {
                    match mode {
                        PreloadMode::Prepared => result.promoted.insert(index),
                        PreloadMode::Disk => result.demoted.insert(index),
                    };
                },
                Some(_) => {},
            }
        }
        for &index in self.scheduled.keys() {
            if next.contains_key(&index) {
                continue;
            }
            result.to_cancel.insert(index);
            if let Some(id) = id_at(index) {
                result.events.push(ScheduleEvent::Canceled { id, index, reason: CancelReason::WindowShift });
            }
        }

        tracing::trace!(
            center,
            item_count,
            started = result.to_start.len(),
            canceled = result.to_cancel.len(),
            promoted = result.promoted.len(),
            demoted = result.demoted.len(),
            "Preload window updated",
        );
        self.scheduled = next;
        result.window = window;
        result
    }

    /// Cancel everything currently scheduled and forget it.
    ///
    /// Returns one cancel event per resolvable index, tagged with `reason`.
    pub fn reset(&mut self, reason: CancelReason, id_at: impl Fn(usize) -> Option<MediaId>) -> Vec<ScheduleEvent> {
        let scheduled = std::mem::take(&mut self.scheduled);
        tracing::debug!(%reason, canceled = scheduled.len(), "Preload schedule reset");
        scheduled
            .into_keys()
            .filter_map(|index| id_at(index).map(|id| ScheduleEvent::Canceled { id, index, reason }))
            .collect()
    }

    /// Cancel just `indices`, leaving the rest of the schedule alone.
    ///
    /// Indices that weren't scheduled are ignored. The next
    /// [`update`](Self::update) starts them again if they're still in the
    /// window.
    pub fn cancel(
        &mut self,
        indices: impl IntoIterator<Item = usize>,
        reason: CancelReason,
        id_at: impl Fn(usize) -> Option<MediaId>,
    ) -> Vec<ScheduleEvent> {
        let events: Vec<ScheduleEvent> = indices
            .into_iter()
            .filter(|index| self.scheduled.remove(index).is_some())
            .filter_map(|index| id_at(index).map(|id| ScheduleEvent::Canceled { id, index, reason }))
            .collect();
        tracing::debug!(%reason, canceled = events.len(), remaining = self.scheduled.len(), "Preload schedule trimmed");
        events
    }
}
