use crate::error::ErrorKind;
use preroll_media::{MediaDescriptor, MediaId};
use std::path::Path;
use std::sync::Arc;

/// The player that renders the active feed item.
pub trait PlayerSurface<M>: Send + Sync {
    /// Start playing `media`, prepared ahead of time for `descriptor`.
    ///
    /// `cached` is the fully downloaded file for the item, if the disk cache
    /// has one. Called at most once per activation.
    fn attach(&self, descriptor: &MediaDescriptor, media: Arc<M>, cached: Option<&Path>);
}

/// UI-facing readiness callbacks.
///
/// Delivered one at a time on the coordinator's dispatcher.
pub trait PlaybackListener: Send + Sync {
    fn on_ready(&self, _id: &MediaId) {}

    fn on_error(&self, _id: &MediaId, _cause: &ErrorKind) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;
impl PlaybackListener for NoopListener {}
