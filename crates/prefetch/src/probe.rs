use crate::error::Result;
use async_trait::async_trait;
use preroll_media::MediaDescriptor;

/// Platform capability that turns a descriptor into a prepared, probed
/// media handle (an `AVPlayerItem`, an ExoPlayer instance, ...).
///
/// `prepare` and `probe` run outside the registry lock and may take as long
/// as they need; the registry cancels them by dropping their futures.
#[async_trait]
pub trait PlayabilityProbe: Send + Sync + 'static {
    /// Handle given to the player on [`consume`](crate::PrefetchRegistry::consume).
    type Media: Send + Sync + 'static;

    /// Name of the probe, for logging only.
    fn name(&self) -> &str;

    /// Create the low-level media handle and start buffering it.
    async fn prepare(&self, descriptor: &MediaDescriptor) -> Result<Self::Media>;

    /// Resolve once the media is known to be playable.
    async fn probe(&self, media: &Self::Media) -> Result<()>;

    /// Tear down a handle the registry still owns. Never called for media
    /// that has been consumed.
    fn release(&self, media: &Self::Media);
}
