//! Prefetch registry: prepared players shared between feed cells.
//!
//! A feed cell that wants instant playback registers its media here. The
//! first registration for a [`CacheKey`](preroll_media::CacheKey) prepares
//! the media through a [`PlayabilityProbe`] and probes it; later
//! registrations for the same key attach to that work instead of repeating
//! it. When the item actually starts playing, [`PrefetchRegistry::consume`]
//! hands the prepared media to the player exactly once.
//!
//! Per key, an entry moves through [`PrefetchState`]s:
//!
//! ```text
//! Idle -> Buffering -> Ready
//!                   \-> Error     (entry removed, next register retries)
//! any  -> Disposed                (evicted; nothing is observable after)
//! ```

pub mod error;
mod listener;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod probe;
mod registry;
mod subscription;

pub use crate::listener::{PrefetchListener, PrefetchState};
#[cfg(any(test, feature = "mock"))]
pub use crate::mock::{MockMedia, MockProbe};
pub use crate::probe::PlayabilityProbe;
pub use crate::registry::PrefetchRegistry;
pub use crate::subscription::Subscription;
