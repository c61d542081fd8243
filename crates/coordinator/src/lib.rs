//! Feed-level playback coordination.
//!
//! [`PlaybackCoordinator`] ties the other preroll crates together for one
//! scrolling feed:
//! - [`preroll_schedule`] decides which items around the current position to
//!   preload, and how.
//! - [`preroll_prefetch`] prepares players for the items closest to the
//!   current one.
//! - [`preroll_cache`] downloads the items further ahead to disk.
//!
//! The UI feeds it positions (`on_position_changed`, `set_scroll_hint`) and
//! lifecycle changes (`set_feed`, `append_feed`, background and foreground),
//! and gets back readiness through a [`PlaybackListener`] and prepared media
//! through a [`PlayerSurface`]. Telemetry goes to a
//! [`PlaybackEventReporter`].

mod coordinator;
pub mod error;
mod handoff;
mod reporter;
mod surface;

pub use crate::coordinator::{CoordinatorBuilder, PlaybackCoordinator};
pub use crate::reporter::{NoopReporter, PlaybackEventReporter, ReporterHandle, TracingReporter, with_tracing};
pub use crate::surface::{NoopListener, PlaybackListener, PlayerSurface};
