//! Deciding which feed items to preload.
//!
//! [`compute_window`] is a pure function from a center index, the feed length
//! and a [`PreloadPolicy`](preroll_config::PreloadPolicy) to the set of
//! indices worth preparing in memory or downloading to disk.
//! [`PreloadEventScheduler`] keeps the previously scheduled window and turns
//! each position update into start and cancel intents.

mod scheduler;
mod window;

pub use crate::scheduler::{CancelReason, PreloadEventScheduler, ScheduleEvent, ScheduleResult};
pub use crate::window::{PreloadMode, PreloadWindow, compute_window};
