//! Async helpers shared across the preroll crates.

mod dispatcher;

pub use crate::dispatcher::Dispatcher;
