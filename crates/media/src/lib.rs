//! Media descriptors for the preload pipeline.
//!
//! A [`MediaDescriptor`] is the immutable description of one playable
//! resource in a feed: its identity, where to fetch it from, a container
//! hint, request headers and (optionally) the DRM details the player will
//! need. Everything downstream (download cache, prefetch registry,
//! coordinator) addresses resources by the [`CacheKey`] derived from it.

mod descriptor;
pub mod error;
mod key;

pub use crate::descriptor::{ContainerHint, DrmDescriptor, MediaDescriptor, MediaId};
pub use crate::key::CacheKey;
