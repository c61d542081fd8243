//! On-disk download cache for feed videos.
//!
//! The cache directory holds one file per [`CacheKey`](preroll_media::CacheKey),
//! named `<key>.<ext>`, and nothing else besides a `.staging` directory for
//! downloads in progress. File names and modification times are the only
//! persisted state: deleting the process (or the index with it) loses
//! nothing, because [`DownloadCache::open`] rebuilds the index by listing
//! the directory.
//!
//! # Architecture
//! - [`DownloadCache`] owns the directory and deduplicates downloads by key.
//! - Each prefetch returns a [`Prefetch`] future; every caller waiting on the
//!   same in-flight download is resolved with the same outcome.
//! - The actual transfer is delegated to a
//!   [`Downloader`](preroll_fetch::Downloader), with at most
//!   `max_concurrent` running at once.

pub mod error;
mod index;
mod prefetch;
mod store;

pub use crate::index::CacheEntry;
pub use crate::prefetch::{Fetched, Prefetch};
pub use crate::store::{CacheOptions, DownloadCache};
