//! The download capability used by the preroll cache.
//!
//! Fetching bytes is somebody else's job (a platform HTTP stack, a CDN SDK,
//! a test fixture). This crate only defines the [`Downloader`] seam and a few
//! adapters:
//! - [`FileDownloader`] for `file://` sources.
//! - `HttpDownloader` (feature `http`) backed by `reqwest`.
//! - `MockDownloader` (feature `mock`) for tests in other crates.

pub mod backend;
pub mod error;

pub use crate::backend::{DownloadRequest, Downloader, DownloaderHandle, FileDownloader};
#[cfg(feature = "http")]
pub use crate::backend::HttpDownloader;
#[cfg(any(test, feature = "mock"))]
pub use crate::backend::MockDownloader;
