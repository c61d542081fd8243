use crate::error::{ErrorKind, Result};
use preroll_media::CacheKey;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// A cached file, either already present or just downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub key: CacheKey,
    pub path: PathBuf,
    pub bytes: u64,
    /// `true` if no download was needed.
    pub from_cache: bool,
}

/// Completion of a [`DownloadCache::prefetch`](crate::DownloadCache::prefetch) call.
///
/// The download runs in the background whether or not this is polled;
/// dropping it only discards the notification.
#[must_use = "dropping a Prefetch discards its completion, not the download"]
pub struct Prefetch {
    state: State,
}

enum State {
    Ready(Option<Result<Fetched>>),
    Waiting(oneshot::Receiver<Result<Fetched>>),
}

impl Prefetch {
    pub(crate) fn ready(result: Result<Fetched>) -> Self {
        Self { state: State::Ready(Some(result)) }
    }

    pub(crate) fn waiting(receiver: oneshot::Receiver<Result<Fetched>>) -> Self {
        Self { state: State::Waiting(receiver) }
    }
}

impl Future for Prefetch {
    type Output = Result<Fetched>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            State::Ready(result) => Poll::Ready(result.take().unwrap_or_else(|| Err(ErrorKind::Cancelled.into()))),
            // A dropped sender means the cache went away mid-download.
            State::Waiting(receiver) => {
                Pin::new(receiver).poll(cx).map(|received| received.unwrap_or_else(|_| Err(ErrorKind::Cancelled.into())))
            },
        }
    }
}
