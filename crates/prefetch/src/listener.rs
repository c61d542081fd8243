use crate::error::ErrorKind;
use derive_more::Display;
use preroll_media::CacheKey;

/// Lifecycle of a registry entry.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrefetchState {
    #[display("idle")]
    Idle,
    #[display("buffering")]
    Buffering,
    #[display("ready")]
    Ready,
    #[display("error")]
    Error,
    #[display("disposed")]
    Disposed,
}
impl PrefetchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error | Self::Disposed)
    }
}

/// Receives state changes for a registered key.
///
/// Calls are made one at a time on the registry's dispatcher, never while the
/// registry lock is held. Every method defaults to doing nothing.
pub trait PrefetchListener: Send + Sync {
    fn on_idle(&self, _key: &CacheKey) {}

    fn on_buffering(&self, _key: &CacheKey) {}

    fn on_ready(&self, _key: &CacheKey) {}

    fn on_error(&self, _key: &CacheKey, _cause: &ErrorKind) {}
}

#[derive(Debug, Clone)]
pub(crate) enum Notification {
    Idle,
    Buffering,
    Ready,
    Error(ErrorKind),
}
impl Notification {
    pub fn for_state(state: PrefetchState) -> Option<Self> {
        match state {
            PrefetchState::Idle => Some(Self::Idle),
            PrefetchState::Buffering => Some(Self::Buffering),
            PrefetchState::Ready => Some(Self::Ready),
            PrefetchState::Error | PrefetchState::Disposed => None,
        }
    }

    pub fn deliver(&self, listener: &dyn PrefetchListener, key: &CacheKey) {
        match self {
            Self::Idle => listener.on_idle(key),
            Self::Buffering => listener.on_buffering(key),
            Self::Ready => listener.on_ready(key),
            Self::Error(cause) => listener.on_error(key, cause),
        }
    }
}
