//! A serial execution context for callbacks.
//!
//! Listeners registered with the prefetch registry and the coordinator must
//! never observe two notifications at once, nor a notification racing the
//! state change that caused it. Components queue closures onto a
//! [`Dispatcher`] while still holding their own lock; a single task drains
//! the queue in order, outside of any lock.

use std::panic::{AssertUnwindSafe, catch_unwind};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Flush(oneshot::Sender<()>),
}

/// Runs queued closures one at a time, in submission order.
///
/// Cloning shares the same queue. The draining task stops once every clone
/// has been dropped.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    sender: mpsc::UnboundedSender<Message>,
}
impl Dispatcher {
    /// Start a dispatcher whose draining task runs on `handle`.
    pub fn spawn_on(handle: &Handle) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Message>();
        handle.spawn(async move {
            while let Some(message) = receiver.recv().await {
                match message {
                    Message::Run(job) => {
                        if catch_unwind(AssertUnwindSafe(job)).is_err() {
                            tracing::warn!("Dispatched callback panicked; continuing with the next one");
                        }
                    },
                    Message::Flush(done) => {
                        let _ = done.send(());
                    },
                }
            }
            tracing::trace!("Dispatcher queue closed");
        });
        Self { sender }
    }

    /// Queue `job` to run after everything queued before it.
    ///
    /// Jobs queued after the runtime has shut down are dropped.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        if self.sender.send(Message::Run(Box::new(job))).is_err() {
            tracing::debug!("Dispatcher is gone; dropping callback");
        }
    }

    /// Wait until every job queued before this call has run.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(Message::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}
