//! Signaling handles shared between an executor, its backend and the log
//! watcher of one build attempt.
//!
//! Capacities matter here: abort and completion are single-slot queues so a
//! value sent before anybody listens is retained, and watcher shutdown is a
//! handshake the executor drives to completion.

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::Result;

/// Receiving end of the abort slot.
pub type AbortReceiver = mpsc::Receiver<()>;

/// Receiving end of the completion slot.
pub type FinishReceiver = mpsc::Receiver<Result<()>>;

/// Create the capacity-1 abort slot.
pub fn abort_channel() -> (AbortHandle, AbortReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (AbortHandle { tx }, rx)
}

/// Create the capacity-1 completion slot.
pub fn finish_channel() -> (FinishSender, FinishReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (FinishSender { tx }, rx)
}

/// Create the watcher shutdown handshake.
pub fn shutdown_channel() -> (oneshot::Sender<()>, WatcherShutdown) {
    let (tx, rx) = oneshot::channel();
    (tx, WatcherShutdown { rx, done: false })
}

/// Requests abort of a running attempt. Cloneable; any holder may abort.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: mpsc::Sender<()>,
}

impl AbortHandle {
    /// Raise the abort signal.
    ///
    /// Returns `false` when the attempt already resolved. A second abort while
    /// one is pending is absorbed by the single slot.
    pub fn abort(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!("abort already pending");
                true
            }
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }
}

/// Delivers the backend's completion result.
#[derive(Debug, Clone)]
pub struct FinishSender {
    tx: mpsc::Sender<Result<()>>,
}

impl FinishSender {
    /// Deliver the completion result. Only the first value is kept; later
    /// ones are dropped and `false` is returned.
    pub fn finish(&self, result: Result<()>) -> bool {
        match self.tx.try_send(result) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "completion result discarded");
                false
            }
        }
    }
}

/// Watcher side of the shutdown handshake.
#[derive(Debug)]
pub struct WatcherShutdown {
    rx: oneshot::Receiver<()>,
    done: bool,
}

impl WatcherShutdown {
    /// Resolves once the executor asks the watcher to stop, or the executor
    /// went away. Cancel safe; resolves immediately once observed.
    pub async fn requested(&mut self) {
        if self.done {
            return;
        }
        let _ = (&mut self.rx).await;
        self.done = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[tokio::test]
    async fn test_abort_before_listening_is_retained() {
        let (handle, mut rx) = abort_channel();
        assert!(handle.abort());
        assert!(handle.abort());
        assert_eq!(rx.recv().await, Some(()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_abort_after_receiver_gone() {
        let (handle, rx) = abort_channel();
        drop(rx);
        assert!(!handle.abort());
    }

    #[tokio::test]
    async fn test_finish_keeps_first_result() {
        let (tx, mut rx) = finish_channel();
        assert!(tx.finish(Ok(())));
        assert!(!tx.finish(Err(Error::ExecutionFailed("late".to_string()))));
        assert!(matches!(rx.recv().await, Some(Ok(()))));
    }

    #[tokio::test]
    async fn test_shutdown_requested() {
        let (tx, mut shutdown) = shutdown_channel();
        tx.send(()).unwrap();
        shutdown.requested().await;
        // Observed once, stays observed.
        shutdown.requested().await;
    }

    #[tokio::test]
    async fn test_shutdown_when_sender_dropped() {
        let (tx, mut shutdown) = shutdown_channel();
        drop(tx);
        shutdown.requested().await;
    }
}
