//! Cooperative cancellation of incoming requests.
//!
//! The read loop holds one handle per in-flight incoming request and signals it
//! when the peer sends a cancellation notification. Handlers observe it through
//! their [`CallContext`](crate::service::CallContext): either by polling
//! [`CancellationHandle::check`] between steps or by awaiting
//! [`CancellationHandle::cancelled`]. A handler that never looks runs to
//! completion and its result is still delivered.

use tokio::sync::watch;

use crate::service::ServiceError;

/// Clone-friendly cancellation flag backed by a `tokio::sync::watch` channel.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// `Err(ServiceError::Cancelled)` once cancellation was requested.
    ///
    /// Meant for `?` at the handler's own checkpoints.
    pub fn check(&self) -> Result<(), ServiceError> {
        if self.is_cancelled() {
            Err(ServiceError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once cancellation is requested (immediately if it already was).
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // `wait_for` also errors when every sender is gone; that cannot happen
        // while `self` holds one.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fresh_handle_passes_check() {
        let handle = CancellationHandle::new();
        assert!(!handle.is_cancelled());
        assert!(handle.check().is_ok());
    }

    #[test]
    fn test_cancel_is_shared_and_idempotent() {
        let handle = CancellationHandle::new();
        let observer = handle.clone();
        handle.cancel();
        handle.cancel();
        assert!(observer.is_cancelled());
        assert!(matches!(observer.check(), Err(ServiceError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let handle = CancellationHandle::new();
        let canceller = handle.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        tokio::time::timeout(Duration::from_secs(1), handle.cancelled())
            .await
            .expect("cancelled() should resolve after cancel()");
    }

    #[tokio::test]
    async fn test_cancelled_returns_at_once_when_already_cancelled() {
        let handle = CancellationHandle::new();
        handle.cancel();
        tokio::time::timeout(Duration::from_millis(10), handle.cancelled())
            .await
            .expect("cancelled() should not wait");
    }
}
