//! Cooperative cancellation and deadlines, used by every blocking operation
//! in the stack (handshake flights, yamux window waits, RPC response
//! parking, tunnel watchdog sleeps).
//!
//! A [`Cancellation`] is a cheap `Clone`-able handle; triggering it wakes
//! every outstanding [`Cancellation::cancelled`] waiter exactly once. This is
//! a small hand-rolled wrapper around `tokio::sync::Notify` rather than a
//! dependency on `tokio-util`'s `CancellationToken`, since a single
//! fire-once flag is all the protocol needs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::timeout;

#[derive(Clone, Default)]
pub struct Cancellation {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark this cancellation triggered and wake every waiter.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been (or is) called.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        // Race: cancel() between the check above and `notified()` is handled
        // by `Notify`'s "permit" semantics only for the *next* call, so we
        // re-check after registering interest.
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

#[derive(Debug, thiserror::Error)]
#[error("operation timed out or was canceled")]
pub struct DeadlineExceeded;

/// Race `fut` against both a fixed `duration` and a [`Cancellation`] handle.
/// Returns `Ok(value)` if `fut` resolves first, otherwise `Err(DeadlineExceeded)`.
pub async fn with_deadline<F, T>(
    duration: Duration,
    cancel: &Cancellation,
    fut: F,
) -> Result<T, DeadlineExceeded>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        res = timeout(duration, fut) => res.map_err(|_| DeadlineExceeded),
        _ = cancel.cancelled() => Err(DeadlineExceeded),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_when_future_completes_first() {
        let cancel = Cancellation::new();
        let res = with_deadline(Duration::from_millis(50), &cancel, async { 42u32 }).await;
        assert_eq!(res.unwrap(), 42);
    }

    #[tokio::test]
    async fn times_out_when_future_never_resolves() {
        let cancel = Cancellation::new();
        let res: Result<(), _> =
            with_deadline(Duration::from_millis(10), &cancel, std::future::pending()).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn cancellation_wins_immediately() {
        let cancel = Cancellation::new();
        cancel.cancel();
        let res: Result<(), _> =
            with_deadline(Duration::from_secs(5), &cancel, std::future::pending()).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn cancel_wakes_concurrent_waiter() {
        let cancel = Cancellation::new();
        let waiter = cancel.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .expect("waiter should wake promptly")
            .unwrap();
    }
}
