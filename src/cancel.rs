//! Cloneable cancellation signal
//!
//! A signal fires when it is cancelled explicitly, when its optional
//! deadline passes, or when any of the signals it was combined from fires.
//! Combining never mutates the inputs: cancelling a combined signal does
//! not cancel its parents.

use futures_util::future::{BoxFuture, select_all};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug)]
struct Inner {
    tx: watch::Sender<bool>,
    deadline: Option<Instant>,
    parents: Vec<CancelSignal>,
}

/// Cancellation signal shared between a caller and background work
#[derive(Debug, Clone)]
pub struct CancelSignal {
    inner: Arc<Inner>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    /// Create a signal that only fires when [`cancel`](Self::cancel) is called
    pub fn new() -> Self {
        Self::build(None, Vec::new())
    }

    /// Create a signal that also fires on its own once `deadline` passes
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::build(Some(deadline), Vec::new())
    }

    /// Create a signal that fires when any of `signals` fires
    pub fn any(signals: impl IntoIterator<Item = CancelSignal>) -> Self {
        Self::build(None, signals.into_iter().collect())
    }

    fn build(deadline: Option<Instant>, parents: Vec<CancelSignal>) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                tx,
                deadline,
                parents,
            }),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.tx.send_replace(true);
    }

    /// Whether the signal has fired
    pub fn is_cancelled(&self) -> bool {
        if *self.inner.tx.borrow() {
            return true;
        }
        if let Some(deadline) = self.inner.deadline
            && Instant::now() >= deadline
        {
            return true;
        }
        self.inner.parents.iter().any(CancelSignal::is_cancelled)
    }

    /// Resolve once the signal fires
    ///
    /// Completes immediately if it has already fired.
    pub fn cancelled(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut waits: Vec<BoxFuture<'_, ()>> =
                Vec::with_capacity(2 + self.inner.parents.len());

            let mut rx = self.inner.tx.subscribe();
            waits.push(Box::pin(async move {
                // The sender lives in `self`, so this only ends on `true`
                let _ = rx.wait_for(|cancelled| *cancelled).await;
            }));

            if let Some(deadline) = self.inner.deadline {
                waits.push(Box::pin(tokio::time::sleep_until(deadline)));
            }

            for parent in &self.inner.parents {
                waits.push(parent.cancelled());
            }

            select_all(waits).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_is_observed_by_clones() {
        let signal = CancelSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_cancelled());

        signal.cancel();
        assert!(clone.is_cancelled());

        let waited = tokio::time::timeout(Duration::from_secs(1), clone.cancelled()).await;
        assert!(waited.is_ok(), "cancelled() did not resolve after cancel()");
    }

    #[tokio::test]
    async fn test_combined_fires_when_either_parent_fires() {
        let a = CancelSignal::new();
        let b = CancelSignal::new();
        let combined = CancelSignal::any([a.clone(), b.clone()]);

        assert!(!combined.is_cancelled());
        b.cancel();
        assert!(combined.is_cancelled());
        assert!(!a.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelling_combined_leaves_parents_untouched() {
        let a = CancelSignal::new();
        let b = CancelSignal::new();
        let combined = CancelSignal::any([a.clone(), b.clone()]);

        combined.cancel();
        assert!(combined.is_cancelled());
        assert!(!a.is_cancelled());
        assert!(!b.is_cancelled());
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_parent_cancel() {
        let parent = CancelSignal::new();
        let combined = CancelSignal::any([parent.clone()]);

        let waiter = tokio::spawn(async move { combined.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        parent.cancel();

        let joined = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(joined.is_ok(), "waiter did not wake after parent cancel");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires_without_explicit_cancel() {
        let signal = CancelSignal::with_deadline(Instant::now() + Duration::from_secs(5));
        assert!(!signal.is_cancelled());

        signal.cancelled().await;
        assert!(signal.is_cancelled());
    }
}
