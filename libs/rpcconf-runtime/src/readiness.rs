//! Readiness signal awaited by exports configured with `delay = -1`.

use tokio::sync::watch;

/// One-shot "container fully initialized" signal.
///
/// Clones share the same signal. Once marked ready it stays ready.
#[derive(Clone, Debug)]
pub struct ReadinessSignal {
    tx: watch::Sender<bool>,
}

impl ReadinessSignal {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// A signal that is already ready.
    #[must_use]
    pub fn ready() -> Self {
        let signal = Self::new();
        signal.mark_ready();
        signal
    }

    pub fn mark_ready(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal is marked ready.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

impl Default for ReadinessSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_returns_after_mark_ready() {
        let signal = ReadinessSignal::new();
        assert!(!signal.is_ready());

        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        signal.mark_ready();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(signal.is_ready());
    }

    #[tokio::test]
    async fn test_already_ready_does_not_block() {
        ReadinessSignal::ready().wait().await;
    }
}
