use std::sync::Arc;

use tokio::sync::watch;

/// Per-job count of deliveries that have not reached a terminal status.
///
/// The dispatcher hands one [`CompletionGuard`] to every task it submits and
/// then awaits [`JobCountdown::wait`]. A guard decrements the count when it
/// is dropped, which happens after the worker has written the send's
/// terminal status, or when the task is discarded unprocessed.
#[derive(Debug, Clone)]
pub struct JobCountdown {
    remaining: Arc<watch::Sender<usize>>,
}

impl JobCountdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            remaining: Arc::new(tx),
        }
    }

    /// Register one more outstanding delivery.
    pub fn guard(&self) -> CompletionGuard {
        self.remaining.send_modify(|n| *n += 1);
        CompletionGuard {
            countdown: self.clone(),
        }
    }

    pub fn remaining(&self) -> usize {
        *self.remaining.borrow()
    }

    /// Resolve once every guard handed out so far has been dropped.
    pub async fn wait(&self) {
        let mut rx = self.remaining.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for JobCountdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements its [`JobCountdown`] exactly once, on drop.
#[derive(Debug)]
pub struct CompletionGuard {
    countdown: JobCountdown,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.countdown
            .remaining
            .send_modify(|n| *n = n.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn empty_countdown_resolves_immediately() {
        let countdown = JobCountdown::new();
        tokio::time::timeout(Duration::from_millis(100), countdown.wait())
            .await
            .expect("zero outstanding deliveries must not block");
    }

    #[tokio::test]
    async fn resolves_after_last_guard_drops() {
        let countdown = JobCountdown::new();
        let a = countdown.guard();
        let b = countdown.guard();
        assert_eq!(countdown.remaining(), 2);

        let waiter = {
            let countdown = countdown.clone();
            tokio::spawn(async move { countdown.wait().await })
        };

        drop(a);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        assert_eq!(countdown.remaining(), 1);

        drop(b);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert_eq!(countdown.remaining(), 0);
    }
}
