//! Cancellable periodic task shared by the scheduler loop and the interval timers.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::trace;

/// A spawned loop running `tick` every `period` until cancelled.
///
/// Cancellation is observed between ticks only: a tick that already started runs to completion,
/// then the loop exits. Dropping the task cancels it.
#[derive(Debug)]
pub(crate) struct PeriodicTask {
    shutdown: watch::Sender<bool>,
    #[allow(dead_code)]
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// The first tick happens one `period` after spawning.
    pub(crate) fn spawn<F, Fut>(label: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        if !tick().await {
                            break;
                        }
                    }
                }
            }
            trace!(task = label, "Periodic task stopped");
        });
        Self { shutdown, handle }
    }

    pub(crate) fn cancel(self) {
        let _ = self.shutdown.send(true);
    }

    #[cfg(test)]
    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_ticks_until_cancelled() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let task = PeriodicTask::spawn("test", Duration::from_millis(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            }
        });

        tokio::time::sleep(Duration::from_millis(55)).await;
        task.cancel();
        let seen = count.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected at least 2 ticks, got {seen}");

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(count.load(Ordering::SeqCst) <= seen + 1);
    }

    #[tokio::test]
    async fn test_tick_returning_false_ends_loop() {
        let task = PeriodicTask::spawn("test", Duration::from_millis(5), || async { false });
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(task.is_finished());
    }
}
