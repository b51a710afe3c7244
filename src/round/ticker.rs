use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Calls a function right away and then once per period until stopped.
///
/// Ticks that fall behind are skipped rather than replayed.
pub struct Ticker {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Ticker {
    /// Spawns the ticking task on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if `period` is zero or if called outside a Tokio runtime.
    pub fn start(period: Duration, mut on_tick: impl FnMut() + Send + 'static) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = interval.tick() => on_tick(),
                }
            }
            debug!("ticker stopped");
        });

        Self { cancel, task }
    }

    /// Stops ticking. No call to the tick function starts after this returns.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stops ticking and waits for the task to finish.
    pub async fn shutdown(mut self) {
        self.stop();
        let _ = (&mut self.task).await;
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting() -> (Arc<AtomicUsize>, impl FnMut() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn fires_immediately_then_every_period() {
        let (count, on_tick) = counting();
        let ticker = Ticker::start(Duration::from_secs(1), on_tick);

        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        ticker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_further_ticks() {
        let (count, on_tick) = counting();
        let ticker = Ticker::start(Duration::from_secs(1), on_tick);
        time::sleep(Duration::from_millis(1500)).await;
        ticker.stop();

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_stops_the_task() {
        let (count, on_tick) = counting();
        drop(Ticker::start(Duration::from_secs(1), on_tick));
        time::sleep(Duration::from_secs(3)).await;
        assert!(count.load(Ordering::SeqCst) <= 1);
    }
}
