use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use spotter_core::UserId;

use crate::error::AchievementError;

/// External counter of completed sets per user and exercise category.
#[async_trait]
pub trait AchievementSink: Send + Sync {
    async fn increment_set(&self, user: &UserId, category: &str) -> Result<(), AchievementError>;
}

/// Sink for deployments without an achievements backend.
pub struct NoAchievements;

#[async_trait]
impl AchievementSink for NoAchievements {
    async fn increment_set(&self, _user: &UserId, _category: &str) -> Result<(), AchievementError> {
        Ok(())
    }
}

/// Fire-and-forget dispatch of achievement increments.
///
/// Signals run on background tasks bounded by a semaphore and a per-call
/// timeout. Failures are logged and dropped; the caller never waits.
#[derive(Clone)]
pub struct AchievementSignaler {
    sink: Arc<dyn AchievementSink>,
    permits: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    timeout: Duration,
}

impl AchievementSignaler {
    pub fn new(sink: Arc<dyn AchievementSink>, max_background: usize, timeout: Duration) -> Self {
        Self {
            sink,
            permits: Arc::new(Semaphore::new(max_background.max(1))),
            in_flight: Arc::new(AtomicUsize::new(0)),
            timeout,
        }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NoAchievements), 1, Duration::from_secs(1))
    }

    pub fn signal(&self, user: UserId, category: String) -> tokio::task::JoinHandle<()> {
        let sink = Arc::clone(&self.sink);
        let permits = Arc::clone(&self.permits);
        let in_flight = Arc::clone(&self.in_flight);
        let timeout = self.timeout;

        in_flight.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let _permit = permits.acquire().await;
            match tokio::time::timeout(timeout, sink.increment_set(&user, &category)).await {
                Ok(Ok(())) => debug!(user = %user, category = %category, "achievement signaled"),
                Ok(Err(e)) => warn!(
                    user = %user,
                    category = %category,
                    error = %e,
                    "achievement signal failed"
                ),
                Err(_) => warn!(
                    user = %user,
                    category = %category,
                    timeout_ms = timeout.as_millis() as u64,
                    "achievement signal timed out"
                ),
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
        })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait for in-flight signals, giving up after `timeout`.
    pub async fn drain(&self, timeout: Duration) {
        let start = tokio::time::Instant::now();
        loop {
            if self.in_flight() == 0 {
                break;
            }
            if start.elapsed() >= timeout {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingAchievements;

    #[tokio::test]
    async fn signal_reaches_sink() {
        let sink = Arc::new(RecordingAchievements::new());
        let signaler = AchievementSignaler::new(sink.clone(), 2, Duration::from_secs(1));

        signaler
            .signal(UserId::from_raw("client"), "legs".into())
            .await
            .unwrap();

        assert_eq!(
            sink.calls(),
            vec![(UserId::from_raw("client"), "legs".to_string())]
        );
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let sink = Arc::new(RecordingAchievements::failing());
        let signaler = AchievementSignaler::new(sink.clone(), 2, Duration::from_secs(1));

        // The task itself completes normally.
        signaler
            .signal(UserId::from_raw("client"), "legs".into())
            .await
            .unwrap();
        assert_eq!(sink.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_sink_times_out() {
        let sink = Arc::new(RecordingAchievements::delayed(Duration::from_secs(60)));
        let signaler = AchievementSignaler::new(sink.clone(), 1, Duration::from_millis(100));

        signaler
            .signal(UserId::from_raw("client"), "push".into())
            .await
            .unwrap();
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn concurrent_signals_are_all_delivered() {
        let sink = Arc::new(RecordingAchievements::new());
        let signaler = AchievementSignaler::new(sink.clone(), 2, Duration::from_secs(1));
        let handles: Vec<_> = ["push", "pull", "legs"]
            .into_iter()
            .map(|category| signaler.signal(UserId::from_raw("client"), category.into()))
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        signaler.drain(Duration::from_secs(1)).await;
        assert_eq!(signaler.in_flight(), 0);

        let mut categories: Vec<String> = sink.calls().into_iter().map(|(_, c)| c).collect();
        categories.sort();
        assert_eq!(categories, vec!["legs", "pull", "push"]);
    }
}
