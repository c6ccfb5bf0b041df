//! Deterministic doubles for the external collaborators.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use spotter_core::{
    ChangeStream, ChannelId, DocumentPath, SessionId, SessionStore, SessionSummary, Snapshot,
    StoreError, SummaryId, SummarySink, TransportError, UserId,
};

use crate::achievements::AchievementSink;
use crate::error::AchievementError;
use crate::video::{CallHandle, VideoTransport};

/// Error code reported by scripted join failures.
pub const MOCK_JOIN_FAILURE_CODE: i32 = 17;

/// Transport that records calls and can fail a number of joins.
#[derive(Default)]
pub struct MockTransport {
    joins: AtomicU32,
    leaves: AtomicU32,
    mutes: AtomicU32,
    camera_switches: AtomicU32,
    failing_joins: AtomicU32,
    channels: Mutex<Vec<ChannelId>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `n` joins.
    pub fn failing_joins(n: u32) -> Self {
        let transport = Self::default();
        transport.failing_joins.store(n, Ordering::SeqCst);
        transport
    }

    /// Join attempts, failed ones included.
    pub fn join_count(&self) -> u32 {
        self.joins.load(Ordering::SeqCst)
    }

    pub fn leave_count(&self) -> u32 {
        self.leaves.load(Ordering::SeqCst)
    }

    pub fn mute_count(&self) -> u32 {
        self.mutes.load(Ordering::SeqCst)
    }

    pub fn camera_switch_count(&self) -> u32 {
        self.camera_switches.load(Ordering::SeqCst)
    }

    /// Channels successfully joined, in order.
    pub fn joined_channels(&self) -> Vec<ChannelId> {
        self.channels.lock().clone()
    }
}

#[async_trait]
impl VideoTransport for MockTransport {
    async fn join(&self, channel: &ChannelId, _token: &str) -> Result<CallHandle, TransportError> {
        let n = self.joins.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_joins.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_joins.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::JoinFailed {
                code: MOCK_JOIN_FAILURE_CODE,
                message: "scripted join failure".into(),
            });
        }
        self.channels.lock().push(channel.clone());
        Ok(CallHandle(format!("call-{n}")))
    }

    async fn leave(&self, _handle: &CallHandle) -> Result<(), TransportError> {
        self.leaves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn mute_audio(&self, _handle: &CallHandle, _muted: bool) -> Result<(), TransportError> {
        self.mutes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn switch_camera(&self, _handle: &CallHandle) -> Result<(), TransportError> {
        self.camera_switches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Achievement sink that records successful increments.
#[derive(Default)]
pub struct RecordingAchievements {
    calls: Mutex<Vec<(UserId, String)>>,
    attempts: AtomicU32,
    fail: bool,
    delay: Option<Duration>,
}

impl RecordingAchievements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every increment.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Sleeps `delay` before recording.
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<(UserId, String)> {
        self.calls.lock().clone()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AchievementSink for RecordingAchievements {
    async fn increment_set(&self, user: &UserId, category: &str) -> Result<(), AchievementError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(AchievementError::Unavailable("scripted failure".into()));
        }
        self.calls.lock().push((user.clone(), category.to_string()));
        Ok(())
    }
}

/// Store wrapper that fails a scripted number of writes and subscriptions
/// with `Unavailable` before delegating.
pub struct FlakyStore<S> {
    inner: S,
    failing_writes: AtomicU32,
    failing_subscribes: AtomicU32,
    write_attempts: AtomicU32,
    subscribe_attempts: AtomicU32,
}

impl<S: SessionStore> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            failing_writes: AtomicU32::new(0),
            failing_subscribes: AtomicU32::new(0),
            write_attempts: AtomicU32::new(0),
            subscribe_attempts: AtomicU32::new(0),
        }
    }

    pub fn fail_writes(self, n: u32) -> Self {
        self.failing_writes.store(n, Ordering::SeqCst);
        self
    }

    pub fn fail_subscribes(self, n: u32) -> Self {
        self.failing_subscribes.store(n, Ordering::SeqCst);
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn write_attempts(&self) -> u32 {
        self.write_attempts.load(Ordering::SeqCst)
    }

    pub fn subscribe_attempts(&self) -> u32 {
        self.subscribe_attempts.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl<S: SessionStore> SessionStore for FlakyStore<S> {
    async fn write(
        &self,
        session_id: &SessionId,
        path: &DocumentPath,
        value: Value,
    ) -> Result<u64, StoreError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_writes) {
            return Err(StoreError::Unavailable("scripted write failure".into()));
        }
        self.inner.write(session_id, path, value).await
    }

    async fn read_once(
        &self,
        session_id: &SessionId,
        path: &DocumentPath,
    ) -> Result<Snapshot, StoreError> {
        self.inner.read_once(session_id, path).await
    }

    async fn subscribe(
        &self,
        session_id: &SessionId,
        path: &DocumentPath,
    ) -> Result<ChangeStream, StoreError> {
        self.subscribe_attempts.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_subscribes) {
            return Err(StoreError::Unavailable("scripted subscribe failure".into()));
        }
        self.inner.subscribe(session_id, path).await
    }

    async fn read_document(&self, session_id: &SessionId) -> Result<Option<Snapshot>, StoreError> {
        self.inner.read_document(session_id).await
    }
}

/// Summary sink that fails a scripted number of `record_summary` calls.
pub struct FlakySummaries<S> {
    inner: S,
    failing_records: AtomicU32,
    record_attempts: AtomicU32,
}

impl<S: SummarySink> FlakySummaries<S> {
    pub fn new(inner: S, failing_records: u32) -> Self {
        Self {
            inner,
            failing_records: AtomicU32::new(failing_records),
            record_attempts: AtomicU32::new(0),
        }
    }

    pub fn record_attempts(&self) -> u32 {
        self.record_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: SummarySink> SummarySink for FlakySummaries<S> {
    async fn record_summary(&self, summary: &SessionSummary) -> Result<SummaryId, StoreError> {
        self.record_attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failing_records
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::Unavailable("scripted summary failure".into()));
        }
        self.inner.record_summary(summary).await
    }

    async fn get_summary(&self, id: &SummaryId) -> Result<Option<SessionSummary>, StoreError> {
        self.inner.get_summary(id).await
    }

    async fn find_by_session(&self, session_id: &SessionId) -> Result<Option<SummaryId>, StoreError> {
        self.inner.find_by_session(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spotter_store::MemoryStore;

    #[tokio::test]
    async fn flaky_store_fails_then_delegates() {
        let store = FlakyStore::new(MemoryStore::new()).fail_writes(2);
        let sid = SessionId::from_raw("s");
        let path = DocumentPath::appointment_note();

        assert!(store.write(&sid, &path, json!("a")).await.is_err());
        assert!(store.write(&sid, &path, json!("b")).await.is_err());
        assert_eq!(store.write(&sid, &path, json!("c")).await, Ok(1));
        assert_eq!(store.write_attempts(), 3);
        assert_eq!(store.inner().write_count(), 1);
    }

    #[tokio::test]
    async fn mock_transport_scripts_failures() {
        let transport = MockTransport::failing_joins(1);
        let channel = ChannelId::from_raw("live_s");
        assert!(transport.join(&channel, "t").await.is_err());
        let handle = transport.join(&channel, "t").await.unwrap();
        transport.leave(&handle).await.unwrap();
        assert_eq!(transport.join_count(), 2);
        assert_eq!(transport.leave_count(), 1);
        assert_eq!(transport.joined_channels(), vec![channel]);
    }
}
