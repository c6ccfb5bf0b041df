use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use spotter_core::summary::{CompletedExercise, RealizedSet};
use spotter_core::workout::WorkoutState;
use spotter_core::{SessionId, SessionSnapshot, SessionSummary, StoreError, SummaryId, SummarySink};

use crate::retry::RetryPolicy;

/// Fold realized sets into per-exercise entries, in the order performed.
pub fn build_summary(
    session_id: &SessionId,
    snapshot: &SessionSnapshot,
    state: &WorkoutState,
    total_duration_seconds: i64,
    completed_at: DateTime<Utc>,
) -> SessionSummary {
    let mut exercises: Vec<(usize, CompletedExercise)> = Vec::new();
    for set in &state.completed_sets {
        let realized = RealizedSet {
            reps: set.reps,
            weight: set.weight,
        };
        match exercises.iter_mut().find(|(index, _)| *index == set.item_index) {
            Some((_, exercise)) => exercise.sets.push(realized),
            None => exercises.push((
                set.item_index,
                CompletedExercise {
                    name: set.exercise_name.clone(),
                    category: set.category.clone(),
                    sets: vec![realized],
                },
            )),
        }
    }

    let participants = snapshot.participants.clone().unwrap_or_default();
    SessionSummary {
        session_id: session_id.clone(),
        trainer_id: snapshot.participants.as_ref().map(|p| p.trainer_id.clone()),
        client_ids: participants.client_ids,
        note: snapshot.appointment_note.clone(),
        exercises: exercises.into_iter().map(|(_, e)| e).collect(),
        total_duration_seconds,
        completed_at: Some(completed_at),
    }
}

/// Writes the summary exactly once per session.
pub struct SummaryRecorder {
    sink: Arc<dyn SummarySink>,
    retry: RetryPolicy,
}

impl SummaryRecorder {
    pub fn new(sink: Arc<dyn SummarySink>, retry: RetryPolicy) -> Self {
        Self { sink, retry }
    }

    /// Record `summary`, or return the id already recorded for its session.
    pub async fn record(&self, summary: &SessionSummary) -> Result<SummaryId, StoreError> {
        let recorded = self
            .retry
            .run("record_summary", || self.sink.record_summary(summary))
            .await;

        match recorded {
            Ok(id) => {
                info!(
                    session_id = %summary.session_id,
                    summary_id = %id,
                    sets = summary.total_sets(),
                    "summary recorded"
                );
                Ok(id)
            }
            Err(StoreError::Conflict(detail)) => {
                let existing = self
                    .retry
                    .run("find_summary", || self.sink.find_by_session(&summary.session_id))
                    .await?;
                existing.ok_or(StoreError::Conflict(detail))
            }
            Err(e) => Err(e),
        }
    }
}

/// How the completion screen re-reads a just-written summary.
#[derive(Clone, Debug)]
pub struct SummaryReadPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl Default for SummaryReadPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            delay: Duration::from_millis(500),
        }
    }
}

pub struct SummaryReader {
    sink: Arc<dyn SummarySink>,
    policy: SummaryReadPolicy,
}

impl SummaryReader {
    pub fn new(sink: Arc<dyn SummarySink>, policy: SummaryReadPolicy) -> Self {
        Self { sink, policy }
    }

    /// Read the session's summary, degrading to an empty one once the
    /// retries are spent.
    pub async fn read(&self, session_id: &SessionId, known: Option<&SummaryId>) -> SessionSummary {
        for attempt in 0..=self.policy.retries {
            if attempt > 0 {
                tokio::time::sleep(self.policy.delay).await;
            }
            match self.try_read(session_id, known).await {
                Ok(Some(summary)) => return summary,
                Ok(None) => {}
                Err(e) => warn!(
                    session_id = %session_id,
                    attempt = attempt + 1,
                    error = %e,
                    "summary read failed"
                ),
            }
        }

        warn!(
            session_id = %session_id,
            retries = self.policy.retries,
            "summary not yet available, showing degraded summary"
        );
        SessionSummary::degraded(session_id.clone())
    }

    async fn try_read(
        &self,
        session_id: &SessionId,
        known: Option<&SummaryId>,
    ) -> Result<Option<SessionSummary>, StoreError> {
        let id = match known {
            Some(id) => Some(id.clone()),
            None => self.sink.find_by_session(session_id).await?,
        };
        match id {
            Some(id) => self.sink.get_summary(&id).await,
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use spotter_core::workout::CompletedSet;
    use spotter_core::{Participants, UserId};
    use spotter_store::MemoryStore;

    fn completed(item_index: usize, set_index: u32, name: &str, reps: u32) -> CompletedSet {
        CompletedSet {
            item_index,
            set_index,
            exercise_name: name.into(),
            category: "push".into(),
            reps,
            weight: Some(20.0),
        }
    }

    fn snapshot() -> SessionSnapshot {
        SessionSnapshot {
            appointment_note: "shoulder rehab".into(),
            participants: Some(Participants {
                trainer_id: UserId::from_raw("trainer"),
                client_ids: vec![UserId::from_raw("client")],
            }),
            ..Default::default()
        }
    }

    #[test]
    fn build_groups_sets_by_item() {
        let mut state = WorkoutState::initial();
        state.completed_sets = vec![
            completed(0, 0, "Press", 10),
            completed(0, 1, "Press", 8),
            completed(1, 0, "Row", 12),
        ];
        let summary = build_summary(
            &SessionId::from_raw("s"),
            &snapshot(),
            &state,
            600,
            DateTime::<Utc>::UNIX_EPOCH,
        );

        assert_eq!(summary.trainer_id, Some(UserId::from_raw("trainer")));
        assert_eq!(summary.client_ids, vec![UserId::from_raw("client")]);
        assert_eq!(summary.note, "shoulder rehab");
        assert_eq!(summary.exercises.len(), 2);
        assert_eq!(summary.exercises[0].name, "Press");
        assert_eq!(summary.exercises[0].sets.len(), 2);
        assert_eq!(summary.exercises[0].sets[1].reps, 8);
        assert_eq!(summary.total_sets(), 3);
        assert_eq!(summary.total_duration_seconds, 600);
    }

    #[tokio::test]
    async fn duplicate_record_returns_existing_id() {
        let sink = Arc::new(MemoryStore::new());
        let recorder = SummaryRecorder::new(sink.clone(), RetryPolicy::none());
        let summary = SessionSummary::degraded(SessionId::from_raw("s"));

        let first = recorder.record(&summary).await.unwrap();
        let second = recorder.record(&summary).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(sink.summary_count(), 1);
    }

    /// Sink whose summaries never become readable.
    #[derive(Default)]
    struct NeverReady {
        reads: AtomicU32,
    }

    #[async_trait]
    impl SummarySink for NeverReady {
        async fn record_summary(&self, _summary: &SessionSummary) -> Result<SummaryId, StoreError> {
            Ok(SummaryId::new())
        }

        async fn get_summary(&self, _id: &SummaryId) -> Result<Option<SessionSummary>, StoreError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }

        async fn find_by_session(
            &self,
            _session_id: &SessionId,
        ) -> Result<Option<SummaryId>, StoreError> {
            Err(StoreError::Unavailable("replica behind".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reader_retries_three_times_then_degrades() {
        let sink = Arc::new(NeverReady::default());
        let reader = SummaryReader::new(sink.clone(), SummaryReadPolicy::default());
        let sid = SessionId::from_raw("s");

        let started = tokio::time::Instant::now();
        let summary = reader.read(&sid, Some(&SummaryId::from_raw("sum_x"))).await;

        assert_eq!(summary, SessionSummary::degraded(sid));
        // One initial read plus three retries
        assert_eq!(sink.reads.load(Ordering::SeqCst), 4);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(1500) && waited < Duration::from_millis(1600));
    }

    #[tokio::test(start_paused = true)]
    async fn reader_survives_lookup_errors() {
        let sink = Arc::new(NeverReady::default());
        let reader = SummaryReader::new(sink.clone(), SummaryReadPolicy::default());
        let summary = reader.read(&SessionId::from_raw("s"), None).await;
        assert!(summary.exercises.is_empty());
        assert_eq!(sink.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reader_finds_recorded_summary_by_session() {
        let sink = Arc::new(MemoryStore::new());
        let mut summary = SessionSummary::degraded(SessionId::from_raw("s"));
        summary.note = "great session".into();
        sink.record_summary(&summary).await.unwrap();

        let reader = SummaryReader::new(sink, SummaryReadPolicy::default());
        let read = reader.read(&SessionId::from_raw("s"), None).await;
        assert_eq!(read.note, "great session");
    }
}
