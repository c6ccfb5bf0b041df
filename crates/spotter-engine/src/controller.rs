//! Per-session, per-participant orchestrator.
//!
//! Every mutating operation checks authority before touching the store. Only
//! the trainer's controller writes progression, metadata or the summary id;
//! the client's controller reads and observes.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use spotter_core::document::{self, DocumentPath};
use spotter_core::metadata::{SessionMetadata, TimingEvent};
use spotter_core::program::SelectedProgram;
use spotter_core::workout::WorkoutState;
use spotter_core::{
    ChangeStream, Clock, Participants, SessionId, SessionSnapshot, SessionStore, SessionSummary,
    Snapshot, StoreError, SummaryId, SummarySink, SystemClock,
};

use crate::achievements::{AchievementSignaler, AchievementSink};
use crate::duration;
use crate::error::{CoordinatorError, Role};
use crate::progression::{self, Action, Effect};
use crate::rest_timer;
use crate::retry::RetryPolicy;
use crate::summary::{build_summary, SummaryReadPolicy, SummaryReader, SummaryRecorder};
use crate::video::{VideoCredentials, VideoLifecycle, VideoTransport};

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// How often the trainer's rest watcher re-derives the countdown.
    pub rest_poll_interval: Duration,
    pub achievement_timeout: Duration,
    pub max_background_signals: usize,
    /// Budget for store reads and writes.
    pub retry: RetryPolicy,
    /// Backoff between `observe` reconnections. `max_retries` is ignored:
    /// observation never gives up.
    pub resubscribe: RetryPolicy,
    pub summary_read: SummaryReadPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            rest_poll_interval: Duration::from_secs(1),
            achievement_timeout: Duration::from_secs(5),
            max_background_signals: 8,
            retry: RetryPolicy::default(),
            resubscribe: RetryPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(250),
                max_delay: Duration::from_secs(10),
                jitter_factor: 0.2,
            },
            summary_read: SummaryReadPolicy::default(),
        }
    }
}

pub struct SessionController {
    session_id: SessionId,
    role: Role,
    store: Arc<dyn SessionStore>,
    summaries: Arc<dyn SummarySink>,
    clock: Arc<dyn Clock>,
    achievements: AchievementSignaler,
    video: Option<Arc<VideoLifecycle>>,
    config: ControllerConfig,
    /// Serializes this controller's read-modify-write sequences.
    writer: Mutex<()>,
}

impl SessionController {
    pub fn new(
        session_id: SessionId,
        role: Role,
        store: Arc<dyn SessionStore>,
        summaries: Arc<dyn SummarySink>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            session_id,
            role,
            store,
            summaries,
            clock: Arc::new(SystemClock),
            achievements: AchievementSignaler::disabled(),
            video: None,
            config,
            writer: Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_achievements(mut self, sink: Arc<dyn AchievementSink>) -> Self {
        self.achievements = AchievementSignaler::new(
            sink,
            self.config.max_background_signals,
            self.config.achievement_timeout,
        );
        self
    }

    pub fn with_video(mut self, transport: Arc<dyn VideoTransport>) -> Self {
        self.video = Some(Arc::new(VideoLifecycle::new(
            self.session_id.clone(),
            transport,
        )));
        self
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn video(&self) -> Option<&Arc<VideoLifecycle>> {
        self.video.as_ref()
    }

    pub fn achievements(&self) -> &AchievementSignaler {
        &self.achievements
    }

    fn require_trainer(&self, operation: &'static str) -> Result<(), CoordinatorError> {
        if self.role.is_trainer() {
            return Ok(());
        }
        debug!(session_id = %self.session_id, role = %self.role, operation, "rejected by authority");
        Err(CoordinatorError::AuthorityViolation {
            role: self.role,
            operation,
        })
    }

    async fn write<T: Serialize>(&self, path: DocumentPath, value: &T) -> Result<u64, StoreError> {
        let value = serde_json::to_value(value)?;
        self.config
            .retry
            .run(path.as_str(), || {
                self.store.write(&self.session_id, &path, value.clone())
            })
            .await
    }

    async fn load(&self) -> Result<SessionSnapshot, StoreError> {
        let snapshot = self
            .config
            .retry
            .run("read_document", || self.store.read_document(&self.session_id))
            .await?;
        match snapshot {
            Some(Snapshot {
                revision,
                value: Some(value),
            }) => SessionSnapshot::from_document(revision, &value),
            _ => Ok(SessionSnapshot::default()),
        }
    }

    /// Write the placeholder document for a new session.
    #[instrument(skip(self, participants, note), fields(session_id = %self.session_id, role = %self.role))]
    pub async fn create_session(
        &self,
        participants: &Participants,
        note: &str,
    ) -> Result<(), CoordinatorError> {
        self.require_trainer("create_session")?;
        let _guard = self.writer.lock().await;

        if self.load().await?.is_started() {
            return Err(CoordinatorError::AlreadyStarted);
        }
        self.write(DocumentPath::participants(), participants).await?;
        self.write(DocumentPath::appointment_note(), &note).await?;
        self.write(DocumentPath::session_metadata(), &SessionMetadata::default())
            .await?;
        self.write(DocumentPath::workout_state(), &Value::Object(Default::default()))
            .await?;
        info!(clients = participants.client_ids.len(), "session created");
        Ok(())
    }

    #[instrument(skip(self, note), fields(session_id = %self.session_id, role = %self.role))]
    pub async fn set_appointment_note(&self, note: &str) -> Result<(), CoordinatorError> {
        self.require_trainer("set_appointment_note")?;
        self.write(DocumentPath::appointment_note(), &note).await?;
        Ok(())
    }

    /// Select the program, write the zero cursor and start the session clock.
    #[instrument(skip(self, program), fields(session_id = %self.session_id, role = %self.role))]
    pub async fn start_session(
        &self,
        program: &SelectedProgram,
    ) -> Result<WorkoutState, CoordinatorError> {
        self.require_trainer("start_session")?;
        let _guard = self.writer.lock().await;

        let snapshot = self.load().await?;
        if snapshot.is_started() {
            // A restarted trainer app still joins the running call
            self.confirm_start_if_live(&snapshot).await;
            return Err(CoordinatorError::AlreadyStarted);
        }

        let now = self.clock.now();
        let state = WorkoutState::initial();
        let metadata = SessionMetadata {
            timing_events: vec![TimingEvent::resume(now)],
            ..SessionMetadata::default()
        };

        // Program first so observers of the cursor can always resolve it.
        self.write(DocumentPath::selected_program(), program).await?;
        self.write(DocumentPath::workout_state(), &state).await?;
        self.write(DocumentPath::session_metadata(), &metadata).await?;
        info!(program = %program.name, "session started");

        if let Some(video) = &self.video {
            video.confirm_start().await;
        }
        Ok(state)
    }

    /// Apply a progression action. A completed session is returned unchanged.
    #[instrument(skip(self, action), fields(session_id = %self.session_id, role = %self.role, action = action.name()))]
    pub async fn advance(&self, action: Action) -> Result<WorkoutState, CoordinatorError> {
        self.require_trainer("advance")?;
        let _guard = self.writer.lock().await;
        self.advance_locked(&action).await
    }

    async fn advance_locked(&self, action: &Action) -> Result<WorkoutState, CoordinatorError> {
        let snapshot = self.load().await?;
        let state = snapshot
            .workout_state
            .clone()
            .ok_or(CoordinatorError::NotStarted)?;
        if snapshot.is_complete() {
            if !snapshot.session_metadata.is_complete || snapshot.summary_id.is_none() {
                info!("completing interrupted finish");
                self.finish(&snapshot, &state, self.clock.now()).await?;
            } else {
                debug!("session complete, ignoring action");
            }
            return Ok(state);
        }

        let now = self.clock.now();
        let transition =
            progression::next(snapshot.selected_program.as_ref(), &state, action, now)?;

        let clients = snapshot
            .participants
            .as_ref()
            .map(|p| p.client_ids.clone())
            .unwrap_or_default();
        for effect in &transition.effects {
            if let Effect::SetCompleted { category } = effect {
                for client in &clients {
                    self.achievements.signal(client.clone(), category.clone());
                }
            }
        }

        if let Some(program) = &transition.program {
            self.write(DocumentPath::selected_program(), program).await?;
        }
        self.write(DocumentPath::workout_state(), &transition.state)
            .await?;
        debug!(
            item = transition.state.current_item_index,
            set = transition.state.current_set_index,
            phase = %transition.state.phase(),
            "workout state written"
        );

        if transition.effects.contains(&Effect::EndVideo) {
            self.leave_video().await;
        }
        if transition.is_complete() {
            self.finish(&snapshot, &transition.state, now).await?;
        }
        Ok(transition.state)
    }

    /// Freeze the clock, mark the session complete and record its summary.
    async fn finish(
        &self,
        snapshot: &SessionSnapshot,
        state: &WorkoutState,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<SummaryId, CoordinatorError> {
        let mut metadata = snapshot.session_metadata.clone();
        duration::record(&mut metadata.timing_events, TimingEvent::pause(now));
        metadata.total_duration_seconds = duration::elapsed_seconds(&metadata.timing_events, now);
        metadata.is_complete = true;
        self.write(DocumentPath::session_metadata(), &metadata)
            .await?;

        let summary = build_summary(
            &self.session_id,
            snapshot,
            state,
            metadata.total_duration_seconds,
            now,
        );
        let recorder = SummaryRecorder::new(Arc::clone(&self.summaries), self.config.retry.clone());
        let summary_id = recorder.record(&summary).await?;
        self.write(DocumentPath::summary_id(), &summary_id).await?;

        info!(
            summary_id = %summary_id,
            duration_secs = metadata.total_duration_seconds,
            sets = summary.total_sets(),
            "session complete"
        );
        Ok(summary_id)
    }

    /// Flip the shared clock between paused and running.
    #[instrument(skip(self), fields(session_id = %self.session_id, role = %self.role))]
    pub async fn toggle_pause(&self) -> Result<SessionMetadata, CoordinatorError> {
        self.require_trainer("toggle_pause")?;
        let _guard = self.writer.lock().await;

        let snapshot = self.load().await?;
        if !snapshot.is_started() {
            return Err(CoordinatorError::NotStarted);
        }
        if snapshot.is_complete() {
            return Err(CoordinatorError::AlreadyComplete);
        }

        let now = self.clock.now();
        let mut metadata = snapshot.session_metadata;
        let kind = duration::toggled(&metadata.timing_events);
        duration::record(&mut metadata.timing_events, TimingEvent { event: kind, at: now });
        metadata.is_paused = duration::is_paused(&metadata.timing_events);
        metadata.total_duration_seconds = duration::elapsed_seconds(&metadata.timing_events, now);

        self.write(DocumentPath::session_metadata(), &metadata)
            .await?;
        info!(
            paused = metadata.is_paused,
            duration_secs = metadata.total_duration_seconds,
            "pause toggled"
        );
        Ok(metadata)
    }

    /// End an expired rest. `Ok(None)` when there is nothing to end. A rest
    /// stored without a start time is stamped with the current time.
    pub async fn poll_rest(&self) -> Result<Option<WorkoutState>, CoordinatorError> {
        self.require_trainer("poll_rest")?;
        let _guard = self.writer.lock().await;

        let snapshot = self.load().await?;
        if snapshot.is_complete() {
            return Err(CoordinatorError::AlreadyComplete);
        }
        let Some(state) = &snapshot.workout_state else {
            return Ok(None);
        };
        if state.is_rest_time && state.rest_started_at.is_none() {
            // Start the countdown from the first time the rest is seen
            let mut stamped = state.clone();
            stamped.rest_started_at = Some(self.clock.now());
            self.write(DocumentPath::workout_state(), &stamped).await?;
            debug!(session_id = %self.session_id, "stamped rest start");
            return Ok(None);
        }
        if !rest_timer::is_expired(state, self.clock.now()) {
            return Ok(None);
        }
        debug!(session_id = %self.session_id, "rest expired");
        self.advance_locked(&Action::EndRest).await.map(Some)
    }

    /// Run `poll_rest` on an interval until cancelled or the session ends.
    pub fn spawn_rest_watcher(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(controller.config.rest_poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match controller.poll_rest().await {
                    Ok(_) => {}
                    Err(CoordinatorError::AlreadyComplete) => break,
                    Err(e @ CoordinatorError::AuthorityViolation { .. }) => {
                        warn!(error = %e, "rest watcher stopped");
                        break;
                    }
                    Err(e) => warn!(
                        session_id = %controller.session_id,
                        error = %e,
                        kind = e.error_kind(),
                        "rest poll failed"
                    ),
                }
            }
            debug!(session_id = %controller.session_id, "rest watcher exited");
        })
    }

    /// Re-fetch the whole session. Seeing a live session confirms start for
    /// the video call, for either role.
    #[instrument(skip(self), fields(session_id = %self.session_id, role = %self.role))]
    pub async fn refresh(&self) -> Result<SessionSnapshot, CoordinatorError> {
        let snapshot = self.load().await?;
        self.confirm_start_if_live(&snapshot).await;
        Ok(snapshot)
    }

    async fn confirm_start_if_live(&self, snapshot: &SessionSnapshot) {
        if !snapshot.is_started() || snapshot.is_complete() {
            return;
        }
        if let Some(video) = &self.video {
            video.confirm_start().await;
        }
    }

    /// Lazy, never-ending stream of workout states.
    ///
    /// Each (re)connection subscribes, then reads the latest snapshot and
    /// yields it, then yields only changes newer than that snapshot. A
    /// broken subscription is re-established with backoff.
    pub fn observe(&self) -> impl Stream<Item = WorkoutState> + Send + 'static {
        let observer = Observer {
            store: Arc::clone(&self.store),
            session_id: self.session_id.clone(),
            role: self.role,
            backoff: self.config.resubscribe.clone(),
            video: if self.role.is_trainer() {
                None
            } else {
                self.video.clone()
            },
            link: Link::Connect { attempt: 0 },
            last_yielded: None,
        };
        futures::stream::unfold(observer, |mut observer| async move {
            let state = observer.next_state().await;
            Some((state, observer))
        })
    }

    pub async fn provide_video_credentials(&self, credentials: VideoCredentials) {
        match &self.video {
            Some(video) => video.provide_credentials(credentials).await,
            None => debug!(session_id = %self.session_id, "no video transport configured"),
        }
    }

    /// Explicit end of the call. Returns whether a leave was issued.
    pub async fn end_call(&self) -> bool {
        self.leave_video().await
    }

    async fn leave_video(&self) -> bool {
        match &self.video {
            Some(video) => video.leave().await,
            None => false,
        }
    }

    pub async fn summary_id(&self) -> Result<Option<SummaryId>, CoordinatorError> {
        Ok(self.load().await?.summary_id)
    }

    /// Completion-screen read of the recorded summary. Degrades to an
    /// empty summary rather than failing.
    pub async fn summary(&self) -> Result<SessionSummary, CoordinatorError> {
        let snapshot = self.load().await?;
        let reader = SummaryReader::new(
            Arc::clone(&self.summaries),
            self.config.summary_read.clone(),
        );
        Ok(reader
            .read(&self.session_id, snapshot.summary_id.as_ref())
            .await)
    }
}

enum Link {
    Connect { attempt: u32 },
    Live { changes: ChangeStream, after: u64 },
}

struct Observer {
    store: Arc<dyn SessionStore>,
    session_id: SessionId,
    role: Role,
    backoff: RetryPolicy,
    video: Option<Arc<VideoLifecycle>>,
    link: Link,
    last_yielded: Option<u64>,
}

impl Observer {
    async fn next_state(&mut self) -> WorkoutState {
        loop {
            match &mut self.link {
                Link::Connect { attempt } => {
                    let attempt = *attempt;
                    if attempt > 0 {
                        tokio::time::sleep(self.backoff.delay(attempt - 1)).await;
                    }
                    match connect(&self.store, &self.session_id).await {
                        Ok((changes, snapshot)) => {
                            self.link = Link::Live {
                                changes,
                                after: snapshot.revision,
                            };
                            if let Some(state) = self.accept(snapshot.revision, snapshot.value).await {
                                return state;
                            }
                        }
                        Err(e) => {
                            warn!(
                                session_id = %self.session_id,
                                role = %self.role,
                                attempt = attempt + 1,
                                error = %e,
                                "observe connect failed"
                            );
                            self.link = Link::Connect {
                                attempt: attempt.saturating_add(1),
                            };
                        }
                    }
                }
                Link::Live { changes, after } => match changes.next().await {
                    Some(Ok(change)) if change.revision > *after => {
                        *after = change.revision;
                        if let Some(state) = self.accept(change.revision, change.value).await {
                            return state;
                        }
                    }
                    // Already covered by the snapshot
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(
                            session_id = %self.session_id,
                            role = %self.role,
                            error = %e,
                            "subscription broken, resubscribing"
                        );
                        self.link = Link::Connect { attempt: 1 };
                    }
                    None => {
                        debug!(session_id = %self.session_id, "subscription ended, resubscribing");
                        self.link = Link::Connect { attempt: 1 };
                    }
                },
            }
        }
    }

    async fn accept(&mut self, revision: u64, value: Option<Value>) -> Option<WorkoutState> {
        if self.last_yielded.is_some_and(|last| revision <= last) {
            return None;
        }
        if document::is_empty_value(value.as_ref()) {
            return None;
        }
        let state = match value.map(serde_json::from_value::<WorkoutState>) {
            Some(Ok(state)) => state,
            Some(Err(e)) => {
                warn!(session_id = %self.session_id, revision, error = %e, "undecodable workout state");
                return None;
            }
            None => return None,
        };
        self.last_yielded = Some(revision);
        if let Some(video) = &self.video {
            video.confirm_start().await;
        }
        Some(state)
    }
}

/// Subscribe first, then snapshot, so no write lands between the two unseen.
async fn connect(
    store: &Arc<dyn SessionStore>,
    session_id: &SessionId,
) -> Result<(ChangeStream, Snapshot), StoreError> {
    let path = DocumentPath::workout_state();
    let changes = store.subscribe(session_id, &path).await?;
    let snapshot = store.read_once(session_id, &path).await?;
    Ok((changes, snapshot))
}
