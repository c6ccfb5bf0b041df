//! Sequencing of the audio/video call around the workout.
//!
//! Join waits for both credentials and a confirmed session start. Leave is
//! issued at most once, whichever of end-call or completion comes first.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use spotter_core::{ChannelId, SessionId, TransportError};

/// Handle returned by the transport for a joined call.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallHandle(pub String);

/// Issued out of band by the token service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoCredentials {
    pub token: String,
    pub channel_id: ChannelId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VideoEvent {
    Joined { channel_id: ChannelId },
    RemoteJoined { id: String },
    RemoteLeft { id: String },
    Left,
    Error { code: i32, message: String },
}

/// External audio/video transport.
#[async_trait]
pub trait VideoTransport: Send + Sync {
    async fn join(&self, channel: &ChannelId, token: &str) -> Result<CallHandle, TransportError>;
    async fn leave(&self, handle: &CallHandle) -> Result<(), TransportError>;
    async fn mute_audio(&self, handle: &CallHandle, muted: bool) -> Result<(), TransportError>;
    async fn switch_camera(&self, handle: &CallHandle) -> Result<(), TransportError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum CallState {
    Idle,
    Joined(CallHandle),
    Left,
}

struct Inner {
    credentials: Option<VideoCredentials>,
    start_confirmed: bool,
    call: CallState,
}

pub struct VideoLifecycle {
    session_id: SessionId,
    transport: Arc<dyn VideoTransport>,
    inner: Mutex<Inner>,
    events: broadcast::Sender<VideoEvent>,
}

impl VideoLifecycle {
    pub fn new(session_id: SessionId, transport: Arc<dyn VideoTransport>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            session_id,
            transport,
            inner: Mutex::new(Inner {
                credentials: None,
                start_confirmed: false,
                call: CallState::Idle,
            }),
            events,
        }
    }

    /// Channel both participants derive from the session.
    pub fn channel(&self) -> ChannelId {
        ChannelId::for_session(&self.session_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VideoEvent> {
        self.events.subscribe()
    }

    /// Sender for transport adapters that surface remote participant events.
    pub fn event_sender(&self) -> broadcast::Sender<VideoEvent> {
        self.events.clone()
    }

    pub async fn is_joined(&self) -> bool {
        matches!(self.inner.lock().await.call, CallState::Joined(_))
    }

    pub async fn provide_credentials(&self, credentials: VideoCredentials) {
        let mut inner = self.inner.lock().await;
        if credentials.channel_id != self.channel() {
            warn!(
                session_id = %self.session_id,
                expected = %self.channel(),
                got = %credentials.channel_id,
                "credentials issued for a different channel"
            );
        }
        inner.credentials = Some(credentials);
        self.try_join(&mut inner).await;
    }

    pub async fn confirm_start(&self) {
        let mut inner = self.inner.lock().await;
        if inner.start_confirmed {
            return;
        }
        inner.start_confirmed = true;
        self.try_join(&mut inner).await;
    }

    async fn try_join(&self, inner: &mut Inner) {
        if inner.call != CallState::Idle || !inner.start_confirmed {
            return;
        }
        let Some(credentials) = inner.credentials.clone() else {
            return;
        };

        match self
            .transport
            .join(&credentials.channel_id, &credentials.token)
            .await
        {
            Ok(handle) => {
                info!(session_id = %self.session_id, channel = %credentials.channel_id, "video joined");
                inner.call = CallState::Joined(handle);
                let _ = self.events.send(VideoEvent::Joined {
                    channel_id: credentials.channel_id,
                });
            }
            Err(e) => {
                // Stay idle so fresh credentials can retry the join.
                warn!(session_id = %self.session_id, code = e.code(), error = %e, "video join failed");
                self.report(&e);
            }
        }
    }

    /// End the call. Returns whether a transport leave was issued.
    ///
    /// Safe to call repeatedly; once left, the lifecycle never rejoins.
    pub async fn leave(&self) -> bool {
        let mut inner = self.inner.lock().await;
        let previous = std::mem::replace(&mut inner.call, CallState::Left);
        match previous {
            CallState::Joined(handle) => {
                if let Err(e) = self.transport.leave(&handle).await {
                    warn!(session_id = %self.session_id, error = %e, "video leave failed");
                    self.report(&e);
                }
                info!(session_id = %self.session_id, "video left");
                let _ = self.events.send(VideoEvent::Left);
                true
            }
            CallState::Idle | CallState::Left => false,
        }
    }

    pub async fn mute_audio(&self, muted: bool) -> Result<(), TransportError> {
        let inner = self.inner.lock().await;
        match &inner.call {
            CallState::Joined(handle) => self.transport.mute_audio(handle, muted).await,
            _ => Err(TransportError::NotJoined),
        }
    }

    pub async fn switch_camera(&self) -> Result<(), TransportError> {
        let inner = self.inner.lock().await;
        match &inner.call {
            CallState::Joined(handle) => self.transport.switch_camera(handle).await,
            _ => Err(TransportError::NotJoined),
        }
    }

    fn report(&self, error: &TransportError) {
        let _ = self.events.send(VideoEvent::Error {
            code: error.code(),
            message: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    fn lifecycle(transport: Arc<MockTransport>) -> VideoLifecycle {
        VideoLifecycle::new(SessionId::from_raw("sess_1"), transport)
    }

    fn credentials() -> VideoCredentials {
        VideoCredentials {
            token: "tok".into(),
            channel_id: ChannelId::for_session(&SessionId::from_raw("sess_1")),
        }
    }

    #[tokio::test]
    async fn joins_only_with_credentials_and_start() {
        let transport = Arc::new(MockTransport::new());
        let video = lifecycle(transport.clone());

        video.provide_credentials(credentials()).await;
        assert_eq!(transport.join_count(), 0);

        video.confirm_start().await;
        assert_eq!(transport.join_count(), 1);
        assert!(video.is_joined().await);

        // Repeated confirmation does not rejoin
        video.confirm_start().await;
        assert_eq!(transport.join_count(), 1);
    }

    #[tokio::test]
    async fn start_before_credentials_joins_on_arrival() {
        let transport = Arc::new(MockTransport::new());
        let video = lifecycle(transport.clone());

        video.confirm_start().await;
        assert_eq!(transport.join_count(), 0);
        video.provide_credentials(credentials()).await;
        assert_eq!(transport.join_count(), 1);
        assert_eq!(
            transport.joined_channels(),
            vec![ChannelId::from_raw("live_sess_1")]
        );
    }

    #[tokio::test]
    async fn second_leave_is_noop() {
        let transport = Arc::new(MockTransport::new());
        let video = lifecycle(transport.clone());
        video.provide_credentials(credentials()).await;
        video.confirm_start().await;

        assert!(video.leave().await);
        assert!(!video.leave().await);
        assert_eq!(transport.leave_count(), 1);
    }

    #[tokio::test]
    async fn leave_before_join_prevents_join() {
        let transport = Arc::new(MockTransport::new());
        let video = lifecycle(transport.clone());

        assert!(!video.leave().await);
        video.provide_credentials(credentials()).await;
        video.confirm_start().await;
        assert_eq!(transport.join_count(), 0);
        assert_eq!(transport.leave_count(), 0);
    }

    #[tokio::test]
    async fn failed_join_is_reported_as_event() {
        let transport = Arc::new(MockTransport::failing_joins(1));
        let video = lifecycle(transport.clone());
        let mut events = video.subscribe();

        video.provide_credentials(credentials()).await;
        video.confirm_start().await;
        assert!(!video.is_joined().await);
        assert!(matches!(
            events.recv().await.unwrap(),
            VideoEvent::Error { code: 17, .. }
        ));

        // New credentials retry the join
        video.provide_credentials(credentials()).await;
        assert!(video.is_joined().await);
        assert_eq!(transport.join_count(), 2);
    }

    #[tokio::test]
    async fn controls_require_a_joined_call() {
        let transport = Arc::new(MockTransport::new());
        let video = lifecycle(transport.clone());
        assert_eq!(video.mute_audio(true).await, Err(TransportError::NotJoined));

        video.provide_credentials(credentials()).await;
        video.confirm_start().await;
        video.mute_audio(true).await.unwrap();
        video.switch_camera().await.unwrap();
        assert_eq!(transport.mute_count(), 1);
    }
}
