use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session-level flags written only by the trainer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default)]
    pub is_complete: bool,
    /// Snapshot of the reconstructed active time at the last metadata write.
    /// Readers that need a live value rebuild it from `timing_events`.
    #[serde(default)]
    pub total_duration_seconds: i64,
    #[serde(default)]
    pub timing_events: Vec<TimingEvent>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingKind {
    Pause,
    Resume,
}

/// A pause or resume of the shared session clock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingEvent {
    pub event: TimingKind,
    pub at: DateTime<Utc>,
}

impl TimingEvent {
    pub fn pause(at: DateTime<Utc>) -> Self {
        Self {
            event: TimingKind::Pause,
            at,
        }
    }

    pub fn resume(at: DateTime<Utc>) -> Self {
        Self {
            event: TimingKind::Resume,
            at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_wire_format() {
        let meta = SessionMetadata {
            is_paused: true,
            is_complete: false,
            total_duration_seconds: 42,
            timing_events: vec![TimingEvent::resume(DateTime::<Utc>::UNIX_EPOCH)],
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["isPaused"], true);
        assert_eq!(json["totalDurationSeconds"], 42);
        assert_eq!(json["timingEvents"][0]["event"], "resume");
    }

    #[test]
    fn empty_object_is_default() {
        let meta: SessionMetadata = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(meta, SessionMetadata::default());
    }
}
