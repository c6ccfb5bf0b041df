use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{SessionId, UserId};

/// Immutable record of a completed live session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub trainer_id: Option<UserId>,
    #[serde(default)]
    pub client_ids: Vec<UserId>,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub exercises: Vec<CompletedExercise>,
    #[serde(default)]
    pub total_duration_seconds: i64,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedExercise {
    pub name: String,
    #[serde(default)]
    pub category: String,
    pub sets: Vec<RealizedSet>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealizedSet {
    pub reps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

impl SessionSummary {
    /// Placeholder shown when the recorded summary cannot be read back.
    pub fn degraded(session_id: SessionId) -> Self {
        Self {
            session_id,
            trainer_id: None,
            client_ids: Vec::new(),
            note: String::new(),
            exercises: Vec::new(),
            total_duration_seconds: 0,
            completed_at: None,
        }
    }

    pub fn total_sets(&self) -> usize {
        self.exercises.iter().map(|e| e.sets.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_summary_is_empty() {
        let summary = SessionSummary::degraded(SessionId::from_raw("s"));
        assert!(summary.exercises.is_empty());
        assert_eq!(summary.total_sets(), 0);
        assert!(summary.completed_at.is_none());
    }

    #[test]
    fn total_sets_counts_all_exercises() {
        let summary = SessionSummary {
            exercises: vec![
                CompletedExercise {
                    name: "Squat".into(),
                    category: "legs".into(),
                    sets: vec![RealizedSet { reps: 5, weight: Some(100.0) }; 3],
                },
                CompletedExercise {
                    name: "Row".into(),
                    category: "back".into(),
                    sets: vec![RealizedSet { reps: 8, weight: None }; 2],
                },
            ],
            ..SessionSummary::degraded(SessionId::from_raw("s"))
        };
        assert_eq!(summary.total_sets(), 5);
    }
}
