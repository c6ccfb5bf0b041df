use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cursor over the selected program, shared by both participants.
///
/// Field names follow the document wire format (`camelCase`) since nested
/// paths such as `workoutState.currentItemIndex` are addressed directly in
/// the session store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutState {
    #[serde(default)]
    pub selected_week_index: usize,
    #[serde(default)]
    pub selected_session_index: usize,
    #[serde(default)]
    pub current_item_index: usize,
    #[serde(default)]
    pub current_set_index: u32,
    #[serde(default)]
    pub current_rep_index: u32,
    #[serde(default)]
    pub is_rest_time: bool,
    /// Nominal rest duration in seconds. Remaining time is always derived
    /// from `rest_started_at`, never decremented in place.
    #[serde(default)]
    pub rest_time_remaining: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_workout_complete: bool,
    #[serde(default = "default_true")]
    pub show_instructions: bool,
    #[serde(default)]
    pub completed_sets: Vec<CompletedSet>,
}

fn default_true() -> bool {
    true
}

/// One realized set, appended when the trainer advances past it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedSet {
    pub item_index: usize,
    pub set_index: u32,
    pub exercise_name: String,
    #[serde(default)]
    pub category: String,
    pub reps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

/// The mutually exclusive phases of a live workout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Instructions,
    Rest,
    ActiveSet,
    Complete,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Instructions => write!(f, "instructions"),
            Self::Rest => write!(f, "rest"),
            Self::ActiveSet => write!(f, "active_set"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

impl Default for WorkoutState {
    fn default() -> Self {
        Self::initial()
    }
}

impl WorkoutState {
    /// Zero cursor: first week, first session, first item, instructions shown.
    pub fn initial() -> Self {
        Self {
            selected_week_index: 0,
            selected_session_index: 0,
            current_item_index: 0,
            current_set_index: 0,
            current_rep_index: 0,
            is_rest_time: false,
            rest_time_remaining: 0,
            rest_started_at: None,
            is_workout_complete: false,
            show_instructions: true,
            completed_sets: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        if self.is_workout_complete {
            Phase::Complete
        } else if self.show_instructions {
            Phase::Instructions
        } else if self.is_rest_time {
            Phase::Rest
        } else {
            Phase::ActiveSet
        }
    }

    /// True when at most one phase flag is raised.
    pub fn is_consistent(&self) -> bool {
        let raised = [self.is_workout_complete, self.show_instructions, self.is_rest_time]
            .iter()
            .filter(|f| **f)
            .count();
        raised <= 1
    }

    pub fn enter_rest(&mut self, seconds: u32, now: DateTime<Utc>) {
        self.show_instructions = false;
        self.is_rest_time = true;
        self.rest_time_remaining = seconds;
        self.rest_started_at = Some(now);
    }

    pub fn clear_rest(&mut self) {
        self.is_rest_time = false;
        self.rest_time_remaining = 0;
        self.rest_started_at = None;
    }

    pub fn mark_complete(&mut self) {
        self.clear_rest();
        self.show_instructions = false;
        self.is_workout_complete = true;
    }
}
