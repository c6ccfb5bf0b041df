//! Denormalized snapshot of the program a trainer picked for a session.
//!
//! The coordinator only needs to walk `weeks -> sessions -> items`; all
//! other program data stays opaque and is carried in `extra`.

use serde::{Deserialize, Serialize};

/// Rest between sets when an exercise does not specify one.
pub const DEFAULT_REST_SECONDS: u32 = 30;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedProgram {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub weeks: Vec<ProgramWeek>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramWeek {
    #[serde(default)]
    pub sessions: Vec<ProgramSession>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramSession {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub items: Vec<ProgramItem>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgramItem {
    Exercise(Exercise),
    Asset(Asset),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exercise {
    pub name: String,
    #[serde(default)]
    pub category: String,
    pub sets: u32,
    pub reps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest_seconds: Option<u32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Exercise {
    pub fn new(name: impl Into<String>, category: impl Into<String>, sets: u32, reps: u32) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            sets,
            reps,
            rest_seconds: None,
            weight: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_rest(mut self, seconds: u32) -> Self {
        self.rest_seconds = Some(seconds);
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }
}

impl Asset {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: None,
            rest_seconds: None,
            extra: serde_json::Map::new(),
        }
    }
}

impl ProgramItem {
    /// Sets to perform. Assets count as a single set so that advancing
    /// past them behaves like finishing an item.
    pub fn set_count(&self) -> u32 {
        match self {
            Self::Exercise(e) => e.sets.max(1),
            Self::Asset(_) => 1,
        }
    }

    pub fn rep_count(&self) -> u32 {
        match self {
            Self::Exercise(e) => e.reps,
            Self::Asset(_) => 0,
        }
    }

    pub fn rest_seconds(&self) -> u32 {
        match self {
            Self::Exercise(e) => e.rest_seconds,
            Self::Asset(a) => a.rest_seconds,
        }
        .unwrap_or(DEFAULT_REST_SECONDS)
    }

    pub fn as_exercise(&self) -> Option<&Exercise> {
        match self {
            Self::Exercise(e) => Some(e),
            Self::Asset(_) => None,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Exercise(e) => &e.name,
            Self::Asset(a) => &a.title,
        }
    }
}

impl SelectedProgram {
    /// A program with a single week and a single session.
    pub fn single_session(name: impl Into<String>, items: Vec<ProgramItem>) -> Self {
        let name = name.into();
        Self {
            id: None,
            name: name.clone(),
            weeks: vec![ProgramWeek {
                sessions: vec![ProgramSession { name, items }],
            }],
        }
    }

    pub fn week_count(&self) -> usize {
        self.weeks.len()
    }

    pub fn session_count(&self, week: usize) -> usize {
        self.weeks.get(week).map_or(0, |w| w.sessions.len())
    }

    pub fn session(&self, week: usize, session: usize) -> Option<&ProgramSession> {
        self.weeks.get(week).and_then(|w| w.sessions.get(session))
    }

    /// Items of the selected session, empty when the indices point nowhere.
    pub fn items(&self, week: usize, session: usize) -> &[ProgramItem] {
        self.session(week, session).map_or(&[], |s| s.items.as_slice())
    }
}
