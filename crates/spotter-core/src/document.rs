//! Addressing and typed views over a session document.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::StoreError;
use crate::ids::{SessionId, SummaryId, UserId};
use crate::metadata::SessionMetadata;
use crate::program::SelectedProgram;
use crate::workout::WorkoutState;

pub const WORKOUT_STATE: &str = "workoutState";
pub const SESSION_METADATA: &str = "sessionMetadata";
pub const SELECTED_PROGRAM: &str = "selectedProgram";
pub const APPOINTMENT_NOTE: &str = "appointmentNote";
pub const PARTICIPANTS: &str = "participants";
pub const SUMMARY_ID: &str = "summaryId";

/// Dotted path into a session document, e.g. `workoutState.currentItemIndex`.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentPath(String);

impl DocumentPath {
    pub fn parse(raw: impl Into<String>) -> Result<Self, StoreError> {
        let raw = raw.into();
        if raw.is_empty() || raw.split('.').any(str::is_empty) {
            return Err(StoreError::InvalidPath(raw));
        }
        Ok(Self(raw))
    }

    pub fn workout_state() -> Self {
        Self(WORKOUT_STATE.to_string())
    }

    pub fn session_metadata() -> Self {
        Self(SESSION_METADATA.to_string())
    }

    pub fn selected_program() -> Self {
        Self(SELECTED_PROGRAM.to_string())
    }

    pub fn appointment_note() -> Self {
        Self(APPOINTMENT_NOTE.to_string())
    }

    pub fn participants() -> Self {
        Self(PARTICIPANTS.to_string())
    }

    pub fn summary_id() -> Self {
        Self(SUMMARY_ID.to_string())
    }

    /// Nested field under this path.
    pub fn child(&self, field: &str) -> Self {
        Self(format!("{}.{}", self.0, field))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// True if `other` is this path or nested under it.
    pub fn contains(&self, other: &DocumentPath) -> bool {
        other.0 == self.0
            || (other.0.len() > self.0.len()
                && other.0.starts_with(&self.0)
                && other.0.as_bytes()[self.0.len()] == b'.')
    }

    /// True if a write to `written` can change the value at this path:
    /// either the write is nested under us or it replaced an ancestor.
    pub fn is_affected_by(&self, written: &DocumentPath) -> bool {
        self.contains(written) || written.contains(self)
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DocumentPath {
    type Error = StoreError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<DocumentPath> for String {
    fn from(path: DocumentPath) -> Self {
        path.0
    }
}

/// Value at a path together with the session revision it was read at.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub revision: u64,
    pub value: Option<Value>,
}

/// A change notification for one subscribed path.
#[derive(Clone, Debug, PartialEq)]
pub struct Change {
    pub revision: u64,
    pub written: DocumentPath,
    pub value: Option<Value>,
}

/// Store-wide notification published after every committed write.
#[derive(Clone, Debug)]
pub struct DocumentChange {
    pub session_id: SessionId,
    pub written: DocumentPath,
    pub revision: u64,
    pub document: Arc<Value>,
}

impl DocumentChange {
    /// Project the change onto a subscribed path.
    pub fn project(&self, path: &DocumentPath) -> Option<Change> {
        if !path.is_affected_by(&self.written) {
            return None;
        }
        Some(Change {
            revision: self.revision,
            written: self.written.clone(),
            value: lookup(&self.document, path).cloned(),
        })
    }
}

/// Resolve a dotted path inside a JSON document.
pub fn lookup<'a>(document: &'a Value, path: &DocumentPath) -> Option<&'a Value> {
    let mut current = document;
    for segment in path.segments() {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Write `value` at a dotted path, creating intermediate objects.
/// A non-object ancestor is replaced by an object.
pub fn assign(document: &mut Value, path: &DocumentPath, value: Value) {
    let segments: Vec<&str> = path.segments().collect();
    assign_segments(document, &segments, value);
}

fn assign_segments(target: &mut Value, segments: &[&str], value: Value) {
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(map) = target {
        match segments {
            [] => {}
            [last] => {
                map.insert((*last).to_string(), value);
            }
            [head, rest @ ..] => {
                let child = map.entry((*head).to_string()).or_insert(Value::Null);
                assign_segments(child, rest, value);
            }
        }
    }
}

/// Whether a stored `workoutState` value is the no-op placeholder.
pub fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participants {
    pub trainer_id: UserId,
    #[serde(default)]
    pub client_ids: Vec<UserId>,
}

fn field<'a>(document: &'a Value, name: &str) -> Option<&'a Value> {
    document.get(name).filter(|v| !v.is_null())
}

/// Typed view over a whole session document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionSnapshot {
    pub revision: u64,
    pub workout_state: Option<WorkoutState>,
    pub session_metadata: SessionMetadata,
    pub selected_program: Option<SelectedProgram>,
    pub appointment_note: String,
    pub participants: Option<Participants>,
    pub summary_id: Option<SummaryId>,
}

impl SessionSnapshot {
    pub fn from_document(revision: u64, document: &Value) -> Result<Self, StoreError> {
        let workout_state = match field(document, WORKOUT_STATE) {
            v if is_empty_value(v) => None,
            Some(v) => Some(serde_json::from_value(v.clone())?),
            None => None,
        };
        let session_metadata = field(document, SESSION_METADATA)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()?
            .unwrap_or_default();
        let selected_program = field(document, SELECTED_PROGRAM)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()?;
        let appointment_note = field(document, APPOINTMENT_NOTE)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let participants = field(document, PARTICIPANTS)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()?;
        let summary_id = field(document, SUMMARY_ID)
            .and_then(Value::as_str)
            .map(SummaryId::from_raw);

        Ok(Self {
            revision,
            workout_state,
            session_metadata,
            selected_program,
            appointment_note,
            participants,
            summary_id,
        })
    }

    pub fn is_started(&self) -> bool {
        self.workout_state.is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.session_metadata.is_complete
            || self
                .workout_state
                .as_ref()
                .is_some_and(|s| s.is_workout_complete)
    }
}
