use serde::{Deserialize, Serialize};

use spotter_core::workout::Phase;
use spotter_core::{StoreError, TransportError};

/// Which side of the live session a controller acts for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Trainer,
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trainer => "trainer",
            Self::Client => "client",
        }
    }

    pub fn is_trainer(&self) -> bool {
        matches!(self, Self::Trainer)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected progression actions. Never touches the store.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProgressionError {
    #[error("no program selected")]
    NoProgram,

    #[error("selection is locked during the {phase} phase")]
    SelectionLocked { phase: Phase },
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AchievementError {
    #[error("achievement sink unavailable: {0}")]
    Unavailable(String),

    #[error("achievement rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("{role} may not {operation}")]
    AuthorityViolation {
        role: Role,
        operation: &'static str,
    },

    #[error("session already started")]
    AlreadyStarted,

    #[error("session already complete")]
    AlreadyComplete,

    #[error("session not started")]
    NotStarted,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("progression error: {0}")]
    Progression(#[from] ProgressionError),
}

impl CoordinatorError {
    /// Outcomes the UI treats as "nothing to do" rather than a failure.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::AlreadyStarted | Self::AlreadyComplete)
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthorityViolation { .. } => "authority_violation",
            Self::AlreadyStarted => "already_started",
            Self::AlreadyComplete => "already_complete",
            Self::NotStarted => "not_started",
            Self::Store(e) => e.error_kind(),
            Self::Transport(_) => "transport",
            Self::Progression(_) => "progression",
        }
    }
}
