/// Errors crossing the session store boundary.
/// Classifies errors as transient (retry with backoff) or permanent.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    // Transient
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("subscription closed: {0}")]
    SubscriptionClosed(String),

    // Permanent
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        detail: String,
    },
    #[error("IO error: {0}")]
    Io(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::SubscriptionClosed(_))
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::SubscriptionClosed(_) => "subscription_closed",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::InvalidPath(_) => "invalid_path",
            Self::Serialization(_) => "serialization",
            Self::Database(_) => "database",
            Self::CorruptRow { .. } => "corrupt_row",
            Self::Io(_) => "io",
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Errors reported by the external audio/video transport.
/// Never propagated into workout progression.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("join failed with code {code}: {message}")]
    JoinFailed { code: i32, message: String },
    #[error("leave failed with code {code}")]
    LeaveFailed { code: i32 },
    #[error("device error: {0}")]
    Device(String),
    #[error("not joined")]
    NotJoined,
}

impl TransportError {
    pub fn code(&self) -> i32 {
        match self {
            Self::JoinFailed { code, .. } | Self::LeaveFailed { code } => *code,
            Self::Device(_) => -1,
            Self::NotJoined => -2,
        }
    }
}
