use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;

use crate::document::{Change, DocumentPath, Snapshot};
use crate::errors::StoreError;
use crate::ids::{SessionId, SummaryId};
use crate::summary::SessionSummary;

/// Change notifications for one `(session, path)` subscription, in write order.
/// An `Err` item means the subscription is broken and must be re-established.
pub type ChangeStream = Pin<Box<dyn Stream<Item = Result<Change, StoreError>> + Send>>;

/// Keyed, subscribable document store shared by both participants.
///
/// Contract: last-write-wins per path, no cross-path transactions, per-session
/// revisions strictly increase with each committed write and notifications
/// reach every subscriber in revision order.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Write `value` at `path`. Nested paths are a single atomic write.
    /// Returns the session revision assigned to the write.
    async fn write(
        &self,
        session_id: &SessionId,
        path: &DocumentPath,
        value: Value,
    ) -> Result<u64, StoreError>;

    async fn read_once(
        &self,
        session_id: &SessionId,
        path: &DocumentPath,
    ) -> Result<Snapshot, StoreError>;

    /// Standing registration for changes affecting `path`. Only writes
    /// committed after the call are delivered.
    async fn subscribe(
        &self,
        session_id: &SessionId,
        path: &DocumentPath,
    ) -> Result<ChangeStream, StoreError>;

    /// Whole document at its current revision. `None` for unknown sessions.
    async fn read_document(&self, session_id: &SessionId) -> Result<Option<Snapshot>, StoreError>;
}

/// Append-only sink for completed session summaries.
#[async_trait]
pub trait SummarySink: Send + Sync {
    /// Record a summary. A second summary for the same session is a `Conflict`.
    async fn record_summary(&self, summary: &SessionSummary) -> Result<SummaryId, StoreError>;

    async fn get_summary(&self, id: &SummaryId) -> Result<Option<SessionSummary>, StoreError>;

    async fn find_by_session(&self, session_id: &SessionId) -> Result<Option<SummaryId>, StoreError>;
}
