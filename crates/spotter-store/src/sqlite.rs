//! SQLite-backed session store. Each session is one JSON document row; a
//! write rewrites the row and bumps its revision inside the connection lock.

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, instrument};

use spotter_core::document::{self, DocumentChange};
use spotter_core::{
    ChangeStream, DocumentPath, SessionId, SessionStore, SessionSummary, Snapshot, StoreError,
    SummaryId, SummarySink,
};

use crate::database::Database;
use crate::error::SqlResultExt;
use crate::hub::ChangeHub;
use crate::row_helpers;

#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
    hub: ChangeHub,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            hub: ChangeHub::default(),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Every committed change across all sessions.
    pub fn changes(&self) -> broadcast::Receiver<DocumentChange> {
        self.hub.subscribe_all()
    }

    fn load(
        conn: &rusqlite::Connection,
        session_id: &SessionId,
    ) -> Result<Option<(u64, Value)>, StoreError> {
        let row = conn
            .query_row(
                "SELECT revision, document FROM session_documents WHERE session_id = ?1",
                params![session_id.as_str()],
                |row| {
                    let revision: i64 = row.get(0)?;
                    let raw: String = row.get(1)?;
                    Ok((revision, raw))
                },
            )
            .optional()
            .store_err()?;

        match row {
            Some((revision, raw)) => {
                let value = row_helpers::parse_json(&raw, "session_documents", "document")?;
                Ok(Some((revision.max(0) as u64, value)))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    #[instrument(skip(self, value), fields(session_id = %session_id, path = %path))]
    async fn write(
        &self,
        session_id: &SessionId,
        path: &DocumentPath,
        value: Value,
    ) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let (revision, mut doc) = Self::load(conn, session_id)?.unwrap_or((0, Value::Null));
            document::assign(&mut doc, path, value);
            let revision = revision + 1;

            let raw = serde_json::to_string(&doc)?;
            conn.execute(
                "INSERT INTO session_documents (session_id, revision, document, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(session_id) DO UPDATE SET
                    revision = excluded.revision,
                    document = excluded.document,
                    updated_at = excluded.updated_at",
                params![
                    session_id.as_str(),
                    revision as i64,
                    raw,
                    chrono::Utc::now().to_rfc3339()
                ],
            )
            .store_err()?;

            debug!(revision, "document written");
            self.hub.publish(DocumentChange {
                session_id: session_id.clone(),
                written: path.clone(),
                revision,
                document: Arc::new(doc),
            });
            Ok(revision)
        })
    }

    async fn read_once(
        &self,
        session_id: &SessionId,
        path: &DocumentPath,
    ) -> Result<Snapshot, StoreError> {
        let loaded = self.db.with_conn(|conn| Self::load(conn, session_id))?;
        Ok(match loaded {
            Some((revision, doc)) => Snapshot {
                revision,
                value: document::lookup(&doc, path).cloned(),
            },
            None => Snapshot {
                revision: 0,
                value: None,
            },
        })
    }

    async fn subscribe(
        &self,
        session_id: &SessionId,
        path: &DocumentPath,
    ) -> Result<ChangeStream, StoreError> {
        Ok(self.hub.subscribe(session_id, path))
    }

    async fn read_document(&self, session_id: &SessionId) -> Result<Option<Snapshot>, StoreError> {
        let loaded = self.db.with_conn(|conn| Self::load(conn, session_id))?;
        Ok(loaded.map(|(revision, doc)| Snapshot {
            revision,
            value: Some(doc),
        }))
    }
}

#[async_trait]
impl SummarySink for SqliteStore {
    #[instrument(skip(self, summary), fields(session_id = %summary.session_id))]
    async fn record_summary(&self, summary: &SessionSummary) -> Result<SummaryId, StoreError> {
        let id = SummaryId::new();
        let payload = serde_json::to_string(summary)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO session_summaries (id, session_id, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    id.as_str(),
                    summary.session_id.as_str(),
                    payload,
                    chrono::Utc::now().to_rfc3339()
                ],
            )
            .store_err()
        })?;
        Ok(id)
    }

    async fn get_summary(&self, id: &SummaryId) -> Result<Option<SessionSummary>, StoreError> {
        let raw: Option<String> = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT payload FROM session_summaries WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .store_err()
        })?;
        raw.map(|raw| row_helpers::parse_json(&raw, "session_summaries", "payload"))
            .transpose()
    }

    async fn find_by_session(&self, session_id: &SessionId) -> Result<Option<SummaryId>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id FROM session_summaries WHERE session_id = ?1",
                params![session_id.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .store_err()
            .map(|id| id.map(SummaryId::from_raw))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    fn store() -> SqliteStore {
        SqliteStore::new(Database::in_memory().unwrap())
    }

    #[tokio::test]
    async fn write_creates_document() {
        let store = store();
        let sid = SessionId::from_raw("s1");
        let rev = store
            .write(&sid, &DocumentPath::appointment_note(), json!("legs"))
            .await
            .unwrap();
        assert_eq!(rev, 1);

        let doc = store.read_document(&sid).await.unwrap().unwrap();
        assert_eq!(doc.revision, 1);
        assert_eq!(doc.value, Some(json!({"appointmentNote": "legs"})));
    }

    #[tokio::test]
    async fn nested_write_preserves_siblings() {
        let store = store();
        let sid = SessionId::from_raw("s1");
        store
            .write(
                &sid,
                &DocumentPath::workout_state(),
                json!({"currentItemIndex": 0, "currentSetIndex": 0}),
            )
            .await
            .unwrap();
        store
            .write(
                &sid,
                &DocumentPath::workout_state().child("currentSetIndex"),
                json!(1),
            )
            .await
            .unwrap();

        let snap = store.read_once(&sid, &DocumentPath::workout_state()).await.unwrap();
        assert_eq!(snap.revision, 2);
        assert_eq!(
            snap.value,
            Some(json!({"currentItemIndex": 0, "currentSetIndex": 1}))
        );
    }

    #[tokio::test]
    async fn missing_session_reads_revision_zero() {
        let store = store();
        let snap = store
            .read_once(&SessionId::from_raw("nope"), &DocumentPath::workout_state())
            .await
            .unwrap();
        assert_eq!(snap.revision, 0);
        assert!(snap.value.is_none());
    }

    #[tokio::test]
    async fn subscription_receives_committed_writes() {
        let store = store();
        let sid = SessionId::from_raw("s1");
        let mut stream = store
            .subscribe(&sid, &DocumentPath::session_metadata())
            .await
            .unwrap();
        let mut all = store.changes();

        store
            .write(
                &sid,
                &DocumentPath::session_metadata().child("isPaused"),
                json!(true),
            )
            .await
            .unwrap();

        let change = stream.next().await.unwrap().unwrap();
        assert_eq!(change.revision, 1);
        assert_eq!(change.value, Some(json!({"isPaused": true})));

        let raw = all.recv().await.unwrap();
        assert_eq!(raw.session_id, sid);
    }

    #[tokio::test]
    async fn summary_roundtrip_and_conflict() {
        let store = store();
        let sid = SessionId::from_raw("s1");
        let mut summary = SessionSummary::degraded(sid.clone());
        summary.note = "felt strong".into();

        let id = store.record_summary(&summary).await.unwrap();
        assert_eq!(store.get_summary(&id).await.unwrap(), Some(summary.clone()));
        assert_eq!(store.find_by_session(&sid).await.unwrap(), Some(id));

        let dup = store.record_summary(&summary).await;
        assert!(matches!(dup, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn unknown_summary_is_none() {
        let store = store();
        assert!(store
            .get_summary(&SummaryId::from_raw("sum_missing"))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_by_session(&SessionId::from_raw("s1"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn corrupt_document_is_reported() {
        let store = store();
        store
            .database()
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO session_documents (session_id, revision, document, updated_at)
                     VALUES ('bad', 1, 'not json', '2026-01-01T00:00:00Z')",
                    [],
                )
                .store_err()
            })
            .unwrap();

        let err = store
            .read_once(&SessionId::from_raw("bad"), &DocumentPath::workout_state())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CorruptRow { .. }));
    }
}
