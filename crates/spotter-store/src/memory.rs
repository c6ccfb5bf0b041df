//! In-process session store. Used by tests and by single-device demos where
//! both participants share one process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::instrument;

use spotter_core::document::{self, DocumentChange};
use spotter_core::{
    ChangeStream, DocumentPath, SessionId, SessionStore, SessionSummary, Snapshot, StoreError,
    SummaryId, SummarySink,
};

use crate::hub::ChangeHub;

#[derive(Default)]
struct StoredDocument {
    revision: u64,
    value: Value,
}

pub struct MemoryStore {
    documents: Mutex<HashMap<SessionId, StoredDocument>>,
    summaries: Mutex<Vec<(SummaryId, SessionSummary)>>,
    hub: ChangeHub,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
            summaries: Mutex::new(Vec::new()),
            hub: ChangeHub::default(),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of committed document writes.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn summary_count(&self) -> usize {
        self.summaries.lock().len()
    }

    pub fn hub(&self) -> &ChangeHub {
        &self.hub
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    #[instrument(skip(self, value), fields(session_id = %session_id, path = %path))]
    async fn write(
        &self,
        session_id: &SessionId,
        path: &DocumentPath,
        value: Value,
    ) -> Result<u64, StoreError> {
        let mut documents = self.documents.lock();
        let doc = documents.entry(session_id.clone()).or_default();
        document::assign(&mut doc.value, path, value);
        doc.revision += 1;
        self.writes.fetch_add(1, Ordering::Relaxed);

        self.hub.publish(DocumentChange {
            session_id: session_id.clone(),
            written: path.clone(),
            revision: doc.revision,
            document: Arc::new(doc.value.clone()),
        });
        Ok(doc.revision)
    }

    async fn read_once(
        &self,
        session_id: &SessionId,
        path: &DocumentPath,
    ) -> Result<Snapshot, StoreError> {
        let documents = self.documents.lock();
        Ok(match documents.get(session_id) {
            Some(doc) => Snapshot {
                revision: doc.revision,
                value: document::lookup(&doc.value, path).cloned(),
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
        Ok(self.documents.lock().get(session_id).map(|doc| Snapshot {
            revision: doc.revision,
            value: Some(doc.value.clone()),
        }))
    }
}

#[async_trait]
impl SummarySink for MemoryStore {
    async fn record_summary(&self, summary: &SessionSummary) -> Result<SummaryId, StoreError> {
        let mut summaries = self.summaries.lock();
        if summaries
            .iter()
            .any(|(_, s)| s.session_id == summary.session_id)
        {
            return Err(StoreError::Conflict(format!(
                "summary already recorded for session {}",
                summary.session_id
            )));
        }
        let id = SummaryId::new();
        summaries.push((id.clone(), summary.clone()));
        Ok(id)
    }

    async fn get_summary(&self, id: &SummaryId) -> Result<Option<SessionSummary>, StoreError> {
        Ok(self
            .summaries
            .lock()
            .iter()
            .find(|(sid, _)| sid == id)
            .map(|(_, s)| s.clone()))
    }

    async fn find_by_session(&self, session_id: &SessionId) -> Result<Option<SummaryId>, StoreError> {
        Ok(self
            .summaries
            .lock()
            .iter()
            .find(|(_, s)| &s.session_id == session_id)
            .map(|(id, _)| id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn write_then_read_nested_path() {
        let store = MemoryStore::new();
        let sid = SessionId::from_raw("s1");
        store
            .write(&sid, &DocumentPath::workout_state(), json!({"currentItemIndex": 0}))
            .await
            .unwrap();
        let rev = store
            .write(
                &sid,
                &DocumentPath::workout_state().child("currentItemIndex"),
                json!(2),
            )
            .await
            .unwrap();
        assert_eq!(rev, 2);

        let snap = store.read_once(&sid, &DocumentPath::workout_state()).await.unwrap();
        assert_eq!(snap.revision, 2);
        assert_eq!(snap.value, Some(json!({"currentItemIndex": 2})));
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn unknown_session_reads_empty() {
        let store = MemoryStore::new();
        let sid = SessionId::from_raw("missing");
        let snap = store.read_once(&sid, &DocumentPath::workout_state()).await.unwrap();
        assert_eq!(snap.revision, 0);
        assert!(snap.value.is_none());
        assert!(store.read_document(&sid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn subscribers_see_writes_in_order() {
        let store = MemoryStore::new();
        let sid = SessionId::from_raw("s1");
        let mut changes = store
            .subscribe(&sid, &DocumentPath::workout_state())
            .await
            .unwrap();

        for i in 0..3 {
            store
                .write(
                    &sid,
                    &DocumentPath::workout_state().child("currentSetIndex"),
                    json!(i),
                )
                .await
                .unwrap();
        }
        store
            .write(&sid, &DocumentPath::appointment_note(), json!("ignored"))
            .await
            .unwrap();

        let revisions: Vec<u64> = changes
            .by_ref()
            .take(3)
            .map(|c| c.unwrap().revision)
            .collect()
            .await;
        assert_eq!(revisions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn summaries_are_append_only_per_session() {
        let store = MemoryStore::new();
        let summary = SessionSummary::degraded(SessionId::from_raw("s1"));
        let id = store.record_summary(&summary).await.unwrap();

        let again = store.record_summary(&summary).await;
        assert!(matches!(again, Err(StoreError::Conflict(_))));

        assert_eq!(store.get_summary(&id).await.unwrap(), Some(summary));
        assert_eq!(
            store.find_by_session(&SessionId::from_raw("s1")).await.unwrap(),
            Some(id)
        );
        assert_eq!(store.summary_count(), 1);
    }
}
