use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use spotter_core::{ChangeStream, DocumentChange, DocumentPath, SessionId, StoreError};

/// Fan-out of committed writes to subscribers.
///
/// Stores publish while still holding their write lock, so the broadcast
/// order matches revision order.
#[derive(Clone)]
pub struct ChangeHub {
    tx: broadcast::Sender<DocumentChange>,
}

impl ChangeHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, change: DocumentChange) {
        // No receivers is fine: nobody is observing this store yet.
        let _ = self.tx.send(change);
    }

    /// Every change across all sessions.
    pub fn subscribe_all(&self) -> broadcast::Receiver<DocumentChange> {
        self.tx.subscribe()
    }

    /// Changes affecting `path` of one session.
    pub fn subscribe(&self, session_id: &SessionId, path: &DocumentPath) -> ChangeStream {
        let session_id = session_id.clone();
        let path = path.clone();
        let stream = BroadcastStream::new(self.tx.subscribe()).filter_map(move |item| {
            let out = match item {
                Ok(change) if change.session_id == session_id => change.project(&path).map(Ok),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    tracing::warn!(session_id = %session_id, skipped = n, "subscriber lagged");
                    Some(Err(StoreError::SubscriptionClosed(format!(
                        "lagged by {n} changes"
                    ))))
                }
            };
            futures::future::ready(out)
        });
        Box::pin(stream)
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn change(session: &str, path: DocumentPath, revision: u64) -> DocumentChange {
        DocumentChange {
            session_id: SessionId::from_raw(session),
            written: path,
            revision,
            document: Arc::new(json!({"workoutState": {"currentSetIndex": revision}})),
        }
    }

    #[tokio::test]
    async fn delivers_matching_changes_in_order() {
        let hub = ChangeHub::default();
        let sid = SessionId::from_raw("a");
        let mut stream = hub.subscribe(&sid, &DocumentPath::workout_state());

        hub.publish(change("a", DocumentPath::workout_state(), 1));
        hub.publish(change("b", DocumentPath::workout_state(), 1));
        hub.publish(change("a", DocumentPath::session_metadata(), 2));
        hub.publish(change("a", DocumentPath::workout_state().child("currentSetIndex"), 3));

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.revision, 1);
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.revision, 3);
        assert_eq!(second.value, Some(json!({"currentSetIndex": 3})));
    }

    #[tokio::test]
    async fn lag_surfaces_as_retryable_error() {
        let hub = ChangeHub::new(2);
        let sid = SessionId::from_raw("a");
        let mut stream = hub.subscribe(&sid, &DocumentPath::workout_state());

        for rev in 1..=5 {
            hub.publish(change("a", DocumentPath::workout_state(), rev));
        }

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let hub = ChangeHub::default();
        hub.publish(change("a", DocumentPath::workout_state(), 1));
        assert_eq!(hub.receiver_count(), 0);
    }
}
