use std::sync::Arc;

use serde_json::json;
use tokio::sync::broadcast;

use spotter_core::{Change, DocumentChange, DocumentPath, SessionId};

use crate::client::ClientRegistry;

/// Forwards committed store writes to every connection watching an
/// affected path.
pub struct EventBridge {
    registry: Arc<ClientRegistry>,
}

impl EventBridge {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    /// Push one change to its watchers. Returns the number of messages queued.
    pub fn forward(&self, change: &DocumentChange) -> usize {
        let mut delivered = 0;
        for (client_id, paths) in self.registry.watchers_of(&change.session_id) {
            for path in paths {
                let Some(projected) = change.project(&path) else {
                    continue;
                };
                let message = change_message(&change.session_id, &path, &projected);
                if self.registry.send_to(&client_id, message) {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    pub fn start(self, mut rx: broadcast::Receiver<DocumentChange>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => {
                        let delivered = self.forward(&change);
                        tracing::trace!(
                            session_id = %change.session_id,
                            path = %change.written,
                            revision = change.revision,
                            delivered,
                            "change forwarded"
                        );
                    }
                    // Watchers resynchronize from the next change's full value.
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "event bridge lagged, dropped changes");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("event bridge channel closed");
                        break;
                    }
                }
            }
        })
    }
}

pub fn create_bridge(
    registry: Arc<ClientRegistry>,
    rx: broadcast::Receiver<DocumentChange>,
) -> tokio::task::JoinHandle<()> {
    EventBridge::new(registry).start(rx)
}

/// Wire shape of a pushed change.
pub fn change_message(session_id: &SessionId, path: &DocumentPath, change: &Change) -> String {
    json!({
        "type": "store.change",
        "sessionId": session_id,
        "path": path,
        "revision": change.revision,
        "value": change.value,
    })
    .to_string()
}
