//! RPC method handlers.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, instrument};

use spotter_core::{SessionStore, SessionSummary, SummaryId, SummarySink};
use spotter_store::SqliteStore;
use spotter_telemetry::{LogQuery, TelemetryGuard};

use crate::client::{ClientId, ClientRegistry};
use crate::rpc::{self, RpcResponse};

/// Shared state available to all RPC handlers.
pub struct HandlerState {
    pub store: Arc<SqliteStore>,
    pub registry: Arc<ClientRegistry>,
    pub telemetry: Option<Arc<TelemetryGuard>>,
}

impl HandlerState {
    pub fn new(store: Arc<SqliteStore>, registry: Arc<ClientRegistry>) -> Self {
        Self {
            store,
            registry,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryGuard>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }
}

/// Dispatch an RPC method. `client` is the calling connection, absent for
/// plain HTTP callers.
pub async fn dispatch(
    state: &Arc<HandlerState>,
    client: Option<&ClientId>,
    method: &str,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    match method {
        "store.write" => store_write(state, params, id).await,
        "store.readOnce" => store_read_once(state, params, id).await,
        "store.readDocument" => store_read_document(state, params, id).await,
        "store.subscribe" => store_subscribe(state, client, params, id).await,
        "store.unsubscribe" => store_unsubscribe(state, client, params, id),

        "summary.record" => summary_record(state, params, id).await,
        "summary.get" => summary_get(state, params, id).await,

        "system.ping" | "health" => health(state, id),
        "telemetry.logs" => telemetry_logs(state, params, id),

        _ => RpcResponse::method_not_found(id, method),
    }
}

#[instrument(skip_all, fields(session_id, path))]
async fn store_write(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let (session_id, path) = match (rpc::require_session(params), rpc::require_path(params)) {
        (Ok(s), Ok(p)) => (s, p),
        (Err(e), _) | (_, Err(e)) => return RpcResponse::invalid_params(id, e),
    };
    tracing::Span::current()
        .record("session_id", session_id.as_str())
        .record("path", path.as_str());

    let Some(value) = params.get("value").cloned() else {
        return RpcResponse::invalid_params(id, "Missing required parameter: value");
    };

    match state.store.write(&session_id, &path, value).await {
        Ok(revision) => RpcResponse::success(id, json!({ "revision": revision })),
        Err(e) => RpcResponse::store_error(id, &e),
    }
}

async fn store_read_once(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let (session_id, path) = match (rpc::require_session(params), rpc::require_path(params)) {
        (Ok(s), Ok(p)) => (s, p),
        (Err(e), _) | (_, Err(e)) => return RpcResponse::invalid_params(id, e),
    };

    match state.store.read_once(&session_id, &path).await {
        Ok(snapshot) => RpcResponse::success(
            id,
            json!({ "revision": snapshot.revision, "value": snapshot.value }),
        ),
        Err(e) => RpcResponse::store_error(id, &e),
    }
}

async fn store_read_document(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match rpc::require_session(params) {
        Ok(s) => s,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    match state.store.read_document(&session_id).await {
        Ok(Some(snapshot)) => RpcResponse::success(
            id,
            json!({ "revision": snapshot.revision, "value": snapshot.value }),
        ),
        Ok(None) => RpcResponse::success(id, json!({ "revision": 0, "value": null })),
        Err(e) => RpcResponse::store_error(id, &e),
    }
}

/// Register the watch before reading, so no write between the two is lost.
/// The caller keeps only pushed changes newer than the returned revision.
async fn store_subscribe(
    state: &Arc<HandlerState>,
    client: Option<&ClientId>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let Some(client) = client else {
        return RpcResponse::error(id, rpc::INVALID_REQUEST, "Subscriptions require a WebSocket");
    };
    let (session_id, path) = match (rpc::require_session(params), rpc::require_path(params)) {
        (Ok(s), Ok(p)) => (s, p),
        (Err(e), _) | (_, Err(e)) => return RpcResponse::invalid_params(id, e),
    };

    if !state
        .registry
        .subscribe(client, session_id.clone(), path.clone())
    {
        return RpcResponse::error(id, rpc::INVALID_REQUEST, "Unknown connection");
    }
    debug!(client_id = %client, session_id = %session_id, path = %path, "subscribed");

    match state.store.read_once(&session_id, &path).await {
        Ok(snapshot) => RpcResponse::success(
            id,
            json!({
                "subscribed": true,
                "revision": snapshot.revision,
                "value": snapshot.value,
            }),
        ),
        Err(e) => {
            state.registry.unsubscribe(client, &session_id, &path);
            RpcResponse::store_error(id, &e)
        }
    }
}

fn store_unsubscribe(
    state: &Arc<HandlerState>,
    client: Option<&ClientId>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let Some(client) = client else {
        return RpcResponse::error(id, rpc::INVALID_REQUEST, "Subscriptions require a WebSocket");
    };
    let (session_id, path) = match (rpc::require_session(params), rpc::require_path(params)) {
        (Ok(s), Ok(p)) => (s, p),
        (Err(e), _) | (_, Err(e)) => return RpcResponse::invalid_params(id, e),
    };

    let removed = state.registry.unsubscribe(client, &session_id, &path);
    RpcResponse::success(id, json!({ "removed": removed }))
}

async fn summary_record(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let summary: SessionSummary = match params.get("summary").cloned().map(serde_json::from_value) {
        Some(Ok(s)) => s,
        Some(Err(e)) => return RpcResponse::invalid_params(id, format!("Invalid summary: {e}")),
        None => return RpcResponse::invalid_params(id, "Missing required parameter: summary"),
    };

    match state.store.record_summary(&summary).await {
        Ok(summary_id) => RpcResponse::success(id, json!({ "summaryId": summary_id })),
        Err(e) => RpcResponse::store_error(id, &e),
    }
}

/// Look up by `summaryId`, or by `sessionId` when the id isn't known yet.
async fn summary_get(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let summary_id = match rpc::optional_str(params, "summaryId") {
        Some(raw) => Some(SummaryId::from_raw(raw)),
        None => {
            let session_id = match rpc::require_session(params) {
                Ok(s) => s,
                Err(_) => {
                    return RpcResponse::invalid_params(
                        id,
                        "Missing required parameter: summaryId or sessionId",
                    )
                }
            };
            match state.store.find_by_session(&session_id).await {
                Ok(found) => found,
                Err(e) => return RpcResponse::store_error(id, &e),
            }
        }
    };

    let Some(summary_id) = summary_id else {
        return RpcResponse::success(id, json!({ "summary": null }));
    };
    match state.store.get_summary(&summary_id).await {
        Ok(summary) => RpcResponse::success(
            id,
            json!({ "summaryId": summary_id, "summary": summary }),
        ),
        Err(e) => RpcResponse::store_error(id, &e),
    }
}

fn health(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    let db_ok = state.store.database().ping();

    RpcResponse::success(
        id,
        json!({
            "status": if db_ok { "healthy" } else { "degraded" },
            "components": {
                "database": if db_ok { "ok" } else { "error" },
            },
            "connections": state.registry.count(),
            "subscriptions": state.registry.subscription_count(),
        }),
    )
}

fn telemetry_logs(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let Some(log_sink) = state.telemetry.as_ref().and_then(|t| t.logs()) else {
        return RpcResponse::success(
            id,
            json!({ "logs": [], "totalCount": 0, "enabled": false }),
        );
    };

    let query = LogQuery {
        level: rpc::optional_str(params, "level").map(str::to_string),
        session_id: rpc::optional_str(params, "sessionId").map(str::to_string),
        role: rpc::optional_str(params, "role").map(str::to_string),
        limit: rpc::optional_i64(params, "limit").map(|v| v.clamp(1, 1000) as u32),
    };

    match (log_sink.query(&query), log_sink.count()) {
        (Ok(logs), Ok(total)) => RpcResponse::success(
            id,
            json!({ "logs": logs, "totalCount": total, "enabled": true }),
        ),
        (Err(e), _) | (_, Err(e)) => RpcResponse::internal_error(id, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spotter_store::Database;
    use spotter_telemetry::SqliteLogSink;

    fn setup() -> Arc<HandlerState> {
        let store = Arc::new(SqliteStore::new(Database::in_memory().unwrap()));
        Arc::new(HandlerState::new(store, Arc::new(ClientRegistry::new(32))))
    }

    async fn call(state: &Arc<HandlerState>, method: &str, params: serde_json::Value) -> RpcResponse {
        dispatch(state, None, method, &params, Some(json!(1))).await
    }

    #[tokio::test]
    async fn dispatch_unknown_method() {
        let state = setup();
        let resp = call(&state, "foo.bar", json!({})).await;
        assert_eq!(resp.error.as_ref().unwrap().code, "METHOD_NOT_FOUND");
    }

    #[tokio::test]
    async fn write_then_read_once() {
        let state = setup();
        let resp = call(
            &state,
            "store.write",
            json!({"sessionId": "sess_1", "path": "workoutState.currentItemIndex", "value": 2}),
        )
        .await;
        assert!(resp.success);
        assert_eq!(resp.result.unwrap()["revision"], 1);

        let resp = call(
            &state,
            "store.readOnce",
            json!({"sessionId": "sess_1", "path": "workoutState"}),
        )
        .await;
        let result = resp.result.unwrap();
        assert_eq!(result["revision"], 1);
        assert_eq!(result["value"], json!({"currentItemIndex": 2}));
    }

    #[tokio::test]
    async fn write_requires_params() {
        let state = setup();
        let resp = call(&state, "store.write", json!({"sessionId": "sess_1", "path": "a"})).await;
        assert_eq!(resp.error.unwrap().code, "INVALID_PARAMS");

        let resp = call(&state, "store.write", json!({"sessionId": "sess_1", "path": "a..b", "value": 1})).await;
        assert_eq!(resp.error.unwrap().code, "INVALID_PARAMS");
    }

    #[tokio::test]
    async fn read_document_of_unknown_session_is_empty() {
        let state = setup();
        let resp = call(&state, "store.readDocument", json!({"sessionId": "sess_none"})).await;
        let result = resp.result.unwrap();
        assert_eq!(result["revision"], 0);
        assert!(result["value"].is_null());
    }

    #[tokio::test]
    async fn subscribe_needs_a_connection() {
        let state = setup();
        let resp = call(
            &state,
            "store.subscribe",
            json!({"sessionId": "sess_1", "path": "workoutState"}),
        )
        .await;
        assert_eq!(resp.error.unwrap().code, "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn subscribe_returns_snapshot_and_registers() {
        let state = setup();
        let (client, _rx) = state.registry.register();
        call(
            &state,
            "store.write",
            json!({"sessionId": "sess_1", "path": "sessionMetadata.isPaused", "value": true}),
        )
        .await;

        let params = json!({"sessionId": "sess_1", "path": "sessionMetadata"});
        let resp = dispatch(&state, Some(&client), "store.subscribe", &params, None).await;
        let result = resp.result.unwrap();
        assert_eq!(result["revision"], 1);
        assert_eq!(result["value"]["isPaused"], true);
        assert_eq!(state.registry.subscription_count(), 1);

        let resp = dispatch(&state, Some(&client), "store.unsubscribe", &params, None).await;
        assert_eq!(resp.result.unwrap()["removed"], true);
        assert_eq!(state.registry.subscription_count(), 0);
    }

    #[tokio::test]
    async fn summary_record_and_get() {
        let state = setup();
        let mut summary = SessionSummary::degraded(spotter_core::SessionId::from_raw("sess_1"));
        summary.note = "solid".into();
        let resp = call(&state, "summary.record", json!({ "summary": summary })).await;
        let summary_id = resp.result.unwrap()["summaryId"].as_str().unwrap().to_string();

        let resp = call(&state, "summary.get", json!({ "summaryId": summary_id })).await;
        assert_eq!(resp.result.unwrap()["summary"]["note"], "solid");

        let resp = call(&state, "summary.get", json!({ "sessionId": "sess_1" })).await;
        assert_eq!(resp.result.unwrap()["summaryId"], summary_id.as_str());

        let dup = call(&state, "summary.record", json!({ "summary": summary })).await;
        assert_eq!(dup.error.unwrap().code, "CONFLICT");
    }

    #[tokio::test]
    async fn summary_get_for_unfinished_session_is_null() {
        let state = setup();
        let resp = call(&state, "summary.get", json!({ "sessionId": "sess_open" })).await;
        assert!(resp.result.unwrap()["summary"].is_null());
    }

    #[tokio::test]
    async fn health_reports_database() {
        let state = setup();
        let resp = call(&state, "system.ping", json!({})).await;
        let result = resp.result.unwrap();
        assert_eq!(result["status"], "healthy");
        assert_eq!(result["components"]["database"], "ok");
    }

    #[tokio::test]
    async fn telemetry_logs_disabled_without_sink() {
        let state = setup();
        let resp = call(&state, "telemetry.logs", json!({})).await;
        assert_eq!(resp.result.unwrap()["enabled"], false);
    }

    #[tokio::test]
    async fn telemetry_logs_reads_sink() {
        let store = Arc::new(SqliteStore::new(Database::in_memory().unwrap()));
        let guard = TelemetryGuard::with_sink(Arc::new(SqliteLogSink::in_memory().unwrap()));
        let state = Arc::new(
            HandlerState::new(store, Arc::new(ClientRegistry::new(32)))
                .with_telemetry(Arc::new(guard)),
        );
        let resp = call(&state, "telemetry.logs", json!({"role": "trainer", "limit": 10})).await;
        let result = resp.result.unwrap();
        assert_eq!(result["enabled"], true);
        assert_eq!(result["totalCount"], 0);
    }
}
