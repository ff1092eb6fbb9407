use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;
use tracing::warn;

use crate::infra::app_state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: String,
    pub queue_depth: Option<u64>,
    pub workers_running: bool,
}

/// `GET /health`: 200 when the store answers, 503 otherwise.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store = match state.backends.store.ping().await {
        Ok(()) => Ok(()),
        Err(err) => {
            warn!(error = %err, "health check: store unreachable");
            Err(err.to_string())
        }
    };
    let queue_depth = state.backends.queue.depth().await.ok();
    let workers_running = state.workers.is_running().await;

    let (code, status, store) = match store {
        Ok(()) => (StatusCode::OK, "ok", "ok".to_string()),
        Err(reason) => (StatusCode::SERVICE_UNAVAILABLE, "degraded", reason),
    };

    (
        code,
        Json(HealthResponse {
            status,
            store,
            queue_depth,
            workers_running,
        }),
    )
}
