use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::AppState;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    pub store: String,
    pub active_sessions: usize,
    pub checked_at: String,
}

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let version = env!("CARGO_PKG_VERSION").to_string();

    let store_result = state.sessions.reconciler().store().health_check().await;
    let (status, code, store) = match store_result {
        Ok(()) => ("healthy", StatusCode::OK, "up"),
        Err(e) => {
            warn!("transaction store health check failed: {}", e);
            ("degraded", StatusCode::SERVICE_UNAVAILABLE, "down")
        }
    };

    let response = HealthResponse {
        status: status.to_string(),
        version,
        environment: state.environment.clone(),
        store: store.to_string(),
        active_sessions: state.sessions.active_count(),
        checked_at: chrono::Utc::now().to_rfc3339(),
    };

    (code, Json(response))
}
