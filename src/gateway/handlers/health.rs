use axum::{extract::State, response::IntoResponse, Json};

use crate::gateway::AppState;

/// `GET /api/status`
pub(crate) async fn status_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// `GET /api/health`
pub(crate) async fn api_health(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.monitor.stats().await;
    let status = if stats.is_some() { "ok" } else { "stopped" };

    Json(serde_json::json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started.elapsed().as_secs(),
        "monitor": stats,
    }))
}
