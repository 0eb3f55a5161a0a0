use axum::{extract::State, response::IntoResponse, Json};
use tracing::debug;

use crate::gateway::AppState;

/// `GET /api/activities` - committed activities, most recent first.
pub(crate) async fn api_activities(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.monitor.activities().await)
}

/// `POST /api/poll` - run a poll (or join the running one) and return
/// its result.
pub(crate) async fn api_poll(State(state): State<AppState>) -> impl IntoResponse {
    debug!("gateway: poll requested");
    Json(state.monitor.poll().await)
}
