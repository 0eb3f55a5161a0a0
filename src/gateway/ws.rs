use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use super::AppState;
use crate::activity::ActivitySnapshot;

/// `GET /ws` - upgrade to WebSocket.
pub(crate) async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Wire form of a snapshot: the snapshot's fields plus `"type": "snapshot"`.
pub(crate) fn snapshot_event(snapshot: &ActivitySnapshot) -> Option<String> {
    let mut value = match serde_json::to_value(snapshot) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "gateway: failed to serialize snapshot");
            return None;
        }
    };
    if let Some(obj) = value.as_object_mut() {
        obj.insert("type".into(), "snapshot".into());
    }
    Some(value.to_string())
}

/// Per-connection WebSocket logic.
///
/// The client gets the current activity set immediately, then one
/// snapshot per published change.  A text frame `poll` triggers a poll.
async fn handle_ws(mut socket: WebSocket, state: AppState) {
    let mut snapshots = state.monitor.subscribe();

    let initial = ActivitySnapshot {
        monitor: state.monitor_name.clone(),
        agents: state.monitor.activities().await,
        published_at: Utc::now(),
    };
    if let Some(json) = snapshot_event(&initial) {
        if socket.send(Message::Text(json)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            event = recv_snapshot(&mut snapshots) => {
                match event {
                    Ok(snapshot) => {
                        let Some(json) = snapshot_event(&snapshot) else { continue };
                        if socket.send(Message::Text(json)).await.is_err() {
                            break; // client disconnected
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        debug!(skipped = n, "ws client lagging, snapshots dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text.trim() == "poll" {
                            state.monitor.trigger_poll();
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!("ws recv error: {e}");
                        break;
                    }
                    _ => {} // ping/pong/binary - ignore
                }
            }
        }
    }
}

/// Next snapshot, or pend forever when the monitor publishes none.
async fn recv_snapshot(
    rx: &mut Option<tokio::sync::broadcast::Receiver<ActivitySnapshot>>,
) -> Result<ActivitySnapshot, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
