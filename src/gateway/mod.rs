//! Minimal HTTP + WebSocket gateway over a running monitor.
//!
//! Starts by default; set `AGENT_WATCH_GATEWAY=0` to disable.  Serves:
//! - `GET  /api/status`     - returns `{ "status": "ok" }`
//! - `GET  /api/health`     - version, uptime and monitor counters
//! - `GET  /api/activities` - committed activities, most recent first
//! - `POST /api/poll`       - poll now and return the result
//! - `GET  /ws`             - WebSocket: current activities on connect,
//!   then one snapshot per change.

mod handlers;
mod ws;

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::time::Instant;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::monitor::MonitorHandle;

pub const DEFAULT_GATEWAY_ADDR: &str = "127.0.0.1:3900";

/// Handle returned by [`start_gateway`].
pub struct Gateway {
    /// Server task handle.
    pub handle: JoinHandle<()>,
    /// The address the server is actually listening on.
    pub addr: SocketAddr,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) monitor: MonitorHandle,
    pub(crate) monitor_name: Option<String>,
    pub(crate) started: Instant,
}

/// Start the gateway HTTP + WS server on `addr`.
pub async fn start_gateway(addr: SocketAddr, monitor: MonitorHandle) -> std::io::Result<Gateway> {
    let monitor_name = monitor.stats().await.map(|s| s.name);
    let state = AppState {
        monitor,
        monitor_name,
        started: Instant::now(),
    };

    let api_router = Router::new()
        .route("/status", get(handlers::health::status_handler))
        .route("/health", get(handlers::health::api_health))
        .route("/activities", get(handlers::activities::api_activities))
        .route("/poll", post(handlers::activities::api_poll));

    let app = Router::new()
        .nest("/api", api_router)
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("gateway server error: {e}");
        }
    });

    info!(%bound_addr, "gateway started");

    Ok(Gateway {
        handle,
        addr: bound_addr,
    })
}

/// Convenience: start the gateway unless `AGENT_WATCH_GATEWAY=0`.
///
/// Listens on `AGENT_WATCH_GATEWAY_ADDR`, else `configured`, else
/// [`DEFAULT_GATEWAY_ADDR`].  Returns `None` if the gateway is disabled
/// or could not bind.
pub async fn spawn_gateway_if_enabled(
    monitor: MonitorHandle,
    configured: Option<&str>,
) -> Option<Gateway> {
    if std::env::var("AGENT_WATCH_GATEWAY").as_deref() == Ok("0") {
        info!("gateway disabled (AGENT_WATCH_GATEWAY=0)");
        return None;
    }

    let raw = std::env::var("AGENT_WATCH_GATEWAY_ADDR")
        .ok()
        .or_else(|| configured.map(str::to_string))
        .unwrap_or_else(|| DEFAULT_GATEWAY_ADDR.to_string());
    let addr: SocketAddr = match raw.parse() {
        Ok(a) => a,
        Err(e) => {
            error!(addr = %raw, "invalid gateway address: {e}");
            return None;
        }
    };

    // Try up to 10 consecutive ports so a stale process doesn't block startup.
    let max_attempts = 10u16;
    let mut attempt_addr = addr;
    for attempt in 0..max_attempts {
        match start_gateway(attempt_addr, monitor.clone()).await {
            Ok(gw) => {
                if attempt > 0 {
                    info!(
                        original = %addr,
                        bound = %gw.addr,
                        "port {} in use, auto-bound to {}",
                        addr.port(),
                        gw.addr.port(),
                    );
                }
                return Some(gw);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse && attempt + 1 < max_attempts => {
                debug!(port = attempt_addr.port(), "port in use, trying next");
                attempt_addr.set_port(attempt_addr.port().saturating_add(1));
            }
            Err(e) => {
                error!("failed to start gateway: {e}");
                return None;
            }
        }
    }
    None
}
