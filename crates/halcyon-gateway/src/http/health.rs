use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use halcyon_core::config::PROTOCOL_VERSION;

use crate::app::AppState;

/// GET /health — liveness probe (spec.md §4.13). Mirrors the periodic
/// `health` WS event (see `app::spawn_health_broadcast`) plus version info.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let sessions = state.session_log.list().map(|s| s.len()).unwrap_or(0);

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL_VERSION,
        "uptime_secs": state.uptime_secs(),
        "ws_clients": state.ws_clients.len(),
        "sessions": sessions,
        "providers": state.runtime.provider_names(),
    }))
}
