//! Implementations of the four WS methods (spec.md §6): `health`,
//! `sessions.list`, `sessions.read`, `restart`.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use halcyon_protocol::frames::{HealthPayload, ResFrame};
use halcyon_session::SessionKey;

use crate::app::AppState;

pub fn health(req_id: &str, state: &Arc<AppState>) -> ResFrame {
    let payload = HealthPayload {
        status: "ok".to_string(),
        uptime_secs: state.uptime_secs(),
        clients: state.ws_clients.len(),
        sessions: state.session_log.list().map(|s| s.len()).unwrap_or(0),
        timestamp: Utc::now().to_rfc3339(),
    };
    ResFrame::ok(req_id, payload)
}

pub fn sessions_list(req_id: &str, state: &Arc<AppState>) -> ResFrame {
    match state.session_log.list() {
        Ok(summaries) => ResFrame::ok(req_id, summaries),
        Err(e) => ResFrame::err(req_id, "internal_error", &e.to_string()),
    }
}

#[derive(Deserialize)]
struct SessionsReadParams {
    key: String,
}

pub fn sessions_read(req_id: &str, params: Option<&Value>, state: &Arc<AppState>) -> ResFrame {
    let Some(params) = params.cloned().and_then(|p| serde_json::from_value::<SessionsReadParams>(p).ok()) else {
        return ResFrame::err(req_id, "invalid_params", "expected {\"key\": \"agent:channel:target\"}");
    };
    let Ok(key) = SessionKey::parse(&params.key) else {
        return ResFrame::err(req_id, "invalid_params", "malformed session key");
    };
    match state.session_log.read(&key) {
        Ok(turns) => ResFrame::ok(req_id, turns),
        Err(e) => ResFrame::err(req_id, "internal_error", &e.to_string()),
    }
}

#[derive(Deserialize, Default)]
struct RestartParams {
    #[serde(default)]
    delivery_target: String,
    #[serde(default)]
    reason: String,
}

/// A manual restart triggered over WS has no channel to notify on recovery
/// by default — the connection that asked is about to be dropped along
/// with the rest of the process — unless the caller supplies its own
/// `delivery_target` for the successor to notify instead.
pub fn restart(req_id: &str, params: Option<&Value>, state: &Arc<AppState>) -> ResFrame {
    let parsed =
        params.cloned().and_then(|p| serde_json::from_value::<RestartParams>(p).ok()).unwrap_or_default();
    let delivery_target = (!parsed.delivery_target.is_empty()).then_some(parsed.delivery_target.as_str());
    let reason = if parsed.reason.is_empty() { "manual restart (ws)".to_string() } else { parsed.reason };

    match state.restart.trigger_restart(&reason, None, delivery_target, None) {
        Ok(()) => ResFrame::ok(req_id, serde_json::json!({ "restarting": true })),
        Err(e) => ResFrame::err(req_id, "internal_error", &e.to_string()),
    }
}
