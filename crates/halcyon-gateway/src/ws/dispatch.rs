use std::sync::Arc;

use halcyon_protocol::{frames::ResFrame, methods};

use crate::app::AppState;
use crate::ws::handlers;

/// Route a WS method call to its handler (spec.md §6: exactly four methods;
/// anything else is `METHOD_NOT_FOUND`).
pub fn route(method: &str, params: Option<&serde_json::Value>, req_id: &str, state: &Arc<AppState>) -> ResFrame {
    match method {
        methods::HEALTH => handlers::health(req_id, state),
        methods::SESSIONS_LIST => handlers::sessions_list(req_id, state),
        methods::SESSIONS_READ => handlers::sessions_read(req_id, params, state),
        methods::RESTART => handlers::restart(req_id, params, state),
        _ => ResFrame::err(req_id, "METHOD_NOT_FOUND", &format!("unknown method: {method}")),
    }
}
