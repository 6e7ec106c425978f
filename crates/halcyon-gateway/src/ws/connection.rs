use axum::{
    extract::{ws::Message, ws::WebSocket, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use halcyon_protocol::frames::InboundFrame;
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::AppState;
use crate::ws::{dispatch, send};

/// Axum handler — upgrades HTTP to WebSocket at `GET /ws`. No handshake:
/// every connection may dispatch requests immediately (spec.md §6 has no
/// `connect`/auth method).
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, "new WS connection");
    state.ws_clients.insert(conn_id.clone(), ());

    let (mut tx, mut rx) = socket.split();
    let mut broadcast_rx = state.broadcaster.subscribe();

    loop {
        tokio::select! {
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        process_message(&conn_id, &text, &mut tx, &state).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(conn_id, error = %e, "WS read error, closing");
                        break;
                    }
                    _ => {}
                }
            }

            event = broadcast_rx.recv() => {
                if let Ok(payload) = event {
                    if tx.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    state.ws_clients.remove(&conn_id);
    info!(conn_id, "WS connection closed");
}

async fn process_message(
    conn_id: &str,
    text: &str,
    tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    state: &Arc<AppState>,
) {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(conn_id, error = %e, "malformed frame, ignoring");
            return;
        }
    };

    let Some(req) = frame.as_req() else {
        warn!(conn_id, "frame is not a request, ignoring");
        return;
    };

    let res = dispatch::route(&req.method, req.params.as_ref(), &req.id, state);
    let _ = send::json(tx, &res).await;
}
