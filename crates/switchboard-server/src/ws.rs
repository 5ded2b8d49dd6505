//! `/ws`: one socket per UI client.
//!
//! Outgoing frames are the dispatch events of the client's own turns plus
//! every gateway broadcast. Approval prompts raised by this client's turns
//! go to this client only.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use switchboard_approval::{ApprovalBridge, ApprovalReply};
use switchboard_core::{EventSink, GatewayEvent};
use switchboard_dispatch::{DispatchEvent, DispatchRequest, SessionLocks};

use crate::AppState;

/// Frames a client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientFrame {
    #[serde(rename = "chat")]
    Chat {
        text: String,
        #[serde(default, rename = "sessionId")]
        session_id: Option<String>,
    },
    #[serde(rename = "approval:response")]
    ApprovalResponse(ApprovalReply),
}

/// Serialises gateway events onto one connection's write queue.
struct ConnectionSink(mpsc::UnboundedSender<String>);

impl ConnectionSink {
    fn send_json<T: serde::Serialize>(&self, value: &T) {
        match serde_json::to_string(value) {
            Ok(json) => {
                let _ = self.0.send(json);
            }
            Err(e) => warn!(error = %e, "ws: failed to serialise frame"),
        }
    }
}

impl EventSink for ConnectionSink {
    fn emit(&self, event: GatewayEvent) {
        self.send_json(&event);
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, "ws: new connection");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<String>();

    let write_conn_id = conn_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(msg) = client_rx.recv().await {
            if ws_tx.send(Message::Text(msg.into())).await.is_err() {
                debug!(conn_id = %write_conn_id, "ws: write loop closed");
                break;
            }
        }
    });

    let sink = Arc::new(ConnectionSink(client_tx.clone()));
    let bridge = Arc::new(ApprovalBridge::new(sink.clone(), state.approval_policy()));

    let mut events = state.bus.subscribe();
    let forward_sink = sink.clone();
    let forward_conn_id = conn_id.clone();
    let forward_handle = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => forward_sink.emit(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(conn_id = %forward_conn_id, skipped, "ws: client lagging, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let locks = Arc::new(SessionLocks::new());
    let mut turns = JoinSet::new();

    while let Some(frame) = ws_rx.next().await {
        let text = match frame {
            Ok(Message::Text(t)) => t.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "ws: read error");
                break;
            }
        };

        match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::Chat { text, session_id }) => {
                turns.spawn(run_turn(
                    state.clone(),
                    sink.clone(),
                    bridge.clone(),
                    locks.clone(),
                    conn_id.clone(),
                    text,
                    session_id,
                ));
            }
            Ok(ClientFrame::ApprovalResponse(reply)) => {
                if !bridge.handle_response(&reply) {
                    debug!(conn_id = %conn_id, request_id = %reply.id, "ws: stale approval response");
                }
            }
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "ws: invalid frame");
                sink.send_json(&DispatchEvent::Error {
                    message: format!("invalid frame: {e}"),
                });
            }
        }

        // Reap finished turns so the set does not grow with the connection.
        while turns.try_join_next().is_some() {}
    }

    bridge.cancel_all();
    turns.abort_all();
    forward_handle.abort();
    drop(sink);
    drop(client_tx);
    write_handle.abort();
    info!(conn_id = %conn_id, "ws: connection closed");
}

/// One chat turn. Turns on the same session run one at a time.
async fn run_turn(
    state: Arc<AppState>,
    sink: Arc<ConnectionSink>,
    bridge: Arc<ApprovalBridge>,
    locks: Arc<SessionLocks>,
    conn_id: String,
    text: String,
    session_id: Option<String>,
) {
    let key = session_id.clone().unwrap_or_else(|| conn_id.clone());
    let _guard = locks.acquire(&key).await;

    state.bus.publish(GatewayEvent::TaskCreated {
        source: "ws".into(),
        summary: text.chars().take(80).collect(),
    });

    let request = DispatchRequest::new(text)
        .with_session(session_id)
        .with_approver(bridge);

    let mut error_sent = false;
    let result = state
        .dispatcher
        .dispatch(request, |event| match event {
            // The bridge already prompted this client.
            DispatchEvent::ApprovalRequired { .. } => {}
            DispatchEvent::Error { .. } => {
                error_sent = true;
                sink.send_json(event);
            }
            _ => sink.send_json(event),
        })
        .await;

    if let Err(e) = result {
        warn!(conn_id = %conn_id, error = %e, "ws: chat turn failed");
        if !error_sent {
            sink.send_json(&DispatchEvent::Error {
                message: e.to_string(),
            });
        }
    }
}
