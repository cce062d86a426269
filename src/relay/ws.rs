//! WebSocket handler: topic subscriptions and broadcast fan-out.
//!
//! DESIGN
//! ======
//! On upgrade, generates a client ID and enters a `select!` loop:
//! - Incoming client frames: parse and apply to the hub.
//! - Hub deliveries for this client: forward as `message` frames.
//!
//! A client may hold several topic subscriptions on one socket. All of them
//! are dropped when the socket closes. The relay does not synthesize a
//! `user_leave` on disconnect; leaving is the client's job (beacon or
//! channel).

use std::collections::HashSet;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::protocol::{ClientOp, ServerOp};
use super::{RelayError, RelayState};
use crate::channel::{ChannelError, ChannelEvent, EventFilter, chat_for_topic};

pub async fn handle_ws(State(state): State<RelayState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: RelayState) {
    let client_id = Uuid::new_v4();
    let (client_tx, mut client_rx) = mpsc::channel::<ChannelEvent>(state.subscriber_buffer);
    let mut topics: HashSet<String> = HashSet::new();

    info!(%client_id, "relay ws: client connected");

    'conn: loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(&state, client_id, &mut topics, &client_tx, text.as_str());
                        for reply in replies {
                            if send_op(&mut socket, &reply).await.is_err() {
                                break 'conn;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(event) = client_rx.recv() => {
                let ChannelEvent::Message(message) = event else {
                    continue;
                };
                let op = ServerOp::Message { topic: message.topic, event: message.event, payload: message.payload };
                if send_op(&mut socket, &op).await.is_err() {
                    break;
                }
            }
        }
    }

    let removed = state.hub.unsubscribe_all(client_id);
    info!(%client_id, removed, "relay ws: client disconnected");
}

// =============================================================================
// FRAME HANDLING
// =============================================================================

/// Apply one inbound text frame and return the replies for the sender.
///
/// Kept free of socket I/O so tests can drive it directly.
fn process_inbound_text(
    state: &RelayState,
    client_id: Uuid,
    topics: &mut HashSet<String>,
    client_tx: &mpsc::Sender<ChannelEvent>,
    text: &str,
) -> Vec<ServerOp> {
    let op: ClientOp = match serde_json::from_str(text) {
        Ok(op) => op,
        Err(e) => {
            warn!(%client_id, error = %e, "relay ws: invalid inbound frame");
            return vec![ServerOp::error(None, &RelayError::InvalidFrame(e.to_string()))];
        }
    };

    match op {
        ClientOp::Subscribe { topic, events } => {
            if chat_for_topic(&topic).is_none() {
                return vec![ServerOp::error(Some(topic.clone()), &RelayError::InvalidTopic(topic))];
            }
            if events.is_empty() {
                return vec![ServerOp::error(Some(topic), &RelayError::EmptyFilter)];
            }
            let filter: EventFilter = events.into_iter().collect();
            state
                .hub
                .subscribe(&topic, client_id, filter, client_tx.clone());
            topics.insert(topic.clone());
            vec![ServerOp::Subscribed { topic }]
        }
        ClientOp::Broadcast { topic, event, payload } => {
            if !topics.contains(&topic) {
                return vec![ServerOp::error(Some(topic.clone()), &ChannelError::NotSubscribed(topic))];
            }
            let delivered = state.hub.publish(&topic, &event, &payload);
            debug!(%client_id, %topic, %event, delivered, "relay ws: broadcast");
            Vec::new()
        }
        ClientOp::Unsubscribe { topic } => {
            if topics.remove(&topic) {
                state.hub.unsubscribe(&topic, client_id);
            }
            Vec::new()
        }
    }
}

async fn send_op(socket: &mut WebSocket, op: &ServerOp) -> Result<(), ()> {
    let json = match serde_json::to_string(op) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "relay ws: failed to serialize frame");
            return Err(());
        }
    };
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| {
            debug!(error = %e, "relay ws: send failed");
        })
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
