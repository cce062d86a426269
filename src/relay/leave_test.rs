use super::*;
use crate::access::{AccessGate, MemoryAccessStore};
use crate::channel::{ChannelEvent, EventFilter};
use crate::envelope::{ActionEnvelope, ActionKind, Origin};
use crate::hub::Hub;
use axum::body::to_bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

fn state() -> RelayState {
    RelayState::new(Hub::new(), AccessGate::new(Arc::new(MemoryAccessStore::new())), 16)
}

fn origin() -> Origin {
    Origin { user_id: "u1".into(), user_name: "Ada".into(), color: "#3B82F6".into() }
}

fn body(chat_id: &str, kind: ActionKind) -> Bytes {
    let body = LeaveBeaconBody { chat_id: chat_id.into(), action: ActionEnvelope::presence(kind, &origin(), 1) };
    Bytes::from(serde_json::to_vec(&body).unwrap())
}

async fn error_code(resp: Response) -> String {
    let bytes = to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    value["code"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn leave_is_republished_on_chat_topic() {
    let state = state();
    let (tx, mut rx) = mpsc::channel(4);
    state
        .hub
        .subscribe("chat-collaboration:c1", Uuid::new_v4(), EventFilter::new().on("user_leave"), tx);

    let resp = handle_leave(State(state.clone()), body("c1", ActionKind::UserLeave)).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let Some(ChannelEvent::Message(m)) = rx.recv().await else {
        panic!("expected leave delivery");
    };
    assert_eq!(m.event, "user_leave");
    assert_eq!(m.payload["userId"], "u1");
    assert_eq!(m.payload["type"], "user_leave");
}

#[tokio::test]
async fn leave_with_no_subscribers_is_still_accepted() {
    let resp = handle_leave(State(state()), body("c1", ActionKind::UserLeave)).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn non_leave_action_is_rejected() {
    let resp = handle_leave(State(state()), body("c1", ActionKind::UserJoin)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(resp).await, "E_BEACON_NOT_LEAVE");
}

#[tokio::test]
async fn missing_chat_and_garbage_are_rejected() {
    let resp = handle_leave(State(state()), body("", ActionKind::UserLeave)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(resp).await, "E_BEACON_MISSING_CHAT");

    let resp = handle_leave(State(state()), Bytes::from_static(b"bye")).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(resp).await, "E_INVALID_FRAME");
}
