use super::*;
use crate::test_helpers::{ScriptedChannel, new_log};
use serde_json::json;
use std::sync::Mutex;

fn broadcaster(channel: &Arc<ScriptedChannel>) -> (ActionBroadcaster, Arc<Mutex<Vec<ActionEnvelope>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let slot = CallbackSlot::new();
    let sink = Arc::clone(&seen);
    slot.set(move |env: &ActionEnvelope| sink.lock().unwrap().push(env.clone()));
    let channel: Arc<dyn Channel> = Arc::clone(channel) as Arc<dyn Channel>;
    (ActionBroadcaster::new(channel, "u1", "Alice", slot), seen)
}

fn inbound(event: &str, payload: serde_json::Value) -> InboundMessage {
    InboundMessage { topic: "chat-collaboration:c1".into(), event: event.into(), payload }
}

// =============================================================================
// OUTBOUND
// =============================================================================

#[tokio::test]
async fn broadcast_before_connect_is_silently_dropped() {
    let channel = ScriptedChannel::new("t", new_log());
    let (b, _) = broadcaster(&channel);
    assert!(!b.broadcast(ActionDraft::cursor_move(1.0, 2.0)).await);
    assert!(channel.sent().is_empty());
}

#[tokio::test]
async fn broadcast_stamps_origin_fields() {
    let channel = ScriptedChannel::new("t", new_log());
    let (mut b, _) = broadcaster(&channel);
    b.connect("#3B82F6");

    assert!(b.broadcast(ActionDraft::node_move("n1", 10.0, 20.0)).await);

    let sent = channel.sent();
    assert_eq!(sent.len(), 1);
    let (event, payload) = &sent[0];
    assert_eq!(event, "mind_map_action");
    assert_eq!(payload["type"], "node_move");
    assert_eq!(payload["userId"], "u1");
    assert_eq!(payload["userName"], "Alice");
    assert_eq!(payload["userColor"], "#3B82F6");
    assert_eq!(payload["nodeId"], "n1");
    assert_eq!(payload["position"], json!({"x": 10.0, "y": 20.0}));
    assert!(payload["timestamp"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn broadcast_refuses_presence_kinds() {
    let channel = ScriptedChannel::new("t", new_log());
    let (mut b, _) = broadcaster(&channel);
    b.connect("#3B82F6");
    let draft = ActionDraft { kind: ActionKind::UserLeave, node_id: None, position: None, data: None };
    assert!(!b.broadcast(draft).await);
    assert!(channel.sent().is_empty());
}

#[tokio::test]
async fn send_failure_is_swallowed() {
    let channel = ScriptedChannel::new("t", new_log());
    channel.fail_sends(true);
    let (mut b, _) = broadcaster(&channel);
    b.connect("#3B82F6");
    assert!(!b.broadcast(ActionDraft::cursor_move(0.0, 0.0)).await);
}

#[tokio::test]
async fn announce_join_uses_join_event_without_node_fields() {
    let channel = ScriptedChannel::new("t", new_log());
    let (mut b, _) = broadcaster(&channel);
    assert!(!b.announce_join().await);

    b.connect("#EF4444");
    assert!(b.announce_join().await);
    let (event, payload) = &channel.sent()[0];
    assert_eq!(event, "user_join");
    assert_eq!(payload["type"], "user_join");
    assert_eq!(payload["userColor"], "#EF4444");
    assert!(payload.get("nodeId").is_none());
    assert!(payload.get("position").is_none());
}

#[tokio::test]
async fn disconnect_clears_origin() {
    let channel = ScriptedChannel::new("t", new_log());
    let (mut b, _) = broadcaster(&channel);
    b.connect("#EF4444");
    b.disconnect();
    assert!(!b.is_connected());
    assert!(b.presence_envelope(ActionKind::UserLeave).is_none());
}

// =============================================================================
// INBOUND
// =============================================================================

#[test]
fn remote_action_reaches_callback() {
    let channel = ScriptedChannel::new("t", new_log());
    let (b, seen) = broadcaster(&channel);
    let msg = inbound(
        "mind_map_action",
        json!({"type": "cursor_move", "userId": "u2", "userName": "Bob", "userColor": "#EF4444", "timestamp": 5, "position": {"x": 120, "y": 80}}),
    );

    let received = b.receive(&msg);
    assert!(matches!(received, Some(Received::Action(_))));
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].origin_user_id, "u2");
    assert_eq!(seen[0].position, Some(crate::envelope::Position { x: 120.0, y: 80.0 }));
}

#[test]
fn self_echo_is_suppressed() {
    let channel = ScriptedChannel::new("t", new_log());
    let (b, seen) = broadcaster(&channel);
    for (event, kind) in [("mind_map_action", "node_select"), ("user_join", "user_join"), ("user_leave", "user_leave")] {
        let msg = inbound(event, json!({"type": kind, "userId": "u1", "nodeId": "n1"}));
        assert!(b.receive(&msg).is_none(), "{event} echo leaked");
    }
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn presence_is_returned_not_dispatched() {
    let channel = ScriptedChannel::new("t", new_log());
    let (b, seen) = broadcaster(&channel);

    let join = b.receive(&inbound("user_join", json!({"userId": "u2", "userName": "Bob", "userColor": "#EF4444"})));
    let Some(Received::Join(env)) = join else {
        panic!("expected join, got {join:?}");
    };
    assert_eq!(env.origin_user_name, "Bob");

    let leave = b.receive(&inbound("user_leave", json!({"userId": "u2"})));
    assert!(matches!(leave, Some(Received::Leave(_))));
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn malformed_payload_is_a_noop() {
    let channel = ScriptedChannel::new("t", new_log());
    let (b, seen) = broadcaster(&channel);
    assert!(b.receive(&inbound("mind_map_action", json!({"userId": "u2"}))).is_none());
    assert!(b.receive(&inbound("mind_map_action", json!("garbage"))).is_none());
    assert!(b.receive(&inbound("user_join", json!({}))).is_none());
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn latest_callback_wins() {
    let channel = ScriptedChannel::new("t", new_log());
    let slot: CallbackSlot<ActionEnvelope> = CallbackSlot::new();
    let b = ActionBroadcaster::new(Arc::clone(&channel) as Arc<dyn Channel>, "u1", "Alice", slot.clone());

    let hits = Arc::new(Mutex::new(Vec::new()));
    let first = Arc::clone(&hits);
    slot.set(move |_| first.lock().unwrap().push("first"));
    let second = Arc::clone(&hits);
    slot.set(move |_| second.lock().unwrap().push("second"));

    b.receive(&inbound("mind_map_action", json!({"type": "node_delete", "userId": "u2", "nodeId": "n1"})));
    assert_eq!(*hits.lock().unwrap(), vec!["second"]);
}
