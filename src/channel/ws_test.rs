use super::*;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::time::timeout;

async fn next(rx: &mut ChannelEvents) -> ChannelEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for channel event")
        .expect("channel closed")
}

fn filter() -> EventFilter {
    EventFilter::new().on("user_join")
}

// =============================================================================
// ENDPOINT
// =============================================================================

#[test]
fn ws_endpoint_maps_http_schemes() {
    assert_eq!(ws_endpoint("http://127.0.0.1:3000").unwrap(), "ws://127.0.0.1:3000/api/collaboration/ws");
    assert_eq!(ws_endpoint("https://relay.example.com/").unwrap(), "wss://relay.example.com/api/collaboration/ws");
}

#[test]
fn ws_endpoint_rejects_other_schemes() {
    assert!(matches!(ws_endpoint("ftp://relay"), Err(ChannelError::Connect(_))));
    assert!(WsTransport::new("relay:3000", 8, Duration::from_secs(1)).is_err());
}

// =============================================================================
// FRAMES
// =============================================================================

#[test]
fn inbound_message_filters_by_topic() {
    let text = json!({"op": "message", "topic": "t", "event": "user_join", "payload": {"userId": "u1"}}).to_string();
    let msg = inbound_message("t", &text).unwrap();
    assert_eq!(msg.event, "user_join");
    assert_eq!(msg.payload["userId"], "u1");

    assert!(inbound_message("other", &text).is_none());
}

#[test]
fn inbound_message_ignores_errors_and_garbage() {
    let err = json!({"op": "error", "code": "E_NOT_SUBSCRIBED", "message": "nope"}).to_string();
    assert!(inbound_message("t", &err).is_none());
    assert!(inbound_message("t", "not json").is_none());
}

// =============================================================================
// LIFECYCLE
// =============================================================================

#[tokio::test]
async fn refused_dial_reports_errored() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = WsTransport::new(&format!("http://{addr}"), 8, Duration::from_secs(2)).unwrap();
    let channel = transport.channel("t");
    let mut rx = channel.subscribe(filter()).unwrap();

    assert_eq!(next(&mut rx).await, ChannelEvent::Status(ChannelStatus::Connecting));
    assert_eq!(next(&mut rx).await, ChannelEvent::Status(ChannelStatus::Errored));
    assert!(matches!(channel.send("user_join", json!({})).await, Err(ChannelError::Closed)));
}

#[tokio::test]
async fn silent_peer_reports_timed_out() {
    // Accepts TCP but never completes the websocket handshake.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _hold = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((sock, _)) = listener.accept().await {
            held.push(sock);
        }
    });

    let transport = WsTransport::new(&format!("http://{addr}"), 8, Duration::from_millis(100)).unwrap();
    let channel = transport.channel("t");
    let mut rx = channel.subscribe(filter()).unwrap();

    assert_eq!(next(&mut rx).await, ChannelEvent::Status(ChannelStatus::Connecting));
    assert_eq!(next(&mut rx).await, ChannelEvent::Status(ChannelStatus::TimedOut));
}

#[tokio::test]
async fn send_before_subscribe_fails() {
    let transport = WsTransport::new("http://127.0.0.1:1", 8, Duration::from_secs(1)).unwrap();
    let channel = transport.channel("t");
    assert!(matches!(channel.send("user_join", json!({})).await, Err(ChannelError::NotSubscribed(_))));
    // Unsubscribe without a connection is a no-op.
    channel.unsubscribe().await;
}
