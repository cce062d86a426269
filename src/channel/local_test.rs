use super::*;
use serde_json::json;
use tokio::time::{Duration, timeout};

fn filter() -> EventFilter {
    EventFilter::new()
        .on("mind_map_action")
        .on("user_join")
        .on("user_leave")
}

async fn next(rx: &mut ChannelEvents) -> ChannelEvent {
    timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("timed out waiting for channel event")
        .expect("channel closed")
}

#[tokio::test]
async fn subscribe_reports_connecting_then_subscribed() {
    let transport = LocalTransport::new(Hub::new(), 16);
    let channel = transport.channel("chat-collaboration:c1");
    let mut rx = channel.subscribe(filter()).unwrap();

    assert_eq!(next(&mut rx).await, ChannelEvent::Status(ChannelStatus::Connecting));
    assert_eq!(next(&mut rx).await, ChannelEvent::Status(ChannelStatus::Subscribed));
    assert_eq!(transport.hub().subscriber_count("chat-collaboration:c1"), 1);
}

#[tokio::test]
async fn second_subscribe_is_rejected() {
    let transport = LocalTransport::new(Hub::new(), 16);
    let channel = transport.channel("t");
    let _rx = channel.subscribe(filter()).unwrap();
    assert!(matches!(channel.subscribe(filter()), Err(ChannelError::AlreadySubscribed(_))));
}

#[tokio::test]
async fn send_before_subscribe_fails() {
    let transport = LocalTransport::new(Hub::new(), 16);
    let channel = transport.channel("t");
    let err = channel.send("user_join", json!({})).await.unwrap_err();
    assert!(matches!(err, ChannelError::NotSubscribed(_)));
}

#[tokio::test]
async fn send_reaches_peers_and_echoes_to_sender() {
    let transport = LocalTransport::new(Hub::new(), 16);
    let alice = transport.channel("t");
    let bob = transport.channel("t");
    let mut rx_alice = alice.subscribe(filter()).unwrap();
    let mut rx_bob = bob.subscribe(filter()).unwrap();
    for rx in [&mut rx_alice, &mut rx_bob] {
        next(rx).await;
        next(rx).await;
    }

    alice
        .send("mind_map_action", json!({"type": "cursor_move", "userId": "alice"}))
        .await
        .unwrap();

    for rx in [&mut rx_alice, &mut rx_bob] {
        let ChannelEvent::Message(msg) = next(rx).await else {
            panic!("expected message");
        };
        assert_eq!(msg.event, "mind_map_action");
        assert_eq!(msg.payload["userId"], "alice");
    }
}

#[tokio::test]
async fn unsubscribe_closes_stream_and_leaves_hub() {
    let transport = LocalTransport::new(Hub::new(), 16);
    let channel = transport.channel("t");
    let mut rx = channel.subscribe(filter()).unwrap();
    next(&mut rx).await;
    next(&mut rx).await;

    channel.unsubscribe().await;
    assert_eq!(next(&mut rx).await, ChannelEvent::Status(ChannelStatus::Closed));
    assert_eq!(transport.hub().subscriber_count("t"), 0);

    // Idempotent.
    channel.unsubscribe().await;
    assert!(matches!(channel.send("user_join", json!({})).await, Err(ChannelError::NotSubscribed(_))));
}

#[test]
fn buffer_is_clamped_to_minimum() {
    let transport = LocalTransport::new(Hub::new(), 0);
    assert_eq!(transport.buffer, MIN_BUFFER);
}
