//! Websocket transport: one relay connection per subscribed channel.
//!
//! LIFECYCLE
//! =========
//! 1. `subscribe` spawns a connection task and returns the event stream.
//! 2. The task reports `Connecting`, dials the relay, sends `subscribe`, and
//!    waits for the `subscribed` ack. Dial plus ack share one deadline;
//!    missing it reports `TimedOut`, a refused dial reports `Errored`.
//! 3. After the ack, outbound broadcasts and inbound `message` frames are
//!    multiplexed in a `select!` loop.
//! 4. `unsubscribe` drops the outbound sender. The task sends `unsubscribe`,
//!    closes the socket, and reports `Closed`.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use super::{Channel, ChannelError, ChannelEvent, ChannelEvents, ChannelStatus, EventFilter, InboundMessage, Transport};
use crate::relay::protocol::{ClientOp, ServerOp};

/// Path of the relay's websocket endpoint.
pub const WS_PATH: &str = "/api/collaboration/ws";

/// How long `unsubscribe` waits for the connection task to say goodbye.
const UNSUBSCRIBE_GRACE: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Websocket endpoint for an `http(s)://` relay base URL.
///
/// # Errors
///
/// Returns [`ChannelError::Connect`] for any other scheme.
pub fn ws_endpoint(relay_url: &str) -> Result<String, ChannelError> {
    let base = relay_url.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("http://") {
        return Ok(format!("ws://{rest}{WS_PATH}"));
    }
    if let Some(rest) = base.strip_prefix("https://") {
        return Ok(format!("wss://{rest}{WS_PATH}"));
    }
    Err(ChannelError::Connect(format!("unsupported relay url: {relay_url}")))
}

// =============================================================================
// TRANSPORT
// =============================================================================

#[derive(Debug, Clone)]
pub struct WsTransport {
    endpoint: String,
    buffer: usize,
    subscribe_timeout: Duration,
}

impl WsTransport {
    /// # Errors
    ///
    /// Returns an error if `relay_url` is not an `http(s)://` URL.
    pub fn new(relay_url: &str, buffer: usize, subscribe_timeout: Duration) -> Result<Self, ChannelError> {
        Ok(Self { endpoint: ws_endpoint(relay_url)?, buffer: buffer.max(1), subscribe_timeout })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Transport for WsTransport {
    fn channel(&self, topic: &str) -> Arc<dyn Channel> {
        Arc::new(WsChannel {
            topic: topic.to_owned(),
            endpoint: self.endpoint.clone(),
            buffer: self.buffer,
            subscribe_timeout: self.subscribe_timeout,
            conn: Mutex::new(None),
        })
    }
}

// =============================================================================
// CHANNEL
// =============================================================================

struct Outbound {
    event: String,
    payload: Value,
}

struct Connection {
    outbound: mpsc::UnboundedSender<Outbound>,
    task: JoinHandle<()>,
}

pub struct WsChannel {
    topic: String,
    endpoint: String,
    buffer: usize,
    subscribe_timeout: Duration,
    conn: Mutex<Option<Connection>>,
}

#[async_trait::async_trait]
impl Channel for WsChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn subscribe(&self, filter: EventFilter) -> Result<ChannelEvents, ChannelError> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        if conn.is_some() {
            return Err(ChannelError::AlreadySubscribed(self.topic.clone()));
        }

        let (events_tx, events_rx) = mpsc::channel(self.buffer);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let dial = Dial {
            endpoint: self.endpoint.clone(),
            topic: self.topic.clone(),
            filter,
            subscribe_timeout: self.subscribe_timeout,
        };
        let task = tokio::spawn(run_connection(dial, events_tx, out_rx));
        *conn = Some(Connection { outbound: out_tx, task });
        Ok(events_rx)
    }

    async fn send(&self, event: &str, payload: Value) -> Result<(), ChannelError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(conn) = conn.as_ref() else {
            return Err(ChannelError::NotSubscribed(self.topic.clone()));
        };
        conn.outbound
            .send(Outbound { event: event.to_owned(), payload })
            .map_err(|_| ChannelError::Closed)
    }

    async fn unsubscribe(&self) {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Connection { outbound, task }) = conn else {
            return;
        };
        drop(outbound);
        let abort = task.abort_handle();
        if tokio::time::timeout(UNSUBSCRIBE_GRACE, task).await.is_err() {
            warn!(topic = %self.topic, "ws channel: connection task did not exit, aborting");
            abort.abort();
        }
    }
}

// =============================================================================
// CONNECTION TASK
// =============================================================================

struct Dial {
    endpoint: String,
    topic: String,
    filter: EventFilter,
    subscribe_timeout: Duration,
}

async fn run_connection(dial: Dial, events: mpsc::Sender<ChannelEvent>, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
    let _ = events.send(ChannelEvent::Status(ChannelStatus::Connecting)).await;

    let mut stream = match tokio::time::timeout(dial.subscribe_timeout, open(&dial)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(status)) => {
            outbound.close();
            let _ = events.send(ChannelEvent::Status(status)).await;
            return;
        }
        Err(_) => {
            warn!(topic = %dial.topic, timeout_ms = dial.subscribe_timeout.as_millis(), "ws channel: subscribe timed out");
            outbound.close();
            let _ = events.send(ChannelEvent::Status(ChannelStatus::TimedOut)).await;
            return;
        }
    };

    info!(topic = %dial.topic, "ws channel: subscribed");
    if events
        .send(ChannelEvent::Status(ChannelStatus::Subscribed))
        .await
        .is_err()
    {
        let _ = stream.close(None).await;
        return;
    }

    let final_status = loop {
        tokio::select! {
            out = outbound.recv() => {
                let Some(out) = out else {
                    let _ = send_op(&mut stream, &ClientOp::Unsubscribe { topic: dial.topic.clone() }).await;
                    let _ = stream.close(None).await;
                    break ChannelStatus::Closed;
                };
                let op = ClientOp::Broadcast { topic: dial.topic.clone(), event: out.event, payload: out.payload };
                if let Err(e) = send_op(&mut stream, &op).await {
                    warn!(topic = %dial.topic, error = %e, "ws channel: send failed");
                    break ChannelStatus::Errored;
                }
            }
            frame = stream.next() => {
                match frame {
                    None | Some(Ok(Message::Close(_))) => break ChannelStatus::Closed,
                    Some(Err(e)) => {
                        warn!(topic = %dial.topic, error = %e, "ws channel: transport error");
                        break ChannelStatus::Errored;
                    }
                    Some(Ok(Message::Text(text))) => {
                        let Some(message) = inbound_message(&dial.topic, text.as_str()) else {
                            continue;
                        };
                        if events.send(ChannelEvent::Message(message)).await.is_err() {
                            // Subscriber went away without unsubscribing.
                            let _ = stream.close(None).await;
                            return;
                        }
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    };

    info!(topic = %dial.topic, status = ?final_status, "ws channel: connection ended");
    outbound.close();
    let _ = events.send(ChannelEvent::Status(final_status)).await;
}

/// Dial the relay, subscribe, and wait for the ack.
async fn open(dial: &Dial) -> Result<WsStream, ChannelStatus> {
    let (mut stream, _) = connect_async(dial.endpoint.as_str())
        .await
        .map_err(|e| {
            warn!(endpoint = %dial.endpoint, error = %e, "ws channel: connect failed");
            ChannelStatus::Errored
        })?;

    let subscribe = ClientOp::Subscribe {
        topic: dial.topic.clone(),
        events: dial.filter.events().map(str::to_owned).collect(),
    };
    send_op(&mut stream, &subscribe).await.map_err(|e| {
        warn!(topic = %dial.topic, error = %e, "ws channel: subscribe send failed");
        ChannelStatus::Errored
    })?;

    loop {
        let Some(frame) = stream.next().await else {
            return Err(ChannelStatus::Closed);
        };
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => return Err(ChannelStatus::Closed),
            Ok(_) => continue,
            Err(e) => {
                warn!(topic = %dial.topic, error = %e, "ws channel: transport error before ack");
                return Err(ChannelStatus::Errored);
            }
        };
        match serde_json::from_str::<ServerOp>(text.as_str()) {
            Ok(ServerOp::Subscribed { topic }) if topic == dial.topic => return Ok(stream),
            Ok(ServerOp::Error { code, message, .. }) => {
                warn!(topic = %dial.topic, %code, %message, "ws channel: relay rejected subscribe");
                return Err(ChannelStatus::Errored);
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "ws channel: unparseable frame before ack"),
        }
    }
}

/// Map a relay text frame to an inbound message for `topic`. Errors are
/// logged and swallowed.
fn inbound_message(topic: &str, text: &str) -> Option<InboundMessage> {
    match serde_json::from_str::<ServerOp>(text) {
        Ok(ServerOp::Message { topic: t, event, payload }) if t == topic => Some(InboundMessage { topic: t, event, payload }),
        Ok(ServerOp::Error { code, message, .. }) => {
            warn!(topic, %code, %message, "ws channel: relay error");
            None
        }
        Ok(_) => None,
        Err(e) => {
            warn!(topic, error = %e, "ws channel: invalid relay frame");
            None
        }
    }
}

async fn send_op(stream: &mut WsStream, op: &ClientOp) -> Result<(), ChannelError> {
    let text = serde_json::to_string(op)?;
    stream
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| ChannelError::Connect(e.to_string()))
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
