//! Scripted channel, transport and beacon for unit tests.
//!
//! All three append to one shared log so tests can assert cross-component
//! ordering (`"beacon:user_leave"` before `"unsubscribe"`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::beacon::{BeaconError, LeaveBeacon};
use crate::channel::{Channel, ChannelError, ChannelEvent, ChannelEvents, ChannelStatus, EventFilter, InboundMessage, Transport};
use crate::envelope::ActionEnvelope;

pub type Log = Arc<Mutex<Vec<String>>>;

#[must_use]
pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

#[must_use]
pub fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

// =============================================================================
// CHANNEL
// =============================================================================

pub struct ScriptedChannel {
    topic: String,
    log: Log,
    fail_sends: AtomicBool,
    events: Mutex<Option<mpsc::Sender<ChannelEvent>>>,
    filter: Mutex<Option<EventFilter>>,
    sent: Mutex<Vec<(String, Value)>>,
}

impl ScriptedChannel {
    #[must_use]
    pub fn new(topic: &str, log: Log) -> Arc<Self> {
        Arc::new(Self {
            topic: topic.to_owned(),
            log,
            fail_sends: AtomicBool::new(false),
            events: Mutex::new(None),
            filter: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Push an event onto the subscriber stream.
    pub async fn emit(&self, event: ChannelEvent) {
        let tx = self.events.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    pub async fn status(&self, status: ChannelStatus) {
        self.emit(ChannelEvent::Status(status)).await;
    }

    pub async fn deliver(&self, event: &str, payload: Value) {
        let message = InboundMessage { topic: self.topic.clone(), event: event.to_owned(), payload };
        self.emit(ChannelEvent::Message(message)).await;
    }

    #[must_use]
    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().unwrap().clone()
    }

    #[must_use]
    pub fn sent_events(&self) -> Vec<String> {
        self.sent().into_iter().map(|(event, _)| event).collect()
    }

    #[must_use]
    pub fn filter(&self) -> Option<EventFilter> {
        self.filter.lock().unwrap().clone()
    }

    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.events.lock().unwrap().is_some()
    }
}

#[async_trait::async_trait]
impl Channel for ScriptedChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn subscribe(&self, filter: EventFilter) -> Result<ChannelEvents, ChannelError> {
        let mut events = self.events.lock().unwrap();
        if events.is_some() {
            return Err(ChannelError::AlreadySubscribed(self.topic.clone()));
        }
        let (tx, rx) = mpsc::channel(64);
        *events = Some(tx);
        *self.filter.lock().unwrap() = Some(filter);
        self.log.lock().unwrap().push("subscribe".into());
        Ok(rx)
    }

    async fn send(&self, event: &str, payload: Value) -> Result<(), ChannelError> {
        self.log.lock().unwrap().push(format!("send:{event}"));
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        self.sent.lock().unwrap().push((event.to_owned(), payload));
        Ok(())
    }

    async fn unsubscribe(&self) {
        self.log.lock().unwrap().push("unsubscribe".into());
        self.events.lock().unwrap().take();
    }
}

// =============================================================================
// TRANSPORT
// =============================================================================

/// Hands out scripted channels and remembers them for inspection.
#[derive(Clone)]
pub struct ScriptedTransport {
    log: Log,
    channels: Arc<Mutex<Vec<Arc<ScriptedChannel>>>>,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new(log: Log) -> Self {
        Self { log, channels: Arc::new(Mutex::new(Vec::new())) }
    }

    #[must_use]
    pub fn channels(&self) -> Vec<Arc<ScriptedChannel>> {
        self.channels.lock().unwrap().clone()
    }

    /// Most recently created channel.
    #[must_use]
    pub fn last(&self) -> Arc<ScriptedChannel> {
        self.channels
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no channel created yet")
    }
}

impl Transport for ScriptedTransport {
    fn channel(&self, topic: &str) -> Arc<dyn Channel> {
        let channel = ScriptedChannel::new(topic, Arc::clone(&self.log));
        self.channels.lock().unwrap().push(Arc::clone(&channel));
        channel
    }
}

// =============================================================================
// BEACON
// =============================================================================

pub struct RecordingBeacon {
    log: Log,
    fail: bool,
    sent: Mutex<Vec<(String, ActionEnvelope)>>,
}

impl RecordingBeacon {
    #[must_use]
    pub fn new(log: Log) -> Arc<Self> {
        Arc::new(Self { log, fail: false, sent: Mutex::new(Vec::new()) })
    }

    #[must_use]
    pub fn failing(log: Log) -> Arc<Self> {
        Arc::new(Self { log, fail: true, sent: Mutex::new(Vec::new()) })
    }

    #[must_use]
    pub fn sent(&self) -> Vec<(String, ActionEnvelope)> {
        self.sent.lock().unwrap().clone()
    }
}

impl LeaveBeacon for RecordingBeacon {
    fn send_leave(&self, chat_id: &str, action: &ActionEnvelope) -> Result<(), BeaconError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("beacon:{}", action.kind));
        if self.fail {
            return Err(BeaconError::Unavailable);
        }
        self.sent
            .lock()
            .unwrap()
            .push((chat_id.to_owned(), action.clone()));
        Ok(())
    }
}
