//! In-process transport backed by a shared [`Hub`].
//!
//! Used by the relay's own tests, the session tests, and any embedding that
//! runs every participant in one process. Subscription completes
//! immediately: `Connecting` then `Subscribed` are queued before
//! `subscribe` returns.

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::{Channel, ChannelError, ChannelEvent, ChannelEvents, ChannelStatus, EventFilter, Transport};
use crate::hub::Hub;

/// Smallest queue that still fits the two status events plus traffic.
const MIN_BUFFER: usize = 4;

#[derive(Clone)]
pub struct LocalTransport {
    hub: Hub,
    buffer: usize,
}

impl LocalTransport {
    #[must_use]
    pub fn new(hub: Hub, buffer: usize) -> Self {
        Self { hub, buffer: buffer.max(MIN_BUFFER) }
    }

    #[must_use]
    pub fn hub(&self) -> &Hub {
        &self.hub
    }
}

impl Transport for LocalTransport {
    fn channel(&self, topic: &str) -> Arc<dyn Channel> {
        Arc::new(LocalChannel {
            topic: topic.to_owned(),
            hub: self.hub.clone(),
            id: Uuid::new_v4(),
            buffer: self.buffer,
            tx: Mutex::new(None),
        })
    }
}

pub struct LocalChannel {
    topic: String,
    hub: Hub,
    id: Uuid,
    buffer: usize,
    tx: Mutex<Option<mpsc::Sender<ChannelEvent>>>,
}

impl LocalChannel {
    fn sender(&self) -> Option<mpsc::Sender<ChannelEvent>> {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait::async_trait]
impl Channel for LocalChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn subscribe(&self, filter: EventFilter) -> Result<ChannelEvents, ChannelError> {
        let mut slot = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(ChannelError::AlreadySubscribed(self.topic.clone()));
        }

        let (tx, rx) = mpsc::channel(self.buffer);
        // Fresh channel with capacity >= MIN_BUFFER: both sends fit.
        let _ = tx.try_send(ChannelEvent::Status(ChannelStatus::Connecting));
        self.hub.subscribe(&self.topic, self.id, filter, tx.clone());
        let _ = tx.try_send(ChannelEvent::Status(ChannelStatus::Subscribed));
        *slot = Some(tx);
        Ok(rx)
    }

    async fn send(&self, event: &str, payload: Value) -> Result<(), ChannelError> {
        if self.sender().is_none() {
            return Err(ChannelError::NotSubscribed(self.topic.clone()));
        }
        let delivered = self.hub.publish(&self.topic, event, &payload);
        debug!(topic = %self.topic, event, delivered, "local channel: sent");
        Ok(())
    }

    async fn unsubscribe(&self) {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(tx) = tx else {
            return;
        };
        self.hub.unsubscribe(&self.topic, self.id);
        let _ = tx.try_send(ChannelEvent::Status(ChannelStatus::Closed));
    }
}

#[cfg(test)]
#[path = "local_test.rs"]
mod tests;
