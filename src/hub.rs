//! Hub: topic-keyed pub/sub fan-out.
//!
//! DESIGN
//! ======
//! The hub maps `topic -> subscriber_id -> Subscriber`. Each subscriber
//! owns a bounded sender and an event filter. Publishing walks the topic's
//! subscribers and `try_send`s a copy to every one whose filter matches,
//! including the publisher itself.
//!
//! Both the in-process transport and the websocket relay sit on top of the
//! same hub, so in-process tests and relayed sessions see identical fan-out.
//!
//! TRADE-OFFS
//! ==========
//! A full subscriber queue drops the message for that subscriber only.
//! Cursor traffic is lossy by nature; presence recovers on the next join.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::channel::{ChannelEvent, EventFilter, InboundMessage};

struct Subscriber {
    tx: mpsc::Sender<ChannelEvent>,
    filter: EventFilter,
}

/// Shared pub/sub state. Clone is cheap; all clones see the same topics.
#[derive(Clone, Default)]
pub struct Hub {
    topics: Arc<Mutex<HashMap<String, HashMap<Uuid, Subscriber>>>>,
}

impl Hub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a subscription for `subscriber_id` on `topic`.
    pub fn subscribe(&self, topic: &str, subscriber_id: Uuid, filter: EventFilter, tx: mpsc::Sender<ChannelEvent>) {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        let subscribers = topics.entry(topic.to_owned()).or_default();
        subscribers.insert(subscriber_id, Subscriber { tx, filter });
        info!(topic, %subscriber_id, subscribers = subscribers.len(), "hub: subscribed");
    }

    /// Remove one subscription. Empty topics are dropped. Returns whether a
    /// subscription existed.
    pub fn unsubscribe(&self, topic: &str, subscriber_id: Uuid) -> bool {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(subscribers) = topics.get_mut(topic) else {
            return false;
        };
        let removed = subscribers.remove(&subscriber_id).is_some();
        let remaining = subscribers.len();
        if remaining == 0 {
            topics.remove(topic);
        }
        if removed {
            info!(topic, %subscriber_id, remaining, "hub: unsubscribed");
        }
        removed
    }

    /// Remove every subscription held by `subscriber_id`.
    pub fn unsubscribe_all(&self, subscriber_id: Uuid) -> usize {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        topics.retain(|_, subscribers| {
            if subscribers.remove(&subscriber_id).is_some() {
                removed += 1;
            }
            !subscribers.is_empty()
        });
        removed
    }

    /// Fan a message out to every matching subscriber on the topic.
    /// Returns the number of subscribers that accepted it.
    pub fn publish(&self, topic: &str, event: &str, payload: &Value) -> usize {
        let topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(subscribers) = topics.get(topic) else {
            return 0;
        };

        let mut delivered = 0;
        for (subscriber_id, subscriber) in subscribers {
            if !subscriber.filter.matches(event) {
                continue;
            }
            let message = InboundMessage { topic: topic.to_owned(), event: event.to_owned(), payload: payload.clone() };
            // Best-effort: a full or closed subscriber misses this message.
            if subscriber.tx.try_send(ChannelEvent::Message(message)).is_ok() {
                delivered += 1;
            } else {
                debug!(topic, event, %subscriber_id, "hub: subscriber queue unavailable, dropped");
            }
        }
        delivered
    }

    #[must_use]
    pub fn is_subscribed(&self, topic: &str, subscriber_id: Uuid) -> bool {
        let topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        topics
            .get(topic)
            .is_some_and(|subscribers| subscribers.contains_key(&subscriber_id))
    }

    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        topics.get(topic).map_or(0, HashMap::len)
    }

    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
#[path = "hub_test.rs"]
mod tests;
