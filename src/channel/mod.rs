//! Channel transport adapter: one named pub/sub topic per chat.
//!
//! ARCHITECTURE
//! ============
//! The session core never talks to a concrete pub/sub system. It asks a
//! `Transport` for the channel named after the chat, declares which events
//! it wants, and subscribes. Everything afterwards arrives on one ordered
//! stream of `ChannelEvent`s: status transitions and inbound messages.
//!
//! DESIGN
//! ======
//! - Topic names are derived from the chat ID alone, so every participant
//!   converges on the same topic without discovery.
//! - Delivery is at-least-once and best-effort. Fan-out includes the sender;
//!   self-echo suppression is the broadcaster's job, not the transport's.
//! - `send` only reports whether the message was handed off. It never
//!   retries.

pub mod local;
pub mod ws;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::ErrorCode;

/// Prefix shared by every chat collaboration topic.
pub const TOPIC_PREFIX: &str = "chat-collaboration:";

/// Topic for a chat. Deterministic so all participants compute the same one.
#[must_use]
pub fn topic_for_chat(chat_id: &str) -> String {
    format!("{TOPIC_PREFIX}{chat_id}")
}

/// Inverse of [`topic_for_chat`]. `None` for foreign or empty topics.
#[must_use]
pub fn chat_for_topic(topic: &str) -> Option<&str> {
    topic
        .strip_prefix(TOPIC_PREFIX)
        .filter(|chat_id| !chat_id.is_empty())
}

// =============================================================================
// EVENTS
// =============================================================================

/// Connection lifecycle as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Connecting,
    Subscribed,
    Errored,
    TimedOut,
    Closed,
}

/// A broadcast received on a topic.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub event: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Status(ChannelStatus),
    Message(InboundMessage),
}

/// Receiving half of a subscription.
pub type ChannelEvents = mpsc::Receiver<ChannelEvent>;

/// Set of event names a subscriber wants delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    events: BTreeSet<String>,
}

impl EventFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in one event.
    #[must_use]
    pub fn on(mut self, event: impl Into<String>) -> Self {
        self.events.insert(event.into());
        self
    }

    #[must_use]
    pub fn matches(&self, event: &str) -> bool {
        self.events.contains(event)
    }

    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.events.iter().map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for EventFilter {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self { events: iter.into_iter().map(Into::into).collect() }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel {0} is not subscribed")]
    NotSubscribed(String),
    #[error("channel {0} is already subscribed")]
    AlreadySubscribed(String),
    #[error("channel closed")]
    Closed,
    #[error("payload encode failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("connect failed: {0}")]
    Connect(String),
}

impl ErrorCode for ChannelError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotSubscribed(_) => "E_NOT_SUBSCRIBED",
            Self::AlreadySubscribed(_) => "E_ALREADY_SUBSCRIBED",
            Self::Closed => "E_CHANNEL_CLOSED",
            Self::Encode(_) => "E_ENCODE",
            Self::Connect(_) => "E_CONNECT",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Closed)
    }
}

// =============================================================================
// TRAITS
// =============================================================================

/// One topic on a pub/sub substrate.
#[async_trait::async_trait]
pub trait Channel: Send + Sync {
    fn topic(&self) -> &str;

    /// Start the subscription. Only events matched by `filter` are delivered.
    /// Status transitions arrive on the same stream, starting with
    /// `Connecting`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::AlreadySubscribed`] on a second call.
    fn subscribe(&self, filter: EventFilter) -> Result<ChannelEvents, ChannelError>;

    /// Hand one broadcast to the substrate.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is not subscribed or the substrate
    /// refused the message. Callers are expected to log and move on.
    async fn send(&self, event: &str, payload: Value) -> Result<(), ChannelError>;

    /// Leave the topic and release substrate resources. Idempotent.
    async fn unsubscribe(&self);
}

/// Factory for channels on a given substrate.
pub trait Transport: Send + Sync {
    fn channel(&self, topic: &str) -> Arc<dyn Channel>;
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
