//! Action broadcaster: stamps outbound actions and filters inbound echoes.
//!
//! DESIGN
//! ======
//! Outbound, a UI action arrives as an `ActionDraft`. The broadcaster fills
//! in origin identity, colour and timestamp, then hands the envelope to the
//! channel. Before the session is connected (no colour yet) broadcasts are
//! silently dropped: rapid cursor moves during the handshake are expected.
//!
//! Inbound, every payload is decoded defensively. Messages from the local
//! user are discarded because the transport fans out to the sender too.
//! Remote actions go straight to the action callback; join and leave are
//! returned to the session controller, which owns the presence registry.
//!
//! ERROR HANDLING
//! ==============
//! Send failures are logged at warn and swallowed. Nothing is retried.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::callback::CallbackSlot;
use crate::channel::{Channel, InboundMessage};
use crate::envelope::{self, ActionDraft, ActionEnvelope, ActionKind, Origin};

/// An inbound envelope that survived decoding and echo suppression.
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    /// Node or cursor action. Already delivered to the action callback.
    Action(ActionEnvelope),
    Join(ActionEnvelope),
    Leave(ActionEnvelope),
}

pub struct ActionBroadcaster {
    channel: Arc<dyn Channel>,
    local_user_id: String,
    local_user_name: String,
    color: Option<String>,
    on_action: CallbackSlot<ActionEnvelope>,
}

impl ActionBroadcaster {
    #[must_use]
    pub fn new(
        channel: Arc<dyn Channel>,
        local_user_id: impl Into<String>,
        local_user_name: impl Into<String>,
        on_action: CallbackSlot<ActionEnvelope>,
    ) -> Self {
        Self {
            channel,
            local_user_id: local_user_id.into(),
            local_user_name: local_user_name.into(),
            color: None,
            on_action,
        }
    }

    /// Mark the channel live with the assigned local colour.
    pub fn connect(&mut self, color: impl Into<String>) {
        self.color = Some(color.into());
    }

    pub fn disconnect(&mut self) {
        self.color = None;
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.color.is_some()
    }

    #[must_use]
    pub fn local_user_id(&self) -> &str {
        &self.local_user_id
    }

    /// Origin identity for outgoing envelopes. `None` until connected.
    #[must_use]
    pub fn origin(&self) -> Option<Origin> {
        let color = self.color.as_ref()?;
        Some(Origin { user_id: self.local_user_id.clone(), user_name: self.local_user_name.clone(), color: color.clone() })
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    /// Stamp and send a UI action. Returns whether the envelope was handed
    /// to the channel.
    pub async fn broadcast(&self, draft: ActionDraft) -> bool {
        if draft.kind.is_presence() {
            warn!(kind = %draft.kind, "broadcaster: presence kinds are announced by the session, dropped");
            return false;
        }
        let Some(origin) = self.origin() else {
            debug!(kind = %draft.kind, "broadcaster: not connected, dropped");
            return false;
        };
        let envelope = ActionEnvelope::stamp(draft, &origin, envelope::now_ms());
        self.send_envelope(&envelope).await
    }

    /// Build a join or leave announcement for the local user.
    #[must_use]
    pub fn presence_envelope(&self, kind: ActionKind) -> Option<ActionEnvelope> {
        let origin = self.origin()?;
        Some(ActionEnvelope::presence(kind, &origin, envelope::now_ms()))
    }

    /// Announce the local user's join. No-op before connection.
    pub async fn announce_join(&self) -> bool {
        let Some(join) = self.presence_envelope(ActionKind::UserJoin) else {
            return false;
        };
        self.send_envelope(&join).await
    }

    /// Send a fully-formed envelope on its event. Failures are logged.
    pub async fn send_envelope(&self, envelope: &ActionEnvelope) -> bool {
        let payload = match serde_json::to_value(envelope) {
            Ok(v) => v,
            Err(e) => {
                warn!(kind = %envelope.kind, error = %e, "broadcaster: encode failed");
                return false;
            }
        };
        match self.channel.send(envelope.kind.event_name(), payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!(topic = %self.channel.topic(), kind = %envelope.kind, error = %e, "broadcaster: send failed");
                false
            }
        }
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Decode one inbound message. Malformed payloads and self-echoes yield
    /// `None`. Remote actions fire the action callback before returning.
    pub fn receive(&self, message: &InboundMessage) -> Option<Received> {
        let Some(envelope) = envelope::decode(&message.event, &message.payload) else {
            warn!(topic = %message.topic, event = %message.event, "broadcaster: malformed payload dropped");
            return None;
        };
        if envelope.origin_user_id == self.local_user_id {
            return None;
        }

        match envelope.kind {
            ActionKind::UserJoin => Some(Received::Join(envelope)),
            ActionKind::UserLeave => Some(Received::Leave(envelope)),
            _ => {
                self.on_action.fire(&envelope);
                Some(Received::Action(envelope))
            }
        }
    }
}

#[cfg(test)]
#[path = "broadcaster_test.rs"]
mod tests;
