//! Action envelope: the transient wire message for collaboration events.
//!
//! ARCHITECTURE
//! ============
//! Every signal exchanged between participants is an `ActionEnvelope`:
//! cursor moves, node selection, node mutations, and presence join/leave.
//! Envelopes are built at the moment of a local action, serialized onto the
//! chat's channel, and discarded after delivery. Nothing here is persisted.
//!
//! DESIGN
//! ======
//! - Wire fields are camelCase (`type`, `userId`, `userColor`, ...).
//! - Three channel events carry envelopes: `mind_map_action` for node and
//!   cursor actions, `user_join` and `user_leave` for presence.
//! - Inbound payloads are decoded defensively: a payload missing the action
//!   type or origin user is dropped, other missing fields get defaults.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// WIRE EVENTS
// =============================================================================

/// Channel event carrying node and cursor actions.
pub const EVENT_ACTION: &str = "mind_map_action";

/// Channel event announcing a participant.
pub const EVENT_USER_JOIN: &str = "user_join";

/// Channel event retracting a participant.
pub const EVENT_USER_LEAVE: &str = "user_leave";

/// Display name used when an inbound payload carries none.
pub const DEFAULT_USER_NAME: &str = "Anonymous";

/// Colour used when an inbound payload carries none.
pub const FALLBACK_COLOR: &str = "#9CA3AF";

// =============================================================================
// TYPES
// =============================================================================

/// What happened. Serialized as the envelope's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    NodeMove,
    NodeSelect,
    NodeCreate,
    NodeDelete,
    CursorMove,
    UserJoin,
    UserLeave,
}

impl ActionKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NodeMove => "node_move",
            Self::NodeSelect => "node_select",
            Self::NodeCreate => "node_create",
            Self::NodeDelete => "node_delete",
            Self::CursorMove => "cursor_move",
            Self::UserJoin => "user_join",
            Self::UserLeave => "user_leave",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "node_move" => Some(Self::NodeMove),
            "node_select" => Some(Self::NodeSelect),
            "node_create" => Some(Self::NodeCreate),
            "node_delete" => Some(Self::NodeDelete),
            "cursor_move" => Some(Self::CursorMove),
            "user_join" => Some(Self::UserJoin),
            "user_leave" => Some(Self::UserLeave),
            _ => None,
        }
    }

    /// Join and leave are presence signals; everything else is an action.
    #[must_use]
    pub fn is_presence(self) -> bool {
        matches!(self, Self::UserJoin | Self::UserLeave)
    }

    /// Name of the channel event this kind travels on.
    #[must_use]
    pub fn event_name(self) -> &'static str {
        match self {
            Self::UserJoin => EVENT_USER_JOIN,
            Self::UserLeave => EVENT_USER_LEAVE,
            _ => EVENT_ACTION,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A point on the mind-map canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Identity stamped onto every outgoing envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub user_id: String,
    pub user_name: String,
    pub color: String,
}

/// A UI-originated action before origin fields and timestamp are filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionDraft {
    pub kind: ActionKind,
    pub node_id: Option<String>,
    pub position: Option<Position>,
    pub data: Option<Value>,
}

impl ActionDraft {
    #[must_use]
    pub fn cursor_move(x: f64, y: f64) -> Self {
        Self { kind: ActionKind::CursorMove, node_id: None, position: Some(Position { x, y }), data: None }
    }

    #[must_use]
    pub fn node_select(node_id: impl Into<String>) -> Self {
        Self { kind: ActionKind::NodeSelect, node_id: Some(node_id.into()), position: None, data: None }
    }

    #[must_use]
    pub fn node_move(node_id: impl Into<String>, x: f64, y: f64) -> Self {
        Self { kind: ActionKind::NodeMove, node_id: Some(node_id.into()), position: Some(Position { x, y }), data: None }
    }

    #[must_use]
    pub fn node_create(node_id: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            kind: ActionKind::NodeCreate,
            node_id: Some(node_id.into()),
            position: Some(Position { x, y }),
            data: None,
        }
    }

    #[must_use]
    pub fn node_delete(node_id: impl Into<String>) -> Self {
        Self { kind: ActionKind::NodeDelete, node_id: Some(node_id.into()), position: None, data: None }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// The complete wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEnvelope {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(rename = "userId")]
    pub origin_user_id: String,
    #[serde(rename = "userName")]
    pub origin_user_name: String,
    #[serde(rename = "userColor")]
    pub origin_color: String,
    /// Milliseconds since Unix epoch at construction.
    #[serde(rename = "timestamp")]
    pub timestamp_millis: i64,
    #[serde(rename = "nodeId", default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

impl ActionEnvelope {
    /// Stamp a draft with origin identity and a timestamp.
    #[must_use]
    pub fn stamp(draft: ActionDraft, origin: &Origin, timestamp_millis: i64) -> Self {
        Self {
            kind: draft.kind,
            origin_user_id: origin.user_id.clone(),
            origin_user_name: origin.user_name.clone(),
            origin_color: origin.color.clone(),
            timestamp_millis,
            node_id: draft.node_id,
            position: draft.position,
            data: draft.data,
        }
    }

    /// Build a join or leave announcement. Presence envelopes never carry
    /// node or position fields.
    #[must_use]
    pub fn presence(kind: ActionKind, origin: &Origin, timestamp_millis: i64) -> Self {
        Self {
            kind,
            origin_user_id: origin.user_id.clone(),
            origin_user_name: origin.user_name.clone(),
            origin_color: origin.color.clone(),
            timestamp_millis,
            node_id: None,
            position: None,
            data: None,
        }
    }
}

// =============================================================================
// DECODING
// =============================================================================

/// Reconstruct an envelope from a channel event and its payload.
///
/// Returns `None` for unknown events, action events whose `type` is missing
/// or is a presence kind, and payloads without a `userId`.
#[must_use]
pub fn decode(event: &str, payload: &Value) -> Option<ActionEnvelope> {
    let kind = match event {
        EVENT_USER_JOIN => ActionKind::UserJoin,
        EVENT_USER_LEAVE => ActionKind::UserLeave,
        EVENT_ACTION => {
            let kind = payload
                .get("type")
                .and_then(Value::as_str)
                .and_then(ActionKind::parse)?;
            if kind.is_presence() {
                return None;
            }
            kind
        }
        _ => return None,
    };

    let origin_user_id = payload
        .get("userId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())?
        .to_owned();
    let origin_user_name = payload
        .get("userName")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_USER_NAME)
        .to_owned();
    let origin_color = payload
        .get("userColor")
        .and_then(Value::as_str)
        .unwrap_or(FALLBACK_COLOR)
        .to_owned();
    let timestamp_millis = payload
        .get("timestamp")
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(f64_to_millis)))
        .unwrap_or_else(now_ms);

    if kind.is_presence() {
        return Some(ActionEnvelope {
            kind,
            origin_user_id,
            origin_user_name,
            origin_color,
            timestamp_millis,
            node_id: None,
            position: None,
            data: None,
        });
    }

    let node_id = payload
        .get("nodeId")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let position = payload.get("position").and_then(decode_position);
    let data = payload.get("data").filter(|v| !v.is_null()).cloned();

    Some(ActionEnvelope { kind, origin_user_id, origin_user_name, origin_color, timestamp_millis, node_id, position, data })
}

fn decode_position(value: &Value) -> Option<Position> {
    let x = value.get("x").and_then(Value::as_f64)?;
    let y = value.get("y").and_then(Value::as_f64)?;
    Some(Position { x, y })
}

#[allow(clippy::cast_possible_truncation)]
fn f64_to_millis(value: f64) -> i64 {
    value as i64
}

#[cfg(test)]
#[path = "envelope_test.rs"]
mod tests;
