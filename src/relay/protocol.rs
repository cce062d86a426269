//! Relay wire protocol: JSON text frames tagged by `op`.
//!
//! Client → relay: `subscribe`, `broadcast`, `unsubscribe`.
//! Relay → client: `subscribed`, `message`, `error`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorBody, ErrorCode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientOp {
    Subscribe {
        topic: String,
        #[serde(default)]
        events: Vec<String>,
    },
    Broadcast {
        topic: String,
        event: String,
        #[serde(default)]
        payload: Value,
    },
    Unsubscribe {
        topic: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ServerOp {
    Subscribed {
        topic: String,
    },
    Message {
        topic: String,
        event: String,
        payload: Value,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
        code: String,
        message: String,
        #[serde(default)]
        retryable: bool,
    },
}

impl ServerOp {
    /// Error reply built from any coded error.
    #[must_use]
    pub fn error(topic: Option<String>, err: &(impl ErrorCode + ?Sized)) -> Self {
        let body = ErrorBody::from_error(err);
        Self::Error { topic, code: body.code.to_owned(), message: body.message, retryable: body.retryable }
    }
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;
