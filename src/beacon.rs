//! Out-of-band leave delivery.
//!
//! DESIGN
//! ======
//! When a participant goes away the channel may already be half torn down,
//! so the `user_leave` announcement is first handed to a beacon: a
//! fire-and-forget request that does not depend on the channel staying
//! open. `send_leave` is synchronous on purpose. It only reports whether
//! the request could be built and dispatched; the response is never awaited
//! by the caller. A synchronous `Err` tells the session to fall back to the
//! ordinary channel send.
//!
//! Implementations:
//! - `HttpBeacon` POSTs `{chatId, action}` to the relay's leave endpoint on
//!   a detached task.
//! - `HubBeacon` publishes straight onto an in-process hub.
//! - `DisabledBeacon` always fails, forcing the channel fallback.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::channel::topic_for_chat;
use crate::envelope::{ActionEnvelope, ActionKind, EVENT_USER_LEAVE};
use crate::error::ErrorCode;
use crate::hub::Hub;

/// Relay path that accepts beacon leaves.
pub const LEAVE_ENDPOINT_PATH: &str = "/api/collaboration/leave";

/// Body of a beacon leave request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveBeaconBody {
    pub chat_id: String,
    pub action: ActionEnvelope,
}

#[derive(Debug, thiserror::Error)]
pub enum BeaconError {
    #[error("beacon unavailable")]
    Unavailable,
    #[error("no async runtime to dispatch beacon")]
    NoRuntime,
    #[error("beacon carries {0}, expected user_leave")]
    NotALeave(ActionKind),
    #[error("beacon chat id is empty")]
    MissingChat,
    #[error("beacon encode failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("beacon request failed: {0}")]
    Request(#[from] reqwest::Error),
}

impl ErrorCode for BeaconError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Unavailable => "E_BEACON_UNAVAILABLE",
            Self::NoRuntime => "E_BEACON_NO_RUNTIME",
            Self::NotALeave(_) => "E_BEACON_NOT_LEAVE",
            Self::MissingChat => "E_BEACON_MISSING_CHAT",
            Self::Encode(_) => "E_ENCODE",
            Self::Request(_) => "E_BEACON_REQUEST",
        }
    }
}

/// Fire-and-forget leave delivery that survives channel teardown.
pub trait LeaveBeacon: Send + Sync {
    /// Dispatch a leave announcement without waiting for the outcome.
    ///
    /// # Errors
    ///
    /// Returns an error only if the request could not be built or
    /// dispatched. Delivery failures after dispatch are logged, not returned.
    fn send_leave(&self, chat_id: &str, action: &ActionEnvelope) -> Result<(), BeaconError>;
}

/// Publish a validated leave body onto the chat's topic. Returns the number
/// of subscribers reached.
///
/// # Errors
///
/// Rejects bodies that are not a `user_leave` or lack a chat ID.
pub fn publish_leave(hub: &Hub, body: &LeaveBeaconBody) -> Result<usize, BeaconError> {
    if body.chat_id.is_empty() {
        return Err(BeaconError::MissingChat);
    }
    if body.action.kind != ActionKind::UserLeave {
        return Err(BeaconError::NotALeave(body.action.kind));
    }
    let payload = serde_json::to_value(&body.action)?;
    Ok(hub.publish(&topic_for_chat(&body.chat_id), EVENT_USER_LEAVE, &payload))
}

// =============================================================================
// HTTP
// =============================================================================

pub struct HttpBeacon {
    client: reqwest::Client,
    endpoint: String,
    inflight: Mutex<Vec<JoinHandle<()>>>,
}

impl HttpBeacon {
    #[must_use]
    pub fn new(client: reqwest::Client, relay_url: &str) -> Self {
        let endpoint = format!("{}{LEAVE_ENDPOINT_PATH}", relay_url.trim_end_matches('/'));
        Self { client, endpoint, inflight: Mutex::new(Vec::new()) }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Wait up to `timeout` for dispatched beacons to finish. Used by the
    /// binary at shutdown so the process does not exit mid-request.
    pub async fn drain(&self, timeout: Duration) {
        let pending: Vec<_> = std::mem::take(&mut *self.inflight.lock().unwrap_or_else(PoisonError::into_inner));
        if pending.is_empty() {
            return;
        }
        let all = futures_util::future::join_all(pending);
        if tokio::time::timeout(timeout, all).await.is_err() {
            warn!(endpoint = %self.endpoint, "beacon: drain timed out");
        }
    }
}

impl LeaveBeacon for HttpBeacon {
    fn send_leave(&self, chat_id: &str, action: &ActionEnvelope) -> Result<(), BeaconError> {
        let runtime = Handle::try_current().map_err(|_| BeaconError::NoRuntime)?;
        let body = LeaveBeaconBody { chat_id: chat_id.to_owned(), action: action.clone() };
        let request = self.client.post(&self.endpoint).json(&body).build()?;

        let client = self.client.clone();
        let chat_id = chat_id.to_owned();
        let handle = runtime.spawn(async move {
            match client.execute(request).await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(%chat_id, status = %resp.status(), "beacon: leave delivered");
                }
                Ok(resp) => warn!(%chat_id, status = %resp.status(), "beacon: leave rejected"),
                Err(e) => warn!(%chat_id, error = %e, "beacon: leave request failed"),
            }
        });

        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        inflight.retain(|h| !h.is_finished());
        inflight.push(handle);
        Ok(())
    }
}

// =============================================================================
// IN-PROCESS
// =============================================================================

/// Publishes leaves directly onto a hub. Pairs with `LocalTransport`.
#[derive(Clone)]
pub struct HubBeacon {
    hub: Hub,
}

impl HubBeacon {
    #[must_use]
    pub fn new(hub: Hub) -> Self {
        Self { hub }
    }
}

impl LeaveBeacon for HubBeacon {
    fn send_leave(&self, chat_id: &str, action: &ActionEnvelope) -> Result<(), BeaconError> {
        let body = LeaveBeaconBody { chat_id: chat_id.to_owned(), action: action.clone() };
        let delivered = publish_leave(&self.hub, &body)?;
        debug!(chat_id, delivered, "beacon: leave published");
        Ok(())
    }
}

/// Always unavailable. Sessions using it fall back to the channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledBeacon;

impl LeaveBeacon for DisabledBeacon {
    fn send_leave(&self, _chat_id: &str, _action: &ActionEnvelope) -> Result<(), BeaconError> {
        Err(BeaconError::Unavailable)
    }
}

#[cfg(test)]
#[path = "beacon_test.rs"]
mod tests;
