//! Beacon leave endpoint.
//!
//! Accepts `{chatId, action}` and republishes the action as `user_leave` on
//! the chat's topic. The body is parsed from raw bytes so the request's
//! content type does not matter; beacon senders often cannot set one.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};

use super::{RelayError, RelayState};
use crate::beacon::{LeaveBeaconBody, publish_leave};
use crate::error::ErrorBody;

pub async fn handle_leave(State(state): State<RelayState>, body: Bytes) -> Response {
    let body: LeaveBeaconBody = match serde_json::from_slice(&body) {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "relay leave: malformed body");
            let err = RelayError::InvalidFrame(e.to_string());
            return (StatusCode::BAD_REQUEST, Json(ErrorBody::from_error(&err))).into_response();
        }
    };

    match publish_leave(&state.hub, &body) {
        Ok(delivered) => {
            info!(chat_id = %body.chat_id, user_id = %body.action.origin_user_id, delivered, "relay leave: published");
            StatusCode::ACCEPTED.into_response()
        }
        Err(e) => {
            warn!(chat_id = %body.chat_id, error = %e, "relay leave: rejected");
            (StatusCode::BAD_REQUEST, Json(ErrorBody::from_error(&e))).into_response()
        }
    }
}

#[cfg(test)]
#[path = "leave_test.rs"]
mod tests;
