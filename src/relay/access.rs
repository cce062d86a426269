//! Access endpoints on `/api/collaboration/{chat_id}/session`:
//! `POST` opens (or joins) the chat's session, `DELETE` lets the owner end
//! it.
//!
//! The caller's identity arrives as `{userId}`. Authenticating that claim is
//! the job of whatever sits in front of the relay.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::RelayState;
use crate::access::AccessError;
use crate::error::ErrorBody;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub user_id: String,
}

pub async fn open_session(
    State(state): State<RelayState>,
    Path(chat_id): Path<String>,
    Json(req): Json<SessionRequest>,
) -> Response {
    match state.gate.authorize(&chat_id, &req.user_id).await {
        Ok(grant) => (StatusCode::OK, Json(grant)).into_response(),
        Err(e) => (status_for(&e), Json(ErrorBody::from_error(&e))).into_response(),
    }
}

pub async fn end_session(
    State(state): State<RelayState>,
    Path(chat_id): Path<String>,
    Json(req): Json<SessionRequest>,
) -> Response {
    match state.gate.end_session(&chat_id, &req.user_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (status_for(&e), Json(ErrorBody::from_error(&e))).into_response(),
    }
}

fn status_for(err: &AccessError) -> StatusCode {
    match err {
        AccessError::InvalidRequest(_) | AccessError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
        AccessError::NotFound(_) => StatusCode::NOT_FOUND,
        AccessError::Denied(_) => StatusCode::FORBIDDEN,
        AccessError::Database(_) | AccessError::Http(_) => StatusCode::SERVICE_UNAVAILABLE,
        AccessError::Relay { .. } => StatusCode::BAD_GATEWAY,
    }
}

#[cfg(test)]
#[path = "access_test.rs"]
mod tests;
