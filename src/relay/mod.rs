//! Relay server: the pub/sub substrate and host endpoints for sessions.
//!
//! SYSTEM CONTEXT
//! ==============
//! Clients connect a websocket per subscribed chat topic and exchange JSON
//! control frames (see `protocol`). The relay fans each broadcast out to
//! every subscriber of the topic, sender included, through the shared
//! `Hub`. It makes no decisions about conflicts or presence; it only
//! forwards.
//!
//! Alongside the websocket the relay hosts:
//! - `POST /api/collaboration/leave`: beacon leaves, republished as
//!   `user_leave` on the chat's topic.
//! - `POST /api/collaboration/{chat_id}/session`: the access gate.
//! - `DELETE /api/collaboration/{chat_id}/session`: the owner ends the
//!   session.
//! - `GET /healthz`.

pub mod access;
pub mod leave;
pub mod protocol;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::access::{AccessGate, AccessStore, MemoryAccessStore, PgAccessStore};
use crate::beacon::LEAVE_ENDPOINT_PATH;
use crate::channel::ws::WS_PATH;
use crate::config::RelayConfig;
use crate::db;
use crate::error::ErrorCode;
use crate::hub::Hub;

#[derive(Clone)]
pub struct RelayState {
    pub hub: Hub,
    pub gate: AccessGate,
    /// Capacity of each websocket client's outbound queue.
    pub subscriber_buffer: usize,
}

impl RelayState {
    #[must_use]
    pub fn new(hub: Hub, gate: AccessGate, subscriber_buffer: usize) -> Self {
        Self { hub, gate, subscriber_buffer: subscriber_buffer.max(1) }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("invalid topic: {0}")]
    InvalidTopic(String),
    #[error("subscribe requires at least one event")]
    EmptyFilter,
    #[error("bind failed: {0}")]
    Bind(std::io::Error),
    #[error("server failed: {0}")]
    Serve(std::io::Error),
    #[error("database init failed: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for RelayError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidFrame(_) => "E_INVALID_FRAME",
            Self::InvalidTopic(_) => "E_INVALID_TOPIC",
            Self::EmptyFilter => "E_EMPTY_FILTER",
            Self::Bind(_) => "E_BIND",
            Self::Serve(_) => "E_SERVE",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

/// Assemble the relay router.
pub fn app(state: RelayState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(WS_PATH, get(ws::handle_ws))
        .route(LEAVE_ENDPOINT_PATH, post(leave::handle_leave))
        .route(
            "/api/collaboration/{chat_id}/session",
            post(access::open_session).delete(access::end_session),
        )
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Build relay state, connecting to Postgres when a database URL is set.
/// Otherwise the in-memory store is loaded with `config.seed_chats`.
///
/// # Errors
///
/// Returns an error if the database pool or migrations fail.
pub async fn build_state(config: &RelayConfig) -> Result<RelayState, RelayError> {
    let store: Arc<dyn AccessStore> = match &config.database_url {
        Some(url) => {
            let pool = db::init_pool(url, config.db_max_connections).await?;
            info!("relay: using postgres access store");
            if !config.seed_chats.is_empty() {
                warn!(count = config.seed_chats.len(), "relay: seed chats ignored with a database");
            }
            Arc::new(PgAccessStore::new(pool))
        }
        None => {
            let store = MemoryAccessStore::new();
            for seed in &config.seed_chats {
                store.insert_chat(&seed.chat_id, &seed.owner_id, seed.is_collaborative);
            }
            info!(seeded = config.seed_chats.len(), "relay: DATABASE_URL not set, using in-memory access store");
            Arc::new(store)
        }
    };
    Ok(RelayState::new(Hub::new(), AccessGate::new(store), config.subscriber_buffer))
}

/// Run the relay until Ctrl-C.
///
/// # Errors
///
/// Returns an error if state construction, bind, or serving fails.
pub async fn serve(config: RelayConfig) -> Result<(), RelayError> {
    let state = build_state(&config).await?;
    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .map_err(RelayError::Bind)?;

    info!(port = config.port, "collabmap relay listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(RelayError::Serve)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("relay: shutdown requested");
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
