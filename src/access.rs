//! Access control gate: who may open or join a chat's collaboration session.
//!
//! RULES
//! =====
//! - Owners are always allowed, and may create a session when none is
//!   active.
//! - Non-owners are allowed only on a collaborative chat whose session is
//!   already active. They never create one.
//!
//! Denial is a hard stop: no session is constructed without an
//! `AccessGrant`, and grants are only minted by `AccessGate::authorize` (or
//! received from a relay that ran it).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::{info, warn};

use crate::error::ErrorCode;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Collaborator,
    Viewer,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Collaborator => "collaborator",
            Self::Viewer => "viewer",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "owner" => Some(Self::Owner),
            "collaborator" => Some(Self::Collaborator),
            "viewer" => Some(Self::Viewer),
            _ => None,
        }
    }
}

/// What the persistence layer knows about one user and one chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChatFacts {
    pub is_owner: bool,
    pub is_collaborative: bool,
    pub session_active: bool,
    pub participant_role: Option<Role>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessDecision {
    pub allowed: bool,
    pub may_create_session: bool,
}

/// Apply the access rules.
#[must_use]
pub fn can_access(facts: &ChatFacts) -> AccessDecision {
    if facts.is_owner {
        return AccessDecision { allowed: true, may_create_session: !facts.session_active };
    }
    AccessDecision { allowed: facts.is_collaborative && facts.session_active, may_create_session: false }
}

/// Proof that a user passed the gate for a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    chat_id: String,
    user_id: String,
    role: Role,
    #[serde(default)]
    session_created: bool,
}

impl AccessGrant {
    pub(crate) fn new(chat_id: impl Into<String>, user_id: impl Into<String>, role: Role, session_created: bool) -> Self {
        Self { chat_id: chat_id.into(), user_id: user_id.into(), role, session_created }
    }

    #[must_use]
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether this authorization activated the session.
    #[must_use]
    pub fn session_created(&self) -> bool {
        self.session_created
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("invalid access request: {0}")]
    InvalidRequest(&'static str),
    #[error("chat not found: {0}")]
    NotFound(String),
    #[error("access denied to chat {0}")]
    Denied(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("access request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("relay rejected access request: {status} {message}")]
    Relay { status: u16, message: String },
    #[error("invalid relay url: {0}")]
    InvalidUrl(String),
}

impl ErrorCode for AccessError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "E_INVALID_REQUEST",
            Self::NotFound(_) => "E_CHAT_NOT_FOUND",
            Self::Denied(_) => "E_ACCESS_DENIED",
            Self::Database(_) => "E_DATABASE",
            Self::Http(_) => "E_HTTP",
            Self::Relay { .. } => "E_RELAY",
            Self::InvalidUrl(_) => "E_INVALID_URL",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Http(_))
    }
}

// =============================================================================
// STORE
// =============================================================================

/// Read-mostly view of the persisted collaboration records.
#[async_trait::async_trait]
pub trait AccessStore: Send + Sync {
    /// Facts for `user_id` on `chat_id`, or `None` if the chat is unknown.
    async fn chat_facts(&self, chat_id: &str, user_id: &str) -> Result<Option<ChatFacts>, AccessError>;

    /// Mark the chat's session active, started by `user_id`.
    async fn activate_session(&self, chat_id: &str, user_id: &str) -> Result<(), AccessError>;

    /// Mark the chat's session inactive. Participant roles are kept.
    async fn deactivate_session(&self, chat_id: &str) -> Result<(), AccessError>;
}

#[derive(Debug, Clone, Default)]
struct ChatRecord {
    owner_id: String,
    is_collaborative: bool,
    session_active: bool,
    roles: HashMap<String, Role>,
}

/// In-memory store used when no database is configured, and in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryAccessStore {
    chats: Arc<Mutex<HashMap<String, ChatRecord>>>,
}

impl MemoryAccessStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_chat(&self, chat_id: &str, owner_id: &str, is_collaborative: bool) {
        let mut chats = self.chats.lock().unwrap_or_else(PoisonError::into_inner);
        chats.insert(
            chat_id.to_owned(),
            ChatRecord { owner_id: owner_id.to_owned(), is_collaborative, ..ChatRecord::default() },
        );
    }

    pub fn set_role(&self, chat_id: &str, user_id: &str, role: Role) {
        let mut chats = self.chats.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(chat) = chats.get_mut(chat_id) {
            chat.roles.insert(user_id.to_owned(), role);
        }
    }

    #[must_use]
    pub fn is_session_active(&self, chat_id: &str) -> bool {
        let chats = self.chats.lock().unwrap_or_else(PoisonError::into_inner);
        chats.get(chat_id).is_some_and(|c| c.session_active)
    }
}

#[async_trait::async_trait]
impl AccessStore for MemoryAccessStore {
    async fn chat_facts(&self, chat_id: &str, user_id: &str) -> Result<Option<ChatFacts>, AccessError> {
        let chats = self.chats.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(chats.get(chat_id).map(|chat| ChatFacts {
            is_owner: chat.owner_id == user_id,
            is_collaborative: chat.is_collaborative,
            session_active: chat.session_active,
            participant_role: chat.roles.get(user_id).copied(),
        }))
    }

    async fn activate_session(&self, chat_id: &str, user_id: &str) -> Result<(), AccessError> {
        let mut chats = self.chats.lock().unwrap_or_else(PoisonError::into_inner);
        let chat = chats
            .get_mut(chat_id)
            .ok_or_else(|| AccessError::NotFound(chat_id.to_owned()))?;
        chat.session_active = true;
        chat.roles.insert(user_id.to_owned(), Role::Owner);
        Ok(())
    }

    async fn deactivate_session(&self, chat_id: &str) -> Result<(), AccessError> {
        let mut chats = self.chats.lock().unwrap_or_else(PoisonError::into_inner);
        let chat = chats
            .get_mut(chat_id)
            .ok_or_else(|| AccessError::NotFound(chat_id.to_owned()))?;
        chat.session_active = false;
        Ok(())
    }
}

/// Postgres-backed store over the tables in `db/migrations`.
#[derive(Clone)]
pub struct PgAccessStore {
    pool: PgPool,
}

impl PgAccessStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AccessStore for PgAccessStore {
    async fn chat_facts(&self, chat_id: &str, user_id: &str) -> Result<Option<ChatFacts>, AccessError> {
        let row = sqlx::query(
            "SELECT c.owner_id, c.is_collaborative, \
                    COALESCE(s.is_active, FALSE) AS session_active, \
                    p.role AS participant_role \
             FROM chats c \
             LEFT JOIN collaboration_sessions s ON s.chat_id = c.id \
             LEFT JOIN collaboration_participants p ON p.chat_id = c.id AND p.user_id = $2 \
             WHERE c.id = $1",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let owner_id: String = row.try_get("owner_id")?;
        let role: Option<String> = row.try_get("participant_role")?;
        Ok(Some(ChatFacts {
            is_owner: owner_id == user_id,
            is_collaborative: row.try_get("is_collaborative")?,
            session_active: row.try_get("session_active")?,
            participant_role: role.as_deref().and_then(Role::parse),
        }))
    }

    async fn activate_session(&self, chat_id: &str, user_id: &str) -> Result<(), AccessError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO collaboration_sessions (chat_id, is_active, started_by, started_at) \
             VALUES ($1, TRUE, $2, now()) \
             ON CONFLICT (chat_id) DO UPDATE \
             SET is_active = TRUE, started_by = EXCLUDED.started_by, started_at = now()",
        )
        .bind(chat_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO collaboration_participants (chat_id, user_id, role) \
             VALUES ($1, $2, 'owner') \
             ON CONFLICT (chat_id, user_id) DO NOTHING",
        )
        .bind(chat_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn deactivate_session(&self, chat_id: &str) -> Result<(), AccessError> {
        sqlx::query("UPDATE collaboration_sessions SET is_active = FALSE WHERE chat_id = $1")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// =============================================================================
// GATE
// =============================================================================

#[derive(Clone)]
pub struct AccessGate {
    store: Arc<dyn AccessStore>,
}

impl AccessGate {
    #[must_use]
    pub fn new(store: Arc<dyn AccessStore>) -> Self {
        Self { store }
    }

    /// Check access and, for an owner with no active session, activate one.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for blank IDs, `NotFound` for unknown chats,
    /// `Denied` when the rules refuse access, or a store error.
    pub async fn authorize(&self, chat_id: &str, user_id: &str) -> Result<AccessGrant, AccessError> {
        if chat_id.trim().is_empty() {
            return Err(AccessError::InvalidRequest("chat id is required"));
        }
        if user_id.trim().is_empty() {
            return Err(AccessError::InvalidRequest("user id is required"));
        }

        let facts = self
            .store
            .chat_facts(chat_id, user_id)
            .await?
            .ok_or_else(|| AccessError::NotFound(chat_id.to_owned()))?;
        let decision = can_access(&facts);
        if !decision.allowed {
            warn!(chat_id, user_id, "access: denied");
            return Err(AccessError::Denied(chat_id.to_owned()));
        }

        if decision.may_create_session {
            self.store.activate_session(chat_id, user_id).await?;
            info!(chat_id, user_id, "access: session activated");
        }

        let role = if facts.is_owner {
            Role::Owner
        } else {
            facts
                .participant_role
                .filter(|r| *r != Role::Owner)
                .unwrap_or(Role::Viewer)
        };
        Ok(AccessGrant::new(chat_id, user_id, role, decision.may_create_session))
    }

    /// End the chat's session on behalf of its owner. Later non-owner
    /// requests are denied until the owner authorizes again.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for blank IDs, `NotFound` for unknown chats,
    /// `Denied` for anyone but the owner, or a store error.
    pub async fn end_session(&self, chat_id: &str, user_id: &str) -> Result<(), AccessError> {
        if chat_id.trim().is_empty() {
            return Err(AccessError::InvalidRequest("chat id is required"));
        }
        if user_id.trim().is_empty() {
            return Err(AccessError::InvalidRequest("user id is required"));
        }

        let facts = self
            .store
            .chat_facts(chat_id, user_id)
            .await?
            .ok_or_else(|| AccessError::NotFound(chat_id.to_owned()))?;
        if !facts.is_owner {
            warn!(chat_id, user_id, "access: end session denied");
            return Err(AccessError::Denied(chat_id.to_owned()));
        }
        if facts.session_active {
            self.store.deactivate_session(chat_id).await?;
            info!(chat_id, user_id, "access: session ended");
        }
        Ok(())
    }
}

// =============================================================================
// REMOTE
// =============================================================================

/// URL of the relay's access endpoint for a chat. The chat ID is
/// percent-encoded as a single path segment.
///
/// # Errors
///
/// Returns `InvalidUrl` if `relay_url` cannot carry a path.
pub fn session_url(relay_url: &str, chat_id: &str) -> Result<reqwest::Url, AccessError> {
    let invalid = || AccessError::InvalidUrl(relay_url.to_owned());
    let mut url = reqwest::Url::parse(relay_url).map_err(|_| invalid())?;
    url.path_segments_mut()
        .map_err(|()| invalid())?
        .pop_if_empty()
        .extend(["api", "collaboration", chat_id, "session"]);
    Ok(url)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GrantRequest<'a> {
    user_id: &'a str,
}

/// Ask a relay to authorize `user_id` on `chat_id`.
///
/// # Errors
///
/// Maps 403 to `Denied`, 404 to `NotFound`, and other failures to
/// `Relay` or `Http`.
pub async fn request_grant(
    client: &reqwest::Client,
    relay_url: &str,
    chat_id: &str,
    user_id: &str,
) -> Result<AccessGrant, AccessError> {
    let resp = client
        .post(session_url(relay_url, chat_id)?)
        .json(&GrantRequest { user_id })
        .send()
        .await?;

    if resp.status().is_success() {
        return Ok(resp.json::<AccessGrant>().await?);
    }
    Err(rejection(resp, chat_id).await)
}

/// Ask a relay to end the owner's session on `chat_id`.
///
/// # Errors
///
/// Same mapping as [`request_grant`].
pub async fn release_grant(
    client: &reqwest::Client,
    relay_url: &str,
    chat_id: &str,
    user_id: &str,
) -> Result<(), AccessError> {
    let resp = client
        .delete(session_url(relay_url, chat_id)?)
        .json(&GrantRequest { user_id })
        .send()
        .await?;

    if resp.status().is_success() {
        return Ok(());
    }
    Err(rejection(resp, chat_id).await)
}

async fn rejection(resp: reqwest::Response, chat_id: &str) -> AccessError {
    let status = resp.status();
    match status {
        reqwest::StatusCode::FORBIDDEN => AccessError::Denied(chat_id.to_owned()),
        reqwest::StatusCode::NOT_FOUND => AccessError::NotFound(chat_id.to_owned()),
        _ => {
            let message = resp
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_owned))
                .unwrap_or_default();
            AccessError::Relay { status: status.as_u16(), message }
        }
    }
}

#[cfg(test)]
#[path = "access_test.rs"]
mod tests;
