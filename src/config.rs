//! Configuration parsed from environment variables.
//!
//! Numeric values that fail to parse fall back to their defaults. A relay
//! URL without an `http://` or `https://` scheme is an error, since every
//! client-side transport derives its endpoints from it. So is a malformed
//! `COLLAB_SEED_CHATS` entry.

use std::time::Duration;

use crate::error::ErrorCode;

pub const DEFAULT_JOIN_DELAY_MS: u64 = 100;
pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:3000";
pub const DEFAULT_EVENT_BUFFER: usize = 256;
pub const DEFAULT_SUBSCRIBE_TIMEOUT_MS: u64 = 10_000;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid relay url {0:?}: expected http:// or https://")]
    InvalidRelayUrl(String),
    #[error("invalid seed chat {0:?}: expected CHAT:OWNER[:collaborative|:private]")]
    InvalidSeedChat(String),
}

impl ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRelayUrl(_) => "E_CONFIG_RELAY_URL",
            Self::InvalidSeedChat(_) => "E_CONFIG_SEED_CHAT",
        }
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// Client-side session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Delay between reaching `connected` and announcing the local join.
    pub join_delay: Duration,
    pub relay_url: String,
    /// Capacity of each channel's inbound event queue.
    pub event_buffer: usize,
    /// Deadline for dialing the relay and receiving the subscribe ack.
    pub subscribe_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            join_delay: Duration::from_millis(DEFAULT_JOIN_DELAY_MS),
            relay_url: DEFAULT_RELAY_URL.to_owned(),
            event_buffer: DEFAULT_EVENT_BUFFER,
            subscribe_timeout: Duration::from_millis(DEFAULT_SUBSCRIBE_TIMEOUT_MS),
        }
    }
}

impl SessionConfig {
    /// Read `COLLAB_JOIN_DELAY_MS`, `COLLAB_RELAY_URL`, `COLLAB_EVENT_BUFFER`
    /// and `COLLAB_SUBSCRIBE_TIMEOUT_MS`.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay URL is not http(s).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] over an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay URL is not http(s).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let relay_url = lookup("COLLAB_RELAY_URL").unwrap_or_else(|| DEFAULT_RELAY_URL.to_owned());
        Ok(Self {
            join_delay: Duration::from_millis(parse_or(&lookup, "COLLAB_JOIN_DELAY_MS", DEFAULT_JOIN_DELAY_MS)),
            relay_url: validate_relay_url(&relay_url)?,
            event_buffer: parse_or(&lookup, "COLLAB_EVENT_BUFFER", DEFAULT_EVENT_BUFFER).max(1),
            subscribe_timeout: Duration::from_millis(parse_or(
                &lookup,
                "COLLAB_SUBSCRIBE_TIMEOUT_MS",
                DEFAULT_SUBSCRIBE_TIMEOUT_MS,
            )),
        })
    }

    /// Replace the relay URL, e.g. from a CLI flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not http(s).
    pub fn with_relay_url(mut self, relay_url: &str) -> Result<Self, ConfigError> {
        self.relay_url = validate_relay_url(relay_url)?;
        Ok(self)
    }
}

/// Trim a trailing slash and require an http(s) scheme.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidRelayUrl`] for any other scheme.
pub fn validate_relay_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let host = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("https://"));
    match host {
        Some(h) if !h.is_empty() => Ok(trimmed.to_owned()),
        _ => Err(ConfigError::InvalidRelayUrl(raw.to_owned())),
    }
}

// =============================================================================
// RELAY
// =============================================================================

/// Server-side relay settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub port: u16,
    /// Postgres URL for the access store. In-memory store when `None`.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// Capacity of each websocket client's outbound queue.
    pub subscriber_buffer: usize,
    /// Chats loaded into the in-memory store at startup. Ignored when a
    /// database is configured.
    pub seed_chats: Vec<SeedChat>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: None,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            seed_chats: Vec::new(),
        }
    }
}

impl RelayConfig {
    /// Read `PORT`, `DATABASE_URL`, `DB_MAX_CONNECTIONS`,
    /// `COLLAB_SUBSCRIBER_BUFFER` and `COLLAB_SEED_CHATS`.
    ///
    /// # Errors
    ///
    /// Returns an error if a `COLLAB_SEED_CHATS` entry is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// # Errors
    ///
    /// Returns an error if a `COLLAB_SEED_CHATS` entry is malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let seed_chats = match lookup("COLLAB_SEED_CHATS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(SeedChat::parse)
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        Ok(Self {
            port: parse_or(&lookup, "PORT", DEFAULT_PORT),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS).max(1),
            subscriber_buffer: parse_or(&lookup, "COLLAB_SUBSCRIBER_BUFFER", DEFAULT_SUBSCRIBER_BUFFER).max(1),
            seed_chats,
        })
    }
}

/// A chat record for the in-memory access store, written
/// `CHAT:OWNER[:collaborative|:private]`. Chats are collaborative unless
/// marked private.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedChat {
    pub chat_id: String,
    pub owner_id: String,
    pub is_collaborative: bool,
}

impl SeedChat {
    /// # Errors
    ///
    /// Returns `InvalidSeedChat` for missing IDs or an unknown flag.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidSeedChat(raw.to_owned());
        let parts: Vec<&str> = raw.trim().split(':').map(str::trim).collect();
        let (chat_id, owner_id, flag) = match parts.as_slice() {
            [chat, owner] => (*chat, *owner, None),
            [chat, owner, flag] => (*chat, *owner, Some(*flag)),
            _ => return Err(invalid()),
        };
        if chat_id.is_empty() || owner_id.is_empty() {
            return Err(invalid());
        }
        let is_collaborative = match flag {
            None | Some("collaborative") => true,
            Some("private") => false,
            Some(_) => return Err(invalid()),
        };
        Ok(Self { chat_id: chat_id.to_owned(), owner_id: owner_id.to_owned(), is_collaborative })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
