//! Realtime collaboration sessions for shared mind-map conversations.
//!
//! ARCHITECTURE
//! ============
//! - `session` drives one participant's membership in a chat's channel:
//!   connection state, the delayed join announcement, presence tracking,
//!   and the leave on teardown.
//! - `broadcaster` and `presence` are the session's outbound stamping and
//!   participant registry.
//! - `channel` abstracts the pub/sub substrate. `channel::local` runs on an
//!   in-process `hub`; `channel::ws` talks to a `relay` over websockets.
//! - `beacon` delivers leaves out of band so they survive teardown.
//! - `access` gates who may join a chat and activates sessions.
//! - `relay` is the axum server hosting the websocket fan-out, the beacon
//!   leave endpoint, and the access endpoint.

pub mod access;
pub mod beacon;
pub mod broadcaster;
pub mod callback;
pub mod channel;
pub mod cli;
pub mod config;
pub mod db;
pub mod envelope;
pub mod error;
pub mod hub;
pub mod presence;
pub mod relay;
pub mod session;

#[cfg(test)]
pub mod test_helpers;
