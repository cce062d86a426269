//! Session lifecycle controller: one collaboration session per chat view.
//!
//! ARCHITECTURE
//! ============
//! `SessionController::join` derives the chat's topic, opens a channel, and
//! spawns a session actor. The actor owns everything mutable about the
//! session: the channel, the presence registry, the broadcaster, and the
//! join-announcement timer. It is the single logical thread of control.
//! Transport events, caller commands and the timer are multiplexed in one
//! `select!` loop, so no two of them ever interleave mid-update.
//!
//! LIFECYCLE
//! =========
//! 1. idle → connecting: channel created, three events registered, subscribe.
//! 2. connecting → connected: on the transport's `Subscribed`, pick a colour
//!    from the registry and arm the join timer.
//! 3. Timer fires: announce `user_join`. Teardown cancels a pending timer.
//! 4. Transport `Errored` / `TimedOut` / `Closed`: record the state, stop
//!    broadcasting. No retry; the caller re-joins if it wants to, and that
//!    re-join replaces the dead session with a fresh one.
//! 5. Teardown (explicit `end`, `leave`, re-join elsewhere or after a
//!    failure, or dropping the handle): cancel timer → beacon `user_leave` (channel fallback) →
//!    unsubscribe → clear participants and colour → `closed`.
//!
//! Callbacks run synchronously on the actor task. They must not block.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tracing::{debug, info, warn};

use crate::access::AccessGrant;
use crate::beacon::LeaveBeacon;
use crate::broadcaster::{ActionBroadcaster, Received};
use crate::callback::CallbackSlot;
use crate::channel::{Channel, ChannelEvent, ChannelEvents, ChannelStatus, EventFilter, InboundMessage, Transport, topic_for_chat};
use crate::config::SessionConfig;
use crate::envelope::{ActionDraft, ActionEnvelope, ActionKind, DEFAULT_USER_NAME, EVENT_ACTION, EVENT_USER_JOIN, EVENT_USER_LEAVE};
use crate::presence::{Participant, PresenceRegistry};

// =============================================================================
// TYPES
// =============================================================================

/// Session connection state. Only transport status drives transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session, or not started yet.
    #[default]
    Idle,
    Connecting,
    Connected,
    Errored,
    TimedOut,
    Closed,
}

impl ConnectionState {
    fn from_status(status: ChannelStatus) -> Self {
        match status {
            ChannelStatus::Connecting => Self::Connecting,
            ChannelStatus::Subscribed => Self::Connected,
            ChannelStatus::Errored => Self::Errored,
            ChannelStatus::TimedOut => Self::TimedOut,
            ChannelStatus::Closed => Self::Closed,
        }
    }
}

/// Caller-supplied callbacks. Setting a slot takes effect for the next
/// inbound event; live sessions need no re-subscribe.
#[derive(Debug, Clone, Default)]
pub struct SessionCallbacks {
    pub on_action: CallbackSlot<ActionEnvelope>,
    pub on_presence_change: CallbackSlot<Vec<Participant>>,
}

enum Command {
    Broadcast(ActionDraft),
    Forget(String),
    End,
}

// =============================================================================
// HANDLE
// =============================================================================

/// Caller's view of a running session.
///
/// Dropping the handle tears the session down in the background, the same
/// way a closed tab would.
pub struct SessionHandle {
    chat_id: String,
    user_id: String,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    color: watch::Receiver<Option<String>>,
    participants: watch::Receiver<Vec<Participant>>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    #[must_use]
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Queue a UI action for broadcast. Dropped silently until connected.
    pub fn broadcast(&self, draft: ActionDraft) {
        if self.commands.send(Command::Broadcast(draft)).is_err() {
            debug!(chat_id = %self.chat_id, "session: broadcast after teardown ignored");
        }
    }

    /// Remove a participant from the local view without waiting for their
    /// `user_leave`.
    pub fn forget_participant(&self, user_id: &str) {
        if self.commands.send(Command::Forget(user_id.to_owned())).is_err() {
            debug!(chat_id = %self.chat_id, user_id, "session: forget after teardown ignored");
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Local colour, assigned once the session is connected.
    #[must_use]
    pub fn color(&self) -> Option<String> {
        self.color.borrow().clone()
    }

    #[must_use]
    pub fn participants(&self) -> Vec<Participant> {
        self.participants.borrow().clone()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    #[must_use]
    pub fn watch_color(&self) -> watch::Receiver<Option<String>> {
        self.color.clone()
    }

    #[must_use]
    pub fn watch_participants(&self) -> watch::Receiver<Vec<Participant>> {
        self.participants.clone()
    }

    /// Tear the session down and wait for teardown to finish.
    pub async fn end(mut self) {
        let _ = self.commands.send(Command::End);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(chat_id = %self.chat_id, error = %e, "session: actor task failed");
            }
        }
    }
}

// =============================================================================
// CONTROLLER
// =============================================================================

/// Owns at most one live session. Joining a different chat or as a
/// different user tears the previous session down first.
pub struct SessionController {
    transport: Arc<dyn Transport>,
    beacon: Arc<dyn LeaveBeacon>,
    config: SessionConfig,
    callbacks: SessionCallbacks,
    active: Option<SessionHandle>,
}

impl SessionController {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, beacon: Arc<dyn LeaveBeacon>, config: SessionConfig) -> Self {
        Self { transport, beacon, config, callbacks: SessionCallbacks::default(), active: None }
    }

    /// Callback slots shared with every session this controller starts.
    #[must_use]
    pub fn callbacks(&self) -> &SessionCallbacks {
        &self.callbacks
    }

    pub fn on_action(&self, callback: impl Fn(&ActionEnvelope) + Send + Sync + 'static) {
        self.callbacks.on_action.set(callback);
    }

    pub fn on_presence_change(&self, callback: impl Fn(&Vec<Participant>) + Send + Sync + 'static) {
        self.callbacks.on_presence_change.set(callback);
    }

    /// Start (or keep) the session for the grant's chat and user. A session
    /// that already ended (errored, timed out, or closed) is torn down and
    /// replaced.
    pub async fn join(&mut self, grant: &AccessGrant, user_name: &str) -> &SessionHandle {
        let reusable = self.active.as_ref().is_some_and(|h| {
            h.chat_id == grant.chat_id()
                && h.user_id == grant.user_id()
                && matches!(h.state(), ConnectionState::Connecting | ConnectionState::Connected)
        });
        if !reusable {
            self.leave().await;
        }
        let (transport, beacon, config, callbacks) = (&self.transport, &self.beacon, &self.config, &self.callbacks);
        self.active
            .get_or_insert_with(|| spawn_session(grant, user_name, transport.as_ref(), beacon, config, callbacks))
    }

    /// End the active session, if any, and wait for teardown.
    pub async fn leave(&mut self) {
        if let Some(handle) = self.active.take() {
            handle.end().await;
        }
    }

    #[must_use]
    pub fn session(&self) -> Option<&SessionHandle> {
        self.active.as_ref()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.active
            .as_ref()
            .map_or(ConnectionState::Idle, SessionHandle::state)
    }
}

fn spawn_session(
    grant: &AccessGrant,
    user_name: &str,
    transport: &dyn Transport,
    beacon: &Arc<dyn LeaveBeacon>,
    config: &SessionConfig,
    callbacks: &SessionCallbacks,
) -> SessionHandle {
    let chat_id = grant.chat_id().to_owned();
    let user_id = grant.user_id().to_owned();
    let user_name = if user_name.trim().is_empty() { DEFAULT_USER_NAME } else { user_name };

    let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
    let (color_tx, color_rx) = watch::channel(None);
    let (participants_tx, participants_rx) = watch::channel(Vec::new());
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();

    // Handlers exist before the subscription starts delivering.
    let channel = transport.channel(&topic_for_chat(&chat_id));
    let broadcaster = ActionBroadcaster::new(Arc::clone(&channel), user_id.clone(), user_name, callbacks.on_action.clone());
    let registry = PresenceRegistry::new(user_id.clone(), callbacks.on_presence_change.clone());

    let filter = EventFilter::new()
        .on(EVENT_ACTION)
        .on(EVENT_USER_JOIN)
        .on(EVENT_USER_LEAVE);
    let events = match channel.subscribe(filter) {
        Ok(events) => Some(events),
        Err(e) => {
            warn!(%chat_id, error = %e, "session: subscribe failed");
            state_tx.send_replace(ConnectionState::Errored);
            None
        }
    };

    info!(%chat_id, %user_id, role = grant.role().as_str(), "session: joining");
    let actor = SessionActor {
        chat_id: chat_id.clone(),
        channel,
        broadcaster,
        registry,
        beacon: Arc::clone(beacon),
        join_delay: config.join_delay,
        join_timer: None,
        state_tx,
        color_tx,
        participants_tx,
    };
    let task = tokio::spawn(actor.run(commands_rx, events));

    SessionHandle {
        chat_id,
        user_id,
        commands: commands_tx,
        state: state_rx,
        color: color_rx,
        participants: participants_rx,
        task: Some(task),
    }
}

// =============================================================================
// ACTOR
// =============================================================================

struct SessionActor {
    chat_id: String,
    channel: Arc<dyn Channel>,
    broadcaster: ActionBroadcaster,
    registry: PresenceRegistry,
    beacon: Arc<dyn LeaveBeacon>,
    join_delay: Duration,
    join_timer: Option<Pin<Box<Sleep>>>,
    state_tx: watch::Sender<ConnectionState>,
    color_tx: watch::Sender<Option<String>>,
    participants_tx: watch::Sender<Vec<Participant>>,
}

impl SessionActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, mut events: Option<ChannelEvents>) {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(Command::Broadcast(draft)) => {
                            self.broadcaster.broadcast(draft).await;
                        }
                        Some(Command::Forget(user_id)) => {
                            let set = self.registry.remove_on_leave(&user_id);
                            self.publish_participants(set);
                        }
                        // Handle dropped or explicit end.
                        Some(Command::End) | None => break,
                    }
                }
                event = next_event(&mut events) => {
                    match event {
                        Some(ChannelEvent::Status(status)) => self.on_status(status),
                        Some(ChannelEvent::Message(message)) => self.on_message(&message).await,
                        None => {
                            events = None;
                            if self.state() == ConnectionState::Connected {
                                self.on_status(ChannelStatus::Closed);
                            }
                        }
                    }
                }
                () = timer_fired(&mut self.join_timer) => {
                    self.join_timer = None;
                    self.broadcaster.announce_join().await;
                    info!(chat_id = %self.chat_id, "session: join announced");
                }
            }
        }
        self.teardown().await;
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn on_status(&mut self, status: ChannelStatus) {
        let next = ConnectionState::from_status(status);
        match status {
            ChannelStatus::Connecting => {
                if self.state() != ConnectionState::Connected {
                    self.state_tx.send_replace(next);
                }
            }
            ChannelStatus::Subscribed => {
                if self.state() == ConnectionState::Connected {
                    return;
                }
                let color = self.registry.assign_color();
                info!(chat_id = %self.chat_id, %color, "session: connected");
                self.broadcaster.connect(color.clone());
                self.color_tx.send_replace(Some(color));
                self.state_tx.send_replace(next);
                self.join_timer = Some(Box::pin(tokio::time::sleep(self.join_delay)));
            }
            ChannelStatus::Errored | ChannelStatus::TimedOut | ChannelStatus::Closed => {
                warn!(chat_id = %self.chat_id, state = ?next, "session: channel down");
                self.join_timer = None;
                self.broadcaster.disconnect();
                self.state_tx.send_replace(next);
            }
        }
    }

    async fn on_message(&mut self, message: &InboundMessage) {
        match self.broadcaster.receive(message) {
            Some(Received::Join(envelope)) => {
                let is_new = !self.registry.contains(&envelope.origin_user_id);
                let set = self
                    .registry
                    .upsert_on_join(Participant::from_envelope(&envelope));
                self.publish_participants(set);
                // A newcomer missed our announcement. A pending timer will
                // cover it.
                if is_new && self.broadcaster.is_connected() && self.join_timer.is_none() {
                    debug!(chat_id = %self.chat_id, peer = %envelope.origin_user_id, "session: re-announcing to newcomer");
                    self.broadcaster.announce_join().await;
                }
            }
            Some(Received::Leave(envelope)) => {
                let set = self.registry.remove_on_leave(&envelope.origin_user_id);
                self.publish_participants(set);
            }
            Some(Received::Action(_)) | None => {}
        }
    }

    fn publish_participants(&self, set: Vec<Participant>) {
        self.participants_tx.send_if_modified(|current| {
            if *current == set {
                return false;
            }
            *current = set;
            true
        });
    }

    async fn teardown(&mut self) {
        // (a) A pending announcement must never fire on a dead channel.
        self.join_timer = None;

        // (b) Leave via beacon first, channel only if the beacon refuses.
        if let Some(leave) = self
            .broadcaster
            .presence_envelope(ActionKind::UserLeave)
        {
            if let Err(e) = self.beacon.send_leave(&self.chat_id, &leave) {
                warn!(chat_id = %self.chat_id, error = %e, "session: beacon leave failed, using channel");
                self.broadcaster.send_envelope(&leave).await;
            }
        }

        // (c)
        self.channel.unsubscribe().await;

        // (d)
        self.registry.clear();
        self.broadcaster.disconnect();
        self.color_tx.send_replace(None);
        self.participants_tx.send_replace(Vec::new());
        self.state_tx.send_replace(ConnectionState::Closed);
        info!(chat_id = %self.chat_id, "session: closed");
    }
}

async fn next_event(events: &mut Option<ChannelEvents>) -> Option<ChannelEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn timer_fired(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
