//! Presence registry: who else is in the session, and in which colour.
//!
//! DESIGN
//! ======
//! The registry holds remote participants only. The local user is never
//! stored, so callers cannot render themselves as a remote peer.
//!
//! Entries are keyed by user ID. A repeated join replaces the entry, which
//! keeps the newest display name and colour. Removal of an unknown user is
//! a no-op. Every change that actually alters the set fires the presence
//! callback with a fresh snapshot ordered by user ID.
//!
//! COLOUR ASSIGNMENT
//! =================
//! The local colour is the first palette entry not already claimed by a
//! known participant (case-insensitive). With the palette exhausted, a
//! random palette entry is reused. Assignment happens once per session;
//! peers joining later do not cause a re-pick.

use std::collections::BTreeMap;

use rand::Rng;
use serde::Serialize;
use tracing::debug;

use crate::callback::CallbackSlot;
use crate::envelope::ActionEnvelope;

/// Fixed palette of eight distinct participant colours.
pub const PALETTE: [&str; 8] = [
    "#3B82F6", "#EF4444", "#10B981", "#F59E0B", "#8B5CF6", "#EC4899", "#06B6D4", "#F97316",
];

/// A remote collaborator currently believed present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub display_name: String,
    pub color: String,
    pub last_announced_at: i64,
}

impl Participant {
    #[must_use]
    pub fn from_envelope(envelope: &ActionEnvelope) -> Self {
        Self {
            user_id: envelope.origin_user_id.clone(),
            display_name: envelope.origin_user_name.clone(),
            color: envelope.origin_color.clone(),
            last_announced_at: envelope.timestamp_millis,
        }
    }
}

pub struct PresenceRegistry {
    local_user_id: String,
    participants: BTreeMap<String, Participant>,
    on_change: CallbackSlot<Vec<Participant>>,
}

impl PresenceRegistry {
    #[must_use]
    pub fn new(local_user_id: impl Into<String>, on_change: CallbackSlot<Vec<Participant>>) -> Self {
        Self { local_user_id: local_user_id.into(), participants: BTreeMap::new(), on_change }
    }

    /// Insert or replace a remote participant and return the updated set.
    /// The local user is ignored and does not notify.
    pub fn upsert_on_join(&mut self, participant: Participant) -> Vec<Participant> {
        if participant.user_id == self.local_user_id {
            return self.snapshot();
        }
        debug!(user_id = %participant.user_id, color = %participant.color, "presence: join");
        self.participants
            .insert(participant.user_id.clone(), participant);
        let snapshot = self.snapshot();
        self.on_change.fire(&snapshot);
        snapshot
    }

    /// Drop a participant and return the updated set. Unknown users are a
    /// silent no-op.
    pub fn remove_on_leave(&mut self, user_id: &str) -> Vec<Participant> {
        if self.participants.remove(user_id).is_none() {
            return self.snapshot();
        }
        debug!(user_id, "presence: leave");
        let snapshot = self.snapshot();
        self.on_change.fire(&snapshot);
        snapshot
    }

    #[must_use]
    pub fn contains(&self, user_id: &str) -> bool {
        self.participants.contains_key(user_id)
    }

    /// Participants ordered by user ID.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Participant> {
        self.participants.values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Forget everyone without notifying. Used on teardown.
    pub fn clear(&mut self) {
        self.participants.clear();
    }

    /// Pick a colour for the local user from the palette.
    #[must_use]
    pub fn assign_color(&self) -> String {
        pick_color(self.participants.values().map(|p| p.color.as_str()))
    }
}

/// First palette entry not in `taken`, else a random palette entry.
pub fn pick_color<'a>(taken: impl IntoIterator<Item = &'a str>) -> String {
    let taken: Vec<String> = taken.into_iter().map(str::to_ascii_uppercase).collect();
    if let Some(free) = PALETTE
        .iter()
        .find(|c| !taken.iter().any(|t| t.as_str() == **c))
    {
        return (*free).to_owned();
    }
    let idx = rand::rng().random_range(0..PALETTE.len());
    PALETTE[idx].to_owned()
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
