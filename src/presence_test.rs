use super::*;
use std::sync::{Arc, Mutex};

fn participant(user_id: &str, color: &str) -> Participant {
    Participant { user_id: user_id.into(), display_name: format!("{user_id}-name"), color: color.into(), last_announced_at: 1 }
}

fn registry_with_log(local: &str) -> (PresenceRegistry, Arc<Mutex<Vec<Vec<String>>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let slot = CallbackSlot::new();
    let sink = Arc::clone(&log);
    slot.set(move |ps: &Vec<Participant>| {
        sink.lock()
            .unwrap()
            .push(ps.iter().map(|p| p.user_id.clone()).collect());
    });
    (PresenceRegistry::new(local, slot), log)
}

// =============================================================================
// JOIN / LEAVE
// =============================================================================

#[test]
fn join_adds_and_notifies() {
    let (mut reg, log) = registry_with_log("me");
    let set = reg.upsert_on_join(participant("u2", "#3B82F6"));
    assert_eq!(set, vec![participant("u2", "#3B82F6")]);
    assert!(reg.contains("u2"));
    assert_eq!(*log.lock().unwrap(), vec![vec!["u2".to_owned()]]);
}

#[test]
fn join_of_local_user_is_ignored() {
    let (mut reg, log) = registry_with_log("me");
    assert!(reg.upsert_on_join(participant("me", "#3B82F6")).is_empty());
    assert!(reg.is_empty());
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn repeated_join_replaces_entry() {
    let (mut reg, _log) = registry_with_log("me");
    reg.upsert_on_join(participant("u2", "#3B82F6"));
    let mut renamed = participant("u2", "#EF4444");
    renamed.display_name = "Bob".into();
    let snap = reg.upsert_on_join(renamed);

    assert_eq!(snap.len(), 1);
    assert_eq!(snap[0].display_name, "Bob");
    assert_eq!(snap[0].color, "#EF4444");
}

#[test]
fn leave_removes_and_notifies_once() {
    let (mut reg, log) = registry_with_log("me");
    reg.upsert_on_join(participant("u2", "#3B82F6"));
    assert!(reg.remove_on_leave("u2").is_empty());
    assert!(reg.remove_on_leave("u2").is_empty());
    assert_eq!(log.lock().unwrap().len(), 2);
    assert_eq!(log.lock().unwrap()[1], Vec::<String>::new());
}

#[test]
fn leave_of_unknown_user_is_silent() {
    let (mut reg, log) = registry_with_log("me");
    reg.upsert_on_join(participant("u2", "#3B82F6"));
    let set = reg.remove_on_leave("ghost");
    assert_eq!(set.len(), 1);
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[test]
fn snapshot_is_ordered_by_user_id() {
    let (mut reg, _log) = registry_with_log("me");
    reg.upsert_on_join(participant("zed", "#3B82F6"));
    reg.upsert_on_join(participant("amy", "#EF4444"));
    let ids: Vec<_> = reg.snapshot().into_iter().map(|p| p.user_id).collect();
    assert_eq!(ids, vec!["amy", "zed"]);
}

#[test]
fn clear_does_not_notify() {
    let (mut reg, log) = registry_with_log("me");
    reg.upsert_on_join(participant("u2", "#3B82F6"));
    reg.clear();
    assert!(reg.is_empty());
    assert_eq!(log.lock().unwrap().len(), 1);
}

// =============================================================================
// COLOUR
// =============================================================================

#[test]
fn empty_session_gets_first_palette_colour() {
    let (reg, _log) = registry_with_log("me");
    assert_eq!(reg.assign_color(), "#3B82F6");
}

#[test]
fn taken_colours_are_skipped_case_insensitively() {
    let (mut reg, _log) = registry_with_log("me");
    reg.upsert_on_join(participant("u2", "#3b82f6"));
    reg.upsert_on_join(participant("u3", "#EF4444"));
    assert_eq!(reg.assign_color(), "#10B981");
}

#[test]
fn exhausted_palette_reuses_a_palette_colour() {
    let color = pick_color(PALETTE);
    assert!(PALETTE.contains(&color.as_str()));
}

#[test]
fn foreign_colours_do_not_block_palette() {
    assert_eq!(pick_color(["#000000", "#FFFFFF"]), "#3B82F6");
}

#[test]
fn participant_from_envelope_copies_origin() {
    use crate::envelope::{ActionKind, Origin};
    let origin = Origin { user_id: "u9".into(), user_name: "Nia".into(), color: "#F97316".into() };
    let env = ActionEnvelope::presence(ActionKind::UserJoin, &origin, 42);
    let p = Participant::from_envelope(&env);
    assert_eq!(p, Participant { user_id: "u9".into(), display_name: "Nia".into(), color: "#F97316".into(), last_announced_at: 42 });
}

#[test]
fn colours_stay_distinct_up_to_palette_size() {
    let (mut reg, _log) = registry_with_log("observer");
    let mut assigned = Vec::new();
    for i in 0..PALETTE.len() {
        let color = reg.assign_color();
        assert!(!assigned.contains(&color), "colour {color} reused at join {i}");
        reg.upsert_on_join(participant(&format!("u{i}"), &color));
        assigned.push(color);
    }

    // One past capacity still yields a palette colour.
    assert!(PALETTE.contains(&reg.assign_color().as_str()));
}
