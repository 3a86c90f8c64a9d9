use std::path::PathBuf;

use thread_relay::config::WorktreeMode;
use thread_relay::persistence::PersistedLifecycle;
use thread_relay::platform::ThreadRef;
use thread_relay::session::{LifecycleState, SessionKey, SessionState};

fn new_state() -> SessionState {
    SessionState::new(
        SessionKey::new("slack", "C1|100.1"),
        ThreadRef { channel_id: "C1".into(), root_id: "100.1".into() },
        "U1",
        PathBuf::from("/tmp"),
        WorktreeMode::Prompt,
        false,
    )
}

#[test]
fn valid_lifecycle_transitions() {
    assert!(LifecycleState::Active.can_transition_to(LifecycleState::Restarting));
    assert!(LifecycleState::Active.can_transition_to(LifecycleState::Paused));
    assert!(LifecycleState::Restarting.can_transition_to(LifecycleState::Active));
    assert!(LifecycleState::Paused.can_transition_to(LifecycleState::Active));
    assert!(LifecycleState::Ending.can_transition_to(LifecycleState::Ended));
}

#[test]
fn invalid_lifecycle_transitions() {
    assert!(!LifecycleState::Ended.can_transition_to(LifecycleState::Active));
    assert!(!LifecycleState::Paused.can_transition_to(LifecycleState::Restarting));
    assert!(!LifecycleState::Active.can_transition_to(LifecycleState::Ended));
}

#[test]
fn only_active_and_restarting_count_as_in_thread() {
    assert!(LifecycleState::Active.is_in_thread());
    assert!(LifecycleState::Restarting.is_in_thread());
    assert!(!LifecycleState::Paused.is_in_thread());
    assert!(!LifecycleState::Ending.is_in_thread());
    assert!(!LifecycleState::Ended.is_in_thread());
}

#[test]
fn transition_to_rejects_invalid_moves() {
    let mut state = new_state();
    assert!(state.transition_to(LifecycleState::Paused));
    assert!(!state.transition_to(LifecycleState::Restarting));
    assert_eq!(state.lifecycle, LifecycleState::Paused);
}

#[test]
fn owner_is_always_a_session_user() {
    let state = new_state();
    assert!(state.is_session_user("U1"));
    assert!(!state.is_session_user("U2"));
}

#[test]
fn title_is_set_once_from_first_nonempty_line() {
    let mut state = new_state();
    state.maybe_set_title("\n\nFixing the login bug\nmore detail");
    assert_eq!(state.session_title.as_deref(), Some("Fixing the login bug"));

    state.maybe_set_title("A different title");
    assert_eq!(state.session_title.as_deref(), Some("Fixing the login bug"));
}

#[test]
fn title_is_capped_at_eighty_chars() {
    let mut state = new_state();
    state.maybe_set_title(&"x".repeat(200));
    assert_eq!(state.session_title.as_ref().map(String::len), Some(80));
}

#[test]
fn recent_events_ring_buffer_caps_at_fifty() {
    let mut state = new_state();
    for i in 0..60 {
        state.record_event(format!("event {i}"));
    }
    assert_eq!(state.recent_events.len(), 50);
    assert_eq!(state.recent_events.front().map(String::as_str), Some("event 10"));
}

#[test]
fn persisted_round_trip_preserves_identity_and_allow_list() {
    let mut state = new_state();
    state.allowed_users.insert("U2".into());
    state.plan_approved = true;
    state.child_session_id = Some("cs-1".into());
    state.session_start_post_id = Some("C1|100.1".into());
    state.message_count = 7;

    let record = state.to_persisted();
    assert_eq!(record.platform_id, "slack");
    assert_eq!(record.lifecycle_state, PersistedLifecycle::Active);
    assert!(record.allowed_users.contains(&"U2".to_owned()));

    let revived = SessionState::from_persisted(&record, WorktreeMode::Prompt);
    assert_eq!(revived.key, state.key);
    assert_eq!(revived.lifecycle, LifecycleState::Paused);
    assert!(revived.plan_approved);
    assert_eq!(revived.child_session_id.as_deref(), Some("cs-1"));
    assert_eq!(revived.message_count, 7);
    assert!(revived.is_session_user("U2"));
    assert!(revived.is_session_user("U1"));
}

#[test]
fn paused_sessions_persist_as_paused() {
    let mut state = new_state();
    state.transition_to(LifecycleState::Paused);
    assert_eq!(state.to_persisted().lifecycle_state, PersistedLifecycle::Paused);
}
