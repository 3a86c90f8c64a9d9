use thread_relay::registry::{PostRegistry, PostRole};
use thread_relay::session::SessionKey;

fn key(thread: &str) -> SessionKey {
    SessionKey::new("slack", thread)
}

#[test]
fn register_and_lookup() {
    let registry = PostRegistry::new();
    registry.register("p1", "t1", key("t1"), PostRole::Content, None, None);

    assert!(registry.has("p1"));
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.thread_id("p1").as_deref(), Some("t1"));
    assert_eq!(registry.find_session("p1"), Some(key("t1")));
    let record = registry.get("p1").expect("record");
    assert_eq!(record.role, PostRole::Content);
}

#[test]
fn unregister_removes_both_indexes() {
    let registry = PostRegistry::new();
    registry.register("p1", "t1", key("t1"), PostRole::Content, None, None);

    assert!(registry.unregister("p1"));
    assert!(!registry.unregister("p1"), "second unregister is a no-op");
    assert!(registry.is_empty());
    assert!(registry.list_for_session(&key("t1")).is_empty());
}

#[test]
fn reregistering_moves_the_secondary_index() {
    let registry = PostRegistry::new();
    registry.register("p1", "t1", key("t1"), PostRole::Content, None, None);
    registry.register("p1", "t2", key("t2"), PostRole::System, None, None);

    assert_eq!(registry.len(), 1);
    assert!(registry.list_for_session(&key("t1")).is_empty());
    assert_eq!(registry.list_for_session(&key("t2")).len(), 1);
}

#[test]
fn list_by_role_filters() {
    let registry = PostRegistry::new();
    let session = key("t1");
    registry.register("p1", "t1", session.clone(), PostRole::Content, None, None);
    registry.register("p2", "t1", session.clone(), PostRole::SessionHeader, None, None);
    registry.register("p3", "t1", session.clone(), PostRole::Content, None, None);

    assert_eq!(registry.list_by_role(&session, PostRole::Content).len(), 2);
    assert_eq!(registry.list_by_role(&session, PostRole::SessionHeader).len(), 1);
    assert!(registry.list_by_role(&session, PostRole::Question).is_empty());
}

#[test]
fn clear_session_evicts_everything_for_that_session_only() {
    let registry = PostRegistry::new();
    registry.register("p1", "t1", key("t1"), PostRole::Content, None, None);
    registry.register("p2", "t1", key("t1"), PostRole::Lifecycle, None, None);
    registry.register("p3", "t2", key("t2"), PostRole::Content, None, None);

    assert_eq!(registry.clear_session(&key("t1")), 2);
    assert!(!registry.has("p1"));
    assert!(!registry.has("p2"));
    assert!(registry.has("p3"));
    assert_eq!(registry.clear_session(&key("t1")), 0);
}

#[test]
fn tool_use_id_is_retained() {
    let registry = PostRegistry::new();
    registry.register(
        "p1",
        "t1",
        key("t1"),
        PostRole::SubagentStatus,
        Some("tool-9".into()),
        None,
    );
    assert_eq!(registry.get("p1").expect("record").tool_use_id.as_deref(), Some("tool-9"));
}

#[test]
fn clear_drops_everything() {
    let registry = PostRegistry::new();
    registry.register("p1", "t1", key("t1"), PostRole::Content, None, None);
    registry.register("p2", "t2", key("t2"), PostRole::Content, None, None);
    registry.clear();
    assert!(registry.is_empty());
}
