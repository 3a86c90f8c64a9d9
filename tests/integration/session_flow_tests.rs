//! Session runtime flows: timeout, interrupt, permissions, message approval.

use std::sync::atomic::Ordering;
use std::time::Duration;

use thread_relay::child::ChildEvent;
use thread_relay::commands::{CommandAction, Issuer};
use thread_relay::emoji::ReactionKind;
use thread_relay::session::runtime::{SessionNotice, SessionOp};
use thread_relay::session::LifecycleState;

use super::test_helpers::{spawn_immediate, user, wait_until};

#[tokio::test]
async fn timeout_pauses_the_session_and_stops_the_child() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut fixture = spawn_immediate("long task", temp.path()).await;

    fixture.handle.ops.send(SessionOp::Timeout).await.expect("send op");

    let notice = tokio::time::timeout(Duration::from_secs(2), fixture.notices.recv())
        .await
        .expect("notice in time");
    let mut saw_paused = false;
    let mut notice = notice;
    // Persist notices may interleave; scan until the pause arrives.
    for _ in 0..10 {
        match notice {
            Some(SessionNotice::Paused { ref key }) => {
                assert_eq!(*key, fixture.key);
                saw_paused = true;
                break;
            }
            Some(_) => {
                notice = tokio::time::timeout(Duration::from_secs(2), fixture.notices.recv())
                    .await
                    .expect("notice in time");
            }
            None => break,
        }
    }
    assert!(saw_paused, "pause notice must arrive");

    assert!(fixture.adapter.find_message("timed out").is_some());
    let child = fixture.launcher.last_child().expect("child");
    assert!(!child.running.load(Ordering::SeqCst), "child must stop on pause");

    let state = fixture.handle.state.lock().await;
    assert_eq!(state.lifecycle, LifecycleState::Paused);
}

#[tokio::test]
async fn escape_interrupts_without_ending_the_session() {
    let temp = tempfile::tempdir().expect("tempdir");
    let fixture = spawn_immediate("task", temp.path()).await;

    fixture
        .handle
        .ops
        .send(SessionOp::Command {
            action: CommandAction::Escape,
            user: user("U1"),
            issuer: Issuer::User,
        })
        .await
        .expect("send op");

    let launcher = fixture.launcher.clone();
    assert!(
        wait_until(Duration::from_secs(2), move || {
            launcher
                .last_child()
                .is_some_and(|c| c.interrupts.load(Ordering::SeqCst) == 1)
        })
        .await
    );

    let child = fixture.launcher.last_child().expect("child");
    assert!(child.running.load(Ordering::SeqCst), "escape keeps the child alive");
    let state = fixture.handle.state.lock().await;
    assert_eq!(state.lifecycle, LifecycleState::Active);
}

#[tokio::test]
async fn permission_request_flow_delivers_the_decision() {
    let temp = tempfile::tempdir().expect("tempdir");
    let fixture = spawn_immediate("task", temp.path()).await;

    let sender = fixture.launcher.last_sender().expect("sender");
    sender
        .send(ChildEvent::PermissionRequest {
            request_id: "r1".into(),
            description: "run `rm -r build`".into(),
        })
        .await
        .expect("send");

    let adapter = fixture.adapter.clone();
    assert!(
        wait_until(Duration::from_secs(2), || {
            adapter.find_message("Permission request").is_some()
        })
        .await
    );
    let prompt = fixture.adapter.find_message("Permission request").expect("prompt");
    assert_eq!(
        prompt.reactions,
        vec!["+1".to_owned(), "white_check_mark".to_owned(), "-1".to_owned()]
    );

    fixture
        .handle
        .ops
        .send(SessionOp::Reaction {
            kind: ReactionKind::AllowAll,
            post_id: prompt.id,
            user: user("U1"),
        })
        .await
        .expect("send op");

    let launcher = fixture.launcher.clone();
    assert!(
        wait_until(Duration::from_secs(2), move || {
            launcher.last_child().is_some_and(|c| {
                c.permission_replies.lock().expect("lock").contains(&("r1".to_owned(), true))
            })
        })
        .await
    );

    // Allow-all flips the session to skip further prompts.
    let state = fixture.handle.state.lock().await;
    assert!(state.skip_permissions);
}

#[tokio::test]
async fn unauthorized_message_opens_approval_and_invite_adds_the_user() {
    let temp = tempfile::tempdir().expect("tempdir");
    let fixture = spawn_immediate("task", temp.path()).await;

    fixture
        .handle
        .ops
        .send(SessionOp::UnauthorizedMessage {
            text: "can I help?".into(),
            user: user("U9"),
        })
        .await
        .expect("send op");

    let adapter = fixture.adapter.clone();
    assert!(
        wait_until(Duration::from_secs(2), || {
            adapter.find_message("wrote in this session thread").is_some()
        })
        .await
    );
    let prompt = fixture
        .adapter
        .find_message("wrote in this session thread")
        .expect("prompt");

    // Invite: add them and forward the message once.
    fixture
        .handle
        .ops
        .send(SessionOp::Reaction {
            kind: ReactionKind::AllowAll,
            post_id: prompt.id,
            user: user("U1"),
        })
        .await
        .expect("send op");

    let launcher = fixture.launcher.clone();
    assert!(
        wait_until(Duration::from_secs(2), move || {
            launcher.last_child().is_some_and(|c| {
                c.sent.lock().expect("lock").iter().any(|m| m == "can I help?")
            })
        })
        .await
    );

    let state = fixture.handle.state.lock().await;
    assert!(state.is_session_user("U9"), "invite must persist on the session");
}

#[tokio::test]
async fn child_crash_ends_the_session_with_an_error_post() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut fixture = spawn_immediate("task", temp.path()).await;

    let sender = fixture.launcher.last_sender().expect("sender");
    sender.send(ChildEvent::Exit { code: Some(3) }).await.expect("send");

    let mut saw_ended = false;
    for _ in 0..10 {
        match tokio::time::timeout(Duration::from_secs(2), fixture.notices.recv()).await {
            Ok(Some(SessionNotice::Ended { key })) => {
                assert_eq!(key, fixture.key);
                saw_ended = true;
                break;
            }
            Ok(Some(_)) => {}
            _ => break,
        }
    }
    assert!(saw_ended, "crash must end the session");
    assert!(fixture.adapter.find_message("exited unexpectedly").is_some());

    // Property: a finished session leaves no registry entries.
    assert!(fixture.registry.list_for_session(&fixture.key).is_empty());
}

#[tokio::test]
async fn stop_command_ends_the_session_and_clears_the_registry() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut fixture = spawn_immediate("task", temp.path()).await;

    fixture
        .handle
        .ops
        .send(SessionOp::Command {
            action: CommandAction::Stop,
            user: user("U1"),
            issuer: Issuer::User,
        })
        .await
        .expect("send op");

    let mut saw_ended = false;
    for _ in 0..10 {
        match tokio::time::timeout(Duration::from_secs(2), fixture.notices.recv()).await {
            Ok(Some(SessionNotice::Ended { .. })) => {
                saw_ended = true;
                break;
            }
            Ok(Some(_)) => {}
            _ => break,
        }
    }
    assert!(saw_ended);
    assert!(fixture.adapter.find_message("Session ended").is_some());
    assert!(fixture.registry.list_for_session(&fixture.key).is_empty());

    let child = fixture.launcher.last_child().expect("child");
    assert!(!child.running.load(Ordering::SeqCst));
}
