//! Question-set interaction flow: one question at a time, compiled answer.

use std::time::Duration;

use thread_relay::child::{ChildEvent, ContentBlock};
use thread_relay::emoji::ReactionKind;
use thread_relay::session::runtime::SessionOp;

use super::test_helpers::{spawn_immediate, user, wait_until};

fn question_event() -> ChildEvent {
    ChildEvent::Assistant {
        blocks: vec![ContentBlock::ToolUse {
            id: "q1".into(),
            name: "AskUserQuestion".into(),
            input: serde_json::json!({
                "questions": [
                    {
                        "header": "Color",
                        "question": "Which color?",
                        "options": [
                            {"label": "Red", "description": "warm"},
                            {"label": "Blue", "description": "cool"},
                        ],
                    },
                    {
                        "header": "Size",
                        "question": "Which size?",
                        "options": [
                            {"label": "S", "description": ""},
                            {"label": "M", "description": ""},
                            {"label": "L", "description": ""},
                        ],
                    },
                ],
            }),
        }],
    }
}

#[tokio::test]
async fn two_question_flow_compiles_answers() {
    let temp = tempfile::tempdir().expect("tempdir");
    let fixture = spawn_immediate("pick options", temp.path()).await;

    let sender = fixture.launcher.last_sender().expect("sender");
    sender.send(question_event()).await.expect("send");

    // First question posts with one reaction per option.
    let adapter = fixture.adapter.clone();
    assert!(
        wait_until(Duration::from_secs(2), || adapter.find_message("Color").is_some()).await
    );
    let first = fixture.adapter.find_message("Color").expect("first question");
    assert_eq!(first.reactions, vec!["one".to_owned(), "two".to_owned()]);
    assert!(first.message.contains("Which color?"));
    assert!(first.message.contains("Red"));
    assert!(first.message.contains("Blue"));

    // Answer "Blue".
    fixture
        .handle
        .ops
        .send(SessionOp::Reaction {
            kind: ReactionKind::Number(2),
            post_id: first.id.clone(),
            user: user("U1"),
        })
        .await
        .expect("send op");

    let adapter = fixture.adapter.clone();
    assert!(
        wait_until(Duration::from_secs(2), || {
            adapter.find_message("Color: Blue").is_some()
                && adapter.find_message("Which size?").is_some()
        })
        .await,
        "first answer recorded and second question posted"
    );
    let second = fixture.adapter.find_message("Which size?").expect("second question");
    assert_eq!(
        second.reactions,
        vec!["one".to_owned(), "two".to_owned(), "three".to_owned()]
    );

    // Answer "L"; the compiled answer reaches the child.
    fixture
        .handle
        .ops
        .send(SessionOp::Reaction {
            kind: ReactionKind::Number(3),
            post_id: second.id.clone(),
            user: user("U1"),
        })
        .await
        .expect("send op");

    let launcher = fixture.launcher.clone();
    assert!(
        wait_until(Duration::from_secs(2), move || {
            launcher.last_child().is_some_and(|c| {
                c.sent
                    .lock()
                    .expect("sent lock")
                    .iter()
                    .any(|m| m == "Here are my answers:\n- Color: Blue\n- Size: L")
            })
        })
        .await,
        "compiled answers must reach the child"
    );

    let state = fixture.handle.state.lock().await;
    assert!(state.pending_interaction.is_none());
}

#[tokio::test]
async fn out_of_range_option_is_ignored() {
    let temp = tempfile::tempdir().expect("tempdir");
    let fixture = spawn_immediate("pick options", temp.path()).await;

    let sender = fixture.launcher.last_sender().expect("sender");
    sender.send(question_event()).await.expect("send");

    let adapter = fixture.adapter.clone();
    assert!(
        wait_until(Duration::from_secs(2), || adapter.find_message("Color").is_some()).await
    );
    let first = fixture.adapter.find_message("Color").expect("first question");

    // Option four does not exist for a two-option question.
    fixture
        .handle
        .ops
        .send(SessionOp::Reaction {
            kind: ReactionKind::Number(4),
            post_id: first.id.clone(),
            user: user("U1"),
        })
        .await
        .expect("send op");

    tokio::time::sleep(Duration::from_millis(200)).await;
    let state = fixture.handle.state.lock().await;
    assert!(state.pending_interaction.is_some(), "the question must stay pending");
}
