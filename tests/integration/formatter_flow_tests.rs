//! Streaming formatter flows over the mock adapter.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use thread_relay::breaker::{code_block_state_at, estimate_rendered_height};
use thread_relay::child::ContentBlock;
use thread_relay::format::{FormatterConfig, StreamingFormatter};
use thread_relay::format::tool_use::PathContext;
use thread_relay::platform::{PlatformAdapter, ThreadRef};
use thread_relay::registry::PostRegistry;
use thread_relay::session::SessionKey;

use super::test_helpers::MockAdapter;

fn setup() -> (StreamingFormatter, Arc<MockAdapter>, Arc<PostRegistry>, SessionKey, ThreadRef) {
    let formatter = StreamingFormatter::new(FormatterConfig::default(), PathContext::default());
    let adapter = MockAdapter::new(&["U1"]);
    let registry = Arc::new(PostRegistry::new());
    let thread = ThreadRef { channel_id: "C1".into(), root_id: "r1".into() };
    let key = SessionKey::new("mock", thread.encode());
    (formatter, adapter, registry, key, thread)
}

fn big_streamed_text() -> String {
    let mut text = String::new();
    for section in 0..3 {
        text.push_str(&format!("## Part {section}\n"));
        for line in 0..40 {
            text.push_str(&format!(
                "Section {section} line {line}: the quick brown fox jumps over the lazy dog.\n"
            ));
        }
        text.push_str("```rust\n");
        for line in 0..10 {
            text.push_str(&format!("let v{line} = {line};\n"));
        }
        text.push_str("```\n\n");
        if section == 2 {
            break;
        }
    }
    assert!(text.len() > 8000);
    text
}

#[tokio::test]
async fn oversized_assistant_text_splits_cleanly() {
    let (mut formatter, adapter, registry, key, thread) = setup();

    let blocks = vec![ContentBlock::Text { text: big_streamed_text() }];
    let outcome = formatter.prepare_assistant(&blocks);
    assert!(!outcome.suppressed);
    for fragment in outcome.fragments {
        formatter.append(&fragment);
    }
    formatter
        .flush(adapter.as_ref(), &registry, &key, &thread)
        .await
        .expect("flush");

    let posts = adapter.recorded();
    assert!(posts.len() >= 2, "large content must span multiple posts");
    for post in &posts {
        let state = code_block_state_at(&post.message, post.message.len());
        assert!(!state.inside_open, "no post may end inside an open fence");
        assert!(
            estimate_rendered_height(&post.message) < 500
                || !post.message.contains('\n'),
            "posts must stay under the height cap"
        );
        assert!(registry.has(&post.id), "every post must be registered");
        assert_eq!(registry.find_session(&post.id), Some(key.clone()));
    }
}

#[tokio::test]
async fn small_appends_update_the_open_post_in_place() {
    let (mut formatter, adapter, registry, key, thread) = setup();

    formatter.append("first line");
    formatter
        .flush(adapter.as_ref(), &registry, &key, &thread)
        .await
        .expect("flush");
    assert_eq!(adapter.recorded().len(), 1);

    formatter.append("second line");
    formatter
        .flush(adapter.as_ref(), &registry, &key, &thread)
        .await
        .expect("flush");

    let posts = adapter.recorded();
    assert_eq!(posts.len(), 1, "second flush should update in place");
    assert!(posts[0].message.contains("first line"));
    assert!(posts[0].message.contains("second line"));
}

#[tokio::test]
async fn result_event_ends_the_turn_and_next_flush_starts_fresh() {
    let (mut formatter, adapter, registry, key, thread) = setup();

    formatter.append("turn one");
    formatter
        .flush(adapter.as_ref(), &registry, &key, &thread)
        .await
        .expect("flush");
    formatter.end_turn();

    formatter.append("turn two");
    formatter
        .flush(adapter.as_ref(), &registry, &key, &thread)
        .await
        .expect("flush");

    let posts = adapter.recorded();
    assert_eq!(posts.len(), 2);
    assert!(posts[1].message.contains("turn two"));
    assert!(!posts[1].message.contains("turn one"));
}

#[tokio::test]
async fn failed_update_falls_back_to_a_new_post() {
    let (mut formatter, adapter, registry, key, thread) = setup();

    formatter.append("first");
    formatter
        .flush(adapter.as_ref(), &registry, &key, &thread)
        .await
        .expect("flush");

    adapter.fail_updates.store(true, Ordering::SeqCst);
    formatter.append("after failure");
    formatter
        .flush(adapter.as_ref(), &registry, &key, &thread)
        .await
        .expect("flush");

    let posts = adapter.recorded();
    assert_eq!(posts.len(), 2, "update failure must fall back to a create");
    assert!(posts[1].message.contains("after failure"));
}

#[tokio::test]
async fn open_fence_is_force_closed_and_reopened() {
    let (mut formatter, adapter, registry, key, thread) = setup();

    // Enough code to trip the early-flush thresholds mid-block.
    let mut fragment = String::from("```python\n");
    for line in 0..20 {
        fragment.push_str(&format!("value_{line} = compute({line})\n"));
    }
    formatter.append(&fragment);
    formatter
        .flush(adapter.as_ref(), &registry, &key, &thread)
        .await
        .expect("flush");

    let posts = adapter.recorded();
    let first = &posts[0];
    assert!(
        !code_block_state_at(&first.message, first.message.len()).inside_open,
        "flushed post must close its fence"
    );

    // The continuation reopens with the preserved language.
    formatter.append("more = compute(21)\n```\n");
    formatter
        .flush(adapter.as_ref(), &registry, &key, &thread)
        .await
        .expect("flush");

    let posts = adapter.recorded();
    let continued = posts
        .iter()
        .find(|p| p.message.contains("more = compute(21)"))
        .expect("continuation post");
    assert!(
        continued.message.contains("```python"),
        "continuation must reopen the fence with its language"
    );
}

#[tokio::test]
async fn interactive_tools_suppress_the_whole_event() {
    let (formatter, _adapter, _registry, _key, _thread) = setup();

    let blocks = vec![
        ContentBlock::Text { text: "about to plan".into() },
        ContentBlock::ToolUse {
            id: "t1".into(),
            name: "ExitPlanMode".into(),
            input: serde_json::json!({"plan": "do things"}),
        },
    ];
    let outcome = formatter.prepare_assistant(&blocks);
    assert!(outcome.suppressed);
    assert!(outcome.fragments.is_empty());
    assert_eq!(outcome.diversions.len(), 1);
}

#[tokio::test]
async fn side_channel_tools_do_not_suppress_text() {
    let (formatter, _adapter, _registry, _key, _thread) = setup();

    let blocks = vec![
        ContentBlock::Text { text: "progress update".into() },
        ContentBlock::ToolUse {
            id: "t2".into(),
            name: "TodoWrite".into(),
            input: serde_json::json!({"todos": []}),
        },
    ];
    let outcome = formatter.prepare_assistant(&blocks);
    assert!(!outcome.suppressed);
    assert_eq!(outcome.fragments, vec!["progress update".to_owned()]);
    assert_eq!(outcome.diversions.len(), 1);
}

#[tokio::test]
async fn thinking_blocks_render_as_short_italic_previews() {
    let (formatter, _adapter, _registry, _key, _thread) = setup();

    let long_thought = "consider ".repeat(40);
    let blocks = vec![ContentBlock::Thinking { thinking: long_thought }];
    let outcome = formatter.prepare_assistant(&blocks);
    let fragment = &outcome.fragments[0];
    assert!(fragment.starts_with('_') && fragment.ends_with('_'));
    assert!(fragment.chars().count() < 120);
}

#[tokio::test]
async fn debounce_deadline_arms_on_append() {
    let (mut formatter, _adapter, _registry, _key, _thread) = setup();
    assert!(formatter.flush_deadline().is_none());
    formatter.append("text");
    let deadline = formatter.flush_deadline().expect("armed");
    assert!(deadline <= tokio::time::Instant::now() + Duration::from_millis(600));
}
