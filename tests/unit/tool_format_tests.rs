use std::path::PathBuf;

use serde_json::json;
use thread_relay::format::tool_use::{
    format_tool_use, is_interactive_tool, is_side_channel_tool, parse_mcp_name, shorten_path,
    tool_result_line, PathContext,
};

fn ctx() -> PathContext {
    PathContext {
        home: Some(PathBuf::from("/home/sam")),
        worktree: None,
    }
}

#[test]
fn read_renders_with_document_icon_and_short_path() {
    let fragment = format_tool_use(
        "Read",
        &json!({"file_path": "/home/sam/project/src/main.rs"}),
        false,
        &ctx(),
    )
    .expect("fragment");
    assert_eq!(fragment, "\u{1f4c4} ~/project/src/main.rs");
}

#[test]
fn worktree_paths_shorten_to_branch_prefix() {
    let ctx = PathContext {
        home: Some(PathBuf::from("/home/sam")),
        worktree: Some((PathBuf::from("/home/sam/.wt/repo--fix"), "fix".into())),
    };
    assert_eq!(
        shorten_path("/home/sam/.wt/repo--fix/src/lib.rs", &ctx),
        "[fix]/src/lib.rs"
    );
    // Outside the worktree, home shortening still applies.
    assert_eq!(shorten_path("/home/sam/notes.md", &ctx), "~/notes.md");
    assert_eq!(shorten_path("/etc/hosts", &ctx), "/etc/hosts");
}

#[test]
fn bash_commands_are_truncated() {
    let long_command = "cargo build ".repeat(30);
    let fragment =
        format_tool_use("Bash", &json!({"command": long_command}), false, &ctx()).expect("fragment");
    assert!(fragment.starts_with("\u{1f4bb} `"));
    assert!(fragment.ends_with("\u{2026}`"));
    assert!(fragment.len() < 120);
}

#[test]
fn edit_detailed_mode_renders_a_diff() {
    let input = json!({
        "file_path": "/home/sam/x.rs",
        "old_string": "let a = 1;",
        "new_string": "let a = 2;",
    });
    let fragment = format_tool_use("Edit", &input, true, &ctx()).expect("fragment");
    assert!(fragment.contains("```diff"));
    assert!(fragment.contains("-let a = 1;"));
    assert!(fragment.contains("+let a = 2;"));

    let plain = format_tool_use("Edit", &input, false, &ctx()).expect("fragment");
    assert!(!plain.contains("```"));
}

#[test]
fn search_tools_render_their_patterns() {
    assert_eq!(
        format_tool_use("Glob", &json!({"pattern": "**/*.rs"}), false, &ctx()).expect("fragment"),
        "\u{1f50d} **/*.rs"
    );
    assert_eq!(
        format_tool_use("Grep", &json!({"pattern": "fn main"}), false, &ctx()).expect("fragment"),
        "\u{1f50e} fn main"
    );
}

#[test]
fn diverted_tools_render_nothing() {
    for name in ["ExitPlanMode", "AskUserQuestion", "TodoWrite", "Task"] {
        assert!(format_tool_use(name, &json!({}), false, &ctx()).is_none(), "{name}");
    }
    assert!(is_interactive_tool("ExitPlanMode"));
    assert!(is_interactive_tool("AskUserQuestion"));
    assert!(is_side_channel_tool("TodoWrite"));
    assert!(is_side_channel_tool("Task"));
    assert!(!is_interactive_tool("Read"));
}

#[test]
fn unknown_tools_render_generically() {
    assert_eq!(
        format_tool_use("Frobnicate", &json!({}), false, &ctx()).expect("fragment"),
        "\u{25cf} Frobnicate"
    );
}

#[test]
fn mcp_names_parse_into_server_and_tool() {
    assert_eq!(parse_mcp_name("mcp__github__create_issue"), Some(("github", "create_issue")));
    assert_eq!(parse_mcp_name("mcp__x__"), None);
    assert_eq!(parse_mcp_name("Read"), None);
    assert_eq!(parse_mcp_name("mcp__solo"), None);
}

#[test]
fn mcp_tools_render_with_plug_icon() {
    let fragment = format_tool_use("mcp__github__create_issue", &json!({}), false, &ctx())
        .expect("fragment");
    assert_eq!(fragment, "\u{1f50c} create_issue (github)");
}

#[test]
fn tool_result_lines_match_the_breaker_marker() {
    let ok = tool_result_line(true, "done");
    let err = tool_result_line(false, "failed");
    assert!(ok.starts_with("  \u{21b3} \u{2713}"));
    assert!(err.starts_with("  \u{21b3} \u{274c}"));
}

#[test]
fn enter_plan_mode_renders_planning() {
    assert_eq!(
        format_tool_use("EnterPlanMode", &json!({}), false, &ctx()).expect("fragment"),
        "\u{1f4cb} Planning\u{2026}"
    );
}
