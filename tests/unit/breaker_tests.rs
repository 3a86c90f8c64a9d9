use thread_relay::breaker::{
    code_block_state_at, estimate_rendered_height, find_logical_breakpoint, should_flush_early,
    split_for_height, BreakLimits, BreakpointKind, DEFAULT_LOOK_AHEAD,
};

fn limits() -> BreakLimits {
    BreakLimits::default()
}

#[test]
fn code_block_state_outside_any_fence() {
    let content = "plain text\nmore text\n";
    let state = code_block_state_at(content, content.len());
    assert!(!state.inside_open);
    assert!(state.language.is_none());
}

#[test]
fn code_block_state_inside_open_fence() {
    let content = "before\n```rust\nlet x = 1;\n";
    let state = code_block_state_at(content, content.len());
    assert!(state.inside_open);
    assert_eq!(state.language.as_deref(), Some("rust"));
    assert_eq!(state.open_pos, Some(7));
}

#[test]
fn code_block_state_after_closed_fence() {
    let content = "```\ncode\n```\nafter\n";
    let state = code_block_state_at(content, content.len());
    assert!(!state.inside_open);
}

#[test]
fn fence_without_language_has_no_language() {
    let content = "```\ncode\n";
    let state = code_block_state_at(content, content.len());
    assert!(state.inside_open);
    assert!(state.language.is_none());
}

#[test]
fn breakpoint_prefers_tool_marker_over_heading() {
    let content = "intro\n  \u{21b3} \u{2713} done\n## Heading\nbody\n";
    let bp = find_logical_breakpoint(content, 0, DEFAULT_LOOK_AHEAD).expect("breakpoint");
    assert_eq!(bp.kind, BreakpointKind::ToolMarker);
    assert!(content[..bp.pos].ends_with("done\n"));
}

#[test]
fn breakpoint_prefers_heading_over_paragraph() {
    let content = "intro text\n\nmore text\n## Section\nbody\n";
    let bp = find_logical_breakpoint(content, 0, DEFAULT_LOOK_AHEAD).expect("breakpoint");
    assert_eq!(bp.kind, BreakpointKind::Heading);
    assert!(content[bp.pos..].starts_with("## Section"));
}

#[test]
fn breakpoint_falls_back_to_paragraph_then_line() {
    let content = "first paragraph\n\nsecond paragraph\n";
    let bp = find_logical_breakpoint(content, 0, DEFAULT_LOOK_AHEAD).expect("breakpoint");
    assert_eq!(bp.kind, BreakpointKind::Paragraph);

    let content = "one line\nanother line\n";
    let bp = find_logical_breakpoint(content, 0, DEFAULT_LOOK_AHEAD).expect("breakpoint");
    assert_eq!(bp.kind, BreakpointKind::Line);
}

#[test]
fn breakpoint_never_lands_inside_open_fence() {
    // The heading is inside the code block, so it must be vetoed.
    let content = "```\n## not a heading\ncode\n```\ntail\n";
    let bp = find_logical_breakpoint(content, 0, DEFAULT_LOOK_AHEAD).expect("breakpoint");
    let state = code_block_state_at(content, bp.pos);
    assert!(!state.inside_open);
}

#[test]
fn inside_fence_only_breaks_after_closing_marker() {
    let content = "```rust\nlet a = 1;\nlet b = 2;\n```\nafter\n";
    // Start inside the block.
    let bp = find_logical_breakpoint(content, 10, DEFAULT_LOOK_AHEAD).expect("breakpoint");
    assert_eq!(bp.kind, BreakpointKind::CodeBlockEnd);
    assert!(content[..bp.pos].ends_with("```\n"));
}

#[test]
fn inside_fence_with_no_close_returns_none() {
    let content = "```rust\nlet a = 1;\nstill open\n";
    assert!(find_logical_breakpoint(content, 10, DEFAULT_LOOK_AHEAD).is_none());
}

#[test]
fn should_flush_early_on_byte_count() {
    let content = "x".repeat(2000);
    assert!(should_flush_early(&content, &limits()));
    assert!(!should_flush_early("short", &limits()));
}

#[test]
fn should_flush_early_on_line_count() {
    let content = "line\n".repeat(15);
    assert!(should_flush_early(&content, &limits()));
}

#[test]
fn height_counts_code_blocks_and_text() {
    let code = "```\none\ntwo\nthree\n```";
    let code_height = estimate_rendered_height(code);
    assert!(code_height > 0);

    let text = "hello world";
    assert!(estimate_rendered_height(text) < code_height);
}

#[test]
fn height_wraps_long_lines() {
    let short = estimate_rendered_height("word");
    let long = estimate_rendered_height(&"word ".repeat(60));
    assert!(long >= short * 3);
}

#[test]
fn height_blank_lines_are_cheap() {
    assert!(estimate_rendered_height("\n\n\n") < estimate_rendered_height("a\nb\nc"));
}

#[test]
fn split_for_height_returns_original_when_small() {
    let chunks = split_for_height("small content", &limits());
    assert_eq!(chunks, vec!["small content".to_owned()]);
}

#[test]
fn split_for_height_splits_tall_content_at_good_points() {
    let mut content = String::new();
    for section in 0..6 {
        content.push_str(&format!("## Section {section}\n"));
        for line in 0..12 {
            content.push_str(&format!("paragraph text line {line} with some detail\n"));
        }
        content.push('\n');
    }

    let chunks = split_for_height(&content, &limits());
    assert!(chunks.len() >= 2, "tall content must split");
    for chunk in &chunks {
        let state = code_block_state_at(chunk, chunk.len());
        assert!(!state.inside_open, "no chunk may end inside a fence");
    }
}

#[test]
fn split_for_height_never_cuts_a_code_block() {
    let mut content = String::from("```rust\n");
    for line in 0..40 {
        content.push_str(&format!("let value_{line} = {line};\n"));
    }
    content.push_str("```\n");

    for chunk in split_for_height(&content, &limits()) {
        let state = code_block_state_at(&chunk, chunk.len());
        assert!(!state.inside_open);
    }
}
