use thread_relay::child::claude::parse_event_line;
use thread_relay::child::{ChildEvent, ContentBlock};

#[test]
fn blank_lines_are_skipped() {
    assert!(parse_event_line("").expect("ok").is_none());
    assert!(parse_event_line("   ").expect("ok").is_none());
}

#[test]
fn malformed_json_is_an_error() {
    assert!(parse_event_line("{not json").is_err());
}

#[test]
fn unknown_event_types_are_skipped() {
    let line = r#"{"type":"telemetry","data":{}}"#;
    assert!(parse_event_line(line).expect("ok").is_none());
}

#[test]
fn assistant_event_parses_content_blocks() {
    let line = r#"{"type":"assistant","message":{"content":[
        {"type":"text","text":"hello"},
        {"type":"thinking","thinking":"hmm"},
        {"type":"tool_use","id":"t1","name":"Read","input":{"file_path":"/tmp/x"}}
    ]}}"#
    .replace('\n', "");

    let event = parse_event_line(&line).expect("ok").expect("event");
    let ChildEvent::Assistant { blocks } = event else {
        panic!("expected assistant event");
    };
    assert_eq!(blocks.len(), 3);
    assert!(matches!(blocks[0], ContentBlock::Text { ref text } if text == "hello"));
    assert!(matches!(blocks[2], ContentBlock::ToolUse { ref name, .. } if name == "Read"));
}

#[test]
fn user_event_parses_tool_results() {
    let line = r#"{"type":"user","message":{"content":[
        {"type":"tool_result","tool_use_id":"t1","content":"done","is_error":false}
    ]}}"#
    .replace('\n', "");

    let event = parse_event_line(&line).expect("ok").expect("event");
    let ChildEvent::User { blocks } = event else {
        panic!("expected user event");
    };
    assert!(
        matches!(blocks[0], ContentBlock::ToolResult { ref tool_use_id, is_error, .. }
            if tool_use_id == "t1" && !is_error)
    );
}

#[test]
fn result_event_carries_usage_and_session_id() {
    let line = r#"{"type":"result","usage":{"input_tokens":10,"output_tokens":20},"session_id":"s-1","is_error":false}"#;
    let event = parse_event_line(line).expect("ok").expect("event");
    let ChildEvent::TurnResult { usage, is_error, session_id } = event else {
        panic!("expected result event");
    };
    assert!(!is_error);
    assert_eq!(session_id.as_deref(), Some("s-1"));
    assert_eq!(usage.expect("usage").output_tokens, 20);
}

#[test]
fn system_error_event_carries_message() {
    let line = r#"{"type":"system","subtype":"error","error":"boom"}"#;
    let event = parse_event_line(line).expect("ok").expect("event");
    let ChildEvent::System { subtype, message } = event else {
        panic!("expected system event");
    };
    assert_eq!(subtype, "error");
    assert_eq!(message.as_deref(), Some("boom"));
}

#[test]
fn permission_request_event_parses() {
    let line = r#"{"type":"system","subtype":"permission_request","request_id":"r1","description":"write a file"}"#;
    let event = parse_event_line(line).expect("ok").expect("event");
    let ChildEvent::PermissionRequest { request_id, description } = event else {
        panic!("expected permission request");
    };
    assert_eq!(request_id, "r1");
    assert_eq!(description, "write a file");
}

#[test]
fn permission_request_without_id_is_an_error() {
    let line = r#"{"type":"system","subtype":"permission_request"}"#;
    assert!(parse_event_line(line).is_err());
}

#[test]
fn unknown_content_blocks_are_tolerated() {
    let line = r#"{"type":"assistant","message":{"content":[{"type":"wavelength","data":1}]}}"#;
    let event = parse_event_line(line).expect("ok").expect("event");
    let ChildEvent::Assistant { blocks } = event else {
        panic!("expected assistant event");
    };
    assert!(matches!(blocks[0], ContentBlock::Unknown));
}
