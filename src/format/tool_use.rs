//! Presentation of child tool invocations.
//!
//! A closed table maps tool names to one-line fragments; `mcp__server__tool`
//! names go through a tiny parser, and everything else falls back to a
//! generic bullet. Paths are shortened relative to the user's home and, when
//! the session runs in a worktree, to `[branch]/…`.

use std::path::PathBuf;

/// Context for path shortening.
#[derive(Debug, Clone, Default)]
pub struct PathContext {
    /// The user's home directory.
    pub home: Option<PathBuf>,
    /// Worktree root and branch, when the session runs inside one.
    pub worktree: Option<(PathBuf, String)>,
}

/// Shorten an absolute path for display.
///
/// Paths under the worktree become `[branch]/rel`; paths under home become
/// `~/rel`; anything else is returned verbatim.
#[must_use]
pub fn shorten_path(path: &str, ctx: &PathContext) -> String {
    if let Some((ref root, ref branch)) = ctx.worktree {
        if let Ok(rel) = PathBuf::from(path).strip_prefix(root) {
            return format!("[{branch}]/{}", rel.display());
        }
    }
    if let Some(ref home) = ctx.home {
        if let Ok(rel) = PathBuf::from(path).strip_prefix(home) {
            return format!("~/{}", rel.display());
        }
    }
    path.to_owned()
}

/// Tool names the formatter diverts to the interaction engine.
///
/// `ExitPlanMode` and `AskUserQuestion` additionally suppress the whole
/// assistant event; `TodoWrite` and `Task` only get side-channel handling.
#[must_use]
pub fn is_interactive_tool(name: &str) -> bool {
    matches!(name, "ExitPlanMode" | "AskUserQuestion")
}

/// Tool names with side-channel handling that do not suppress the event.
#[must_use]
pub fn is_side_channel_tool(name: &str) -> bool {
    matches!(name, "TodoWrite" | "Task")
}

/// Split an `mcp__server__tool` name into `(server, tool)`.
#[must_use]
pub fn parse_mcp_name(name: &str) -> Option<(&str, &str)> {
    let rest = name.strip_prefix("mcp__")?;
    let (server, tool) = rest.split_once("__")?;
    if server.is_empty() || tool.is_empty() {
        return None;
    }
    Some((server, tool))
}

const BASH_PREVIEW_CHARS: usize = 80;
const WRITE_PREVIEW_LINES: usize = 4;
const DIFF_CONTEXT_LINES: usize = 8;

/// Render a tool invocation as a display fragment.
///
/// Returns `None` for the diverted names (their rendering is owned by the
/// interaction engine) and for side-channel tools.
#[must_use]
pub fn format_tool_use(
    name: &str,
    input: &serde_json::Value,
    detailed: bool,
    ctx: &PathContext,
) -> Option<String> {
    if is_interactive_tool(name) || is_side_channel_tool(name) {
        return None;
    }

    if let Some((server, tool)) = parse_mcp_name(name) {
        return Some(format!("\u{1f50c} {tool} ({server})"));
    }

    let path = |key: &str| {
        input
            .get(key)
            .and_then(|v| v.as_str())
            .map(|p| shorten_path(p, ctx))
    };

    let fragment = match name {
        "Read" => format!("\u{1f4c4} {}", path("file_path").unwrap_or_default()),
        "Edit" => {
            let target = path("file_path").unwrap_or_default();
            if detailed {
                match edit_diff(input) {
                    Some(diff) => format!("\u{270f}\u{fe0f} {target}\n```diff\n{diff}```"),
                    None => format!("\u{270f}\u{fe0f} {target}"),
                }
            } else {
                format!("\u{270f}\u{fe0f} {target}")
            }
        }
        "Write" => {
            let target = path("file_path").unwrap_or_default();
            match write_preview(input) {
                Some(preview) => format!("\u{1f4dd} {target}\n```\n{preview}\n```"),
                None => format!("\u{1f4dd} {target}"),
            }
        }
        "Bash" => {
            let command = input.get("command").and_then(|v| v.as_str()).unwrap_or("");
            format!("\u{1f4bb} `{}`", truncate_chars(command, BASH_PREVIEW_CHARS))
        }
        "Glob" => format!(
            "\u{1f50d} {}",
            input.get("pattern").and_then(|v| v.as_str()).unwrap_or("")
        ),
        "Grep" => format!(
            "\u{1f50e} {}",
            input.get("pattern").and_then(|v| v.as_str()).unwrap_or("")
        ),
        "WebFetch" => format!(
            "\u{1f310} {}",
            input.get("url").and_then(|v| v.as_str()).unwrap_or("")
        ),
        "WebSearch" => format!(
            "\u{1f310} {}",
            input.get("query").and_then(|v| v.as_str()).unwrap_or("")
        ),
        "EnterPlanMode" => "\u{1f4cb} Planning\u{2026}".to_owned(),
        other => format!("\u{25cf} {other}"),
    };

    Some(fragment)
}

/// Tool-result status line, as emitted into the stream and matched by the
/// breaker's tool-marker rule.
#[must_use]
pub fn tool_result_line(ok: bool, text: &str) -> String {
    let mark = if ok { "\u{2713}" } else { "\u{274c}" };
    format!("  \u{21b3} {mark} {text}")
}

fn truncate_chars(text: &str, max: usize) -> String {
    let text = text.replace('\n', " ");
    if text.chars().count() <= max {
        return text;
    }
    let truncated: String = text.chars().take(max).collect();
    format!("{truncated}\u{2026}")
}

/// Fenced diff preview for an Edit invocation, both sides truncated.
fn edit_diff(input: &serde_json::Value) -> Option<String> {
    let old = input.get("old_string").and_then(|v| v.as_str())?;
    let new = input.get("new_string").and_then(|v| v.as_str())?;
    let old = truncate_lines(old, DIFF_CONTEXT_LINES);
    let new = truncate_lines(new, DIFF_CONTEXT_LINES);
    let patch = diffy::create_patch(&old, &new);
    let body: String = patch
        .to_string()
        .lines()
        .filter(|line| !line.starts_with("---") && !line.starts_with("+++"))
        .map(|line| format!("{line}\n"))
        .collect();
    if body.is_empty() {
        None
    } else {
        Some(body)
    }
}

fn write_preview(input: &serde_json::Value) -> Option<String> {
    let content = input.get("content").and_then(|v| v.as_str())?;
    let lines: Vec<&str> = content.lines().take(WRITE_PREVIEW_LINES + 1).collect();
    if lines.is_empty() {
        return None;
    }
    if lines.len() > WRITE_PREVIEW_LINES {
        let mut preview = lines[..WRITE_PREVIEW_LINES].join("\n");
        preview.push_str("\n\u{2026}");
        Some(preview)
    } else {
        Some(lines.join("\n"))
    }
}

fn truncate_lines(text: &str, max: usize) -> String {
    let mut out: String = text
        .lines()
        .take(max)
        .map(|l| format!("{l}\n"))
        .collect();
    if text.lines().count() > max {
        out.push_str("\u{2026}\n");
    }
    out
}
