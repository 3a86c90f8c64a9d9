//! Pure markdown break logic for the streaming formatter.
//!
//! Chat platforms collapse or clip tall posts, and a post must never end
//! inside an open code fence. The functions here find semantically good
//! positions to end one post and begin the next, estimate rendered height,
//! and pre-split oversized content. No I/O, no state.

/// Thresholds controlling early flushes and pre-splitting.
///
/// Mirrors the `stream` section of the global config; kept as a separate
/// plain struct so the logic stays usable from tests without a full config.
#[derive(Debug, Clone, Copy)]
pub struct BreakLimits {
    /// Byte count at which buffered content should flush early.
    pub soft_break_chars: usize,
    /// Minimum chunk size the splitter will produce.
    pub min_break_chars: usize,
    /// Newline count at which buffered content should flush early.
    pub max_lines_before_break: usize,
    /// Estimated rendered height (px) above which content is split.
    pub max_height_px: u32,
}

impl Default for BreakLimits {
    fn default() -> Self {
        Self {
            soft_break_chars: 2000,
            min_break_chars: 500,
            max_lines_before_break: 15,
            max_height_px: 500,
        }
    }
}

/// Code-fence state at a byte position.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CodeBlockState {
    /// Whether the position sits inside an unclosed fenced block.
    pub inside_open: bool,
    /// Language tag of the open fence, when present.
    pub language: Option<String>,
    /// Byte offset of the line that opened the fence.
    pub open_pos: Option<usize>,
}

/// Kind of logical breakpoint, in descending preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointKind {
    /// End of a `  ↳ ✓` / `  ↳ ❌` tool-result line.
    ToolMarker,
    /// Start of an H2/H3 heading line.
    Heading,
    /// Just past a closing code fence.
    CodeBlockEnd,
    /// After a blank-line paragraph separator.
    Paragraph,
    /// After any newline.
    Line,
}

/// A break position and how it was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breakpoint {
    /// Byte offset where the next post should begin.
    pub pos: usize,
    /// Why this position qualifies.
    pub kind: BreakpointKind,
}

/// Default look-ahead window for [`find_logical_breakpoint`].
pub const DEFAULT_LOOK_AHEAD: usize = 500;

// Rendered-height model. Rough per-line pixel costs for a typical chat
// client; precision does not matter, monotonicity does.
const TEXT_LINE_PX: u32 = 22;
const CODE_LINE_PX: u32 = 19;
const CODE_BLOCK_PADDING_PX: u32 = 24;
const HEADER_LINE_PX: u32 = 32;
const BLANK_LINE_PX: u32 = 8;
const TABLE_ROW_PX: u32 = 30;
const WRAP_COLUMNS: usize = 90;

/// Whether a line opens or closes a fenced code block.
fn is_fence_line(line: &str) -> bool {
    let stripped = line.trim_start_matches(' ');
    line.len() - stripped.len() <= 3 && stripped.starts_with("```")
}

/// Language tag of a fence line, if any.
fn fence_language(line: &str) -> Option<String> {
    let tag = line.trim_start_matches(' ').trim_start_matches('`').trim();
    if tag.is_empty() {
        None
    } else {
        Some(tag.to_owned())
    }
}

/// Compute the code-fence state at byte position `pos`.
///
/// Scans line-anchored ``` markers before `pos`; an odd count means the
/// position is inside a block opened by the most recent marker.
#[must_use]
pub fn code_block_state_at(content: &str, pos: usize) -> CodeBlockState {
    let mut state = CodeBlockState::default();
    let mut offset = 0;

    for line in content.split_inclusive('\n') {
        if offset >= pos {
            break;
        }
        if is_fence_line(line) {
            if state.inside_open {
                state = CodeBlockState::default();
            } else {
                state = CodeBlockState {
                    inside_open: true,
                    language: fence_language(line.trim_end_matches('\n')),
                    open_pos: Some(offset),
                };
            }
        }
        offset += line.len();
    }

    state
}

/// Whether a line is a tool-result marker (`  ↳ ✓ …` / `  ↳ ❌ …`).
fn is_tool_marker_line(line: &str) -> bool {
    let line = line.trim_end_matches('\n');
    line.starts_with("  \u{21b3} \u{2713}") || line.starts_with("  \u{21b3} \u{274c}")
}

/// Whether a line starts an H2/H3 heading.
fn is_heading_line(line: &str) -> bool {
    line.starts_with("## ") || line.starts_with("### ")
}

/// Find the best logical breakpoint in `content` at or after `start_pos`,
/// looking at most `max_look_ahead` bytes ahead.
///
/// Candidates are ranked by [`BreakpointKind`]; within a kind the earliest
/// position wins. A candidate inside an open code fence is vetoed. When
/// `start_pos` itself is inside an open fence, only the fence's closing
/// marker qualifies; `None` means the caller must wait or force-close.
#[must_use]
pub fn find_logical_breakpoint(
    content: &str,
    start_pos: usize,
    max_look_ahead: usize,
) -> Option<Breakpoint> {
    if start_pos >= content.len() {
        return None;
    }
    let window_end = content.len().min(start_pos.saturating_add(max_look_ahead));

    if code_block_state_at(content, start_pos).inside_open {
        return closing_fence_break(content, start_pos, window_end);
    }

    let mut tool_marker = None;
    let mut heading = None;
    let mut block_end = None;
    let mut paragraph = None;
    let mut line_break = None;

    let mut offset = 0;
    let mut prev_blank = false;
    for line in content.split_inclusive('\n') {
        let line_end = offset + line.len();
        let in_window = |p: usize| p > start_pos && p <= window_end;
        let vetoed = |p: usize| code_block_state_at(content, p).inside_open;

        if is_tool_marker_line(line)
            && tool_marker.is_none()
            && in_window(line_end)
            && !vetoed(line_end)
        {
            tool_marker = Some(line_end);
        }
        if is_heading_line(line) && heading.is_none() && in_window(offset) && !vetoed(offset) {
            heading = Some(offset);
        }
        if is_fence_line(line) && block_end.is_none() && in_window(line_end) {
            // A closing fence; its opening marker must sit inside the
            // window too (otherwise rule 1 applies).
            let open_state = code_block_state_at(content, offset);
            if open_state.inside_open
                && open_state.open_pos.is_some_and(|open| open >= start_pos)
                && !vetoed(line_end)
            {
                block_end = Some(line_end);
            }
        }
        let is_blank = line.trim_end_matches('\n').trim().is_empty();
        if is_blank && !prev_blank && paragraph.is_none() && in_window(line_end) && !vetoed(line_end)
        {
            paragraph = Some(line_end);
        }
        if line.ends_with('\n') && line_break.is_none() && in_window(line_end) && !vetoed(line_end) {
            line_break = Some(line_end);
        }
        prev_blank = is_blank;
        offset = line_end;
        if offset > window_end {
            break;
        }
    }

    tool_marker
        .map(|pos| Breakpoint { pos, kind: BreakpointKind::ToolMarker })
        .or(heading.map(|pos| Breakpoint { pos, kind: BreakpointKind::Heading }))
        .or(block_end.map(|pos| Breakpoint { pos, kind: BreakpointKind::CodeBlockEnd }))
        .or(paragraph.map(|pos| Breakpoint { pos, kind: BreakpointKind::Paragraph }))
        .or(line_break.map(|pos| Breakpoint { pos, kind: BreakpointKind::Line }))
}

/// Rule 1: inside an open fence, only the closing marker qualifies.
fn closing_fence_break(content: &str, start_pos: usize, window_end: usize) -> Option<Breakpoint> {
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        let line_end = offset + line.len();
        if line_end > start_pos && is_fence_line(line) && code_block_state_at(content, offset).inside_open {
            if line_end <= window_end {
                return Some(Breakpoint { pos: line_end, kind: BreakpointKind::CodeBlockEnd });
            }
            return None;
        }
        offset = line_end;
        if offset > window_end {
            break;
        }
    }
    None
}

/// Whether buffered content should be flushed before the debounce fires.
#[must_use]
pub fn should_flush_early(content: &str, limits: &BreakLimits) -> bool {
    if content.len() >= limits.soft_break_chars {
        return true;
    }
    if content.matches('\n').count() >= limits.max_lines_before_break {
        return true;
    }
    estimate_rendered_height(content) >= limits.max_height_px
}

/// Estimate the rendered pixel height of a markdown fragment.
///
/// Fenced blocks are counted as `lines × code-line-height + padding`; the
/// remaining lines get categorized per-line costs, with long text lines
/// wrapped at roughly [`WRAP_COLUMNS`] characters first.
#[must_use]
pub fn estimate_rendered_height(content: &str) -> u32 {
    let mut height: u32 = 0;
    let mut in_fence = false;

    for line in content.lines() {
        if is_fence_line(line) {
            if in_fence {
                height = height.saturating_add(CODE_BLOCK_PADDING_PX);
            }
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            height = height.saturating_add(CODE_LINE_PX);
            continue;
        }
        height = height.saturating_add(plain_line_height(line));
    }

    // Unclosed fence still occupies its padding when rendered.
    if in_fence {
        height = height.saturating_add(CODE_BLOCK_PADDING_PX);
    }

    height
}

fn plain_line_height(line: &str) -> u32 {
    let trimmed = line.trim_end();
    if trimmed.trim().is_empty() {
        return BLANK_LINE_PX;
    }
    if matches_header(trimmed) {
        return HEADER_LINE_PX;
    }
    if trimmed.starts_with("> ") {
        return TEXT_LINE_PX;
    }
    if is_list_line(trimmed) {
        return TEXT_LINE_PX;
    }
    if trimmed.starts_with('|') && trimmed.ends_with('|') {
        return TABLE_ROW_PX;
    }
    let chars = trimmed.chars().count();
    let wrapped = chars.div_ceil(WRAP_COLUMNS).max(1);
    TEXT_LINE_PX.saturating_mul(u32::try_from(wrapped).unwrap_or(u32::MAX))
}

fn matches_header(line: &str) -> bool {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    (1..=6).contains(&hashes) && line.as_bytes().get(hashes) == Some(&b' ')
}

fn is_list_line(line: &str) -> bool {
    if let Some(rest) = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| line.strip_prefix("+ "))
    {
        return !rest.is_empty();
    }
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    digits > 0 && line[digits..].starts_with(". ")
}

/// Good breakpoints usable for pre-splitting: everything except bare
/// newlines, with the open-fence veto already applied.
fn good_breakpoints(content: &str) -> Vec<Breakpoint> {
    let mut out = Vec::new();
    let mut offset = 0;
    let mut prev_blank = true;

    for line in content.split_inclusive('\n') {
        let line_end = offset + line.len();
        let vetoed = |p: usize| code_block_state_at(content, p).inside_open;
        let is_blank = line.trim_end_matches('\n').trim().is_empty();

        if is_tool_marker_line(line) && !vetoed(line_end) {
            out.push(Breakpoint { pos: line_end, kind: BreakpointKind::ToolMarker });
        } else if is_heading_line(line) && offset > 0 && !vetoed(offset) {
            out.push(Breakpoint { pos: offset, kind: BreakpointKind::Heading });
        } else if is_fence_line(line) && code_block_state_at(content, offset).inside_open
            && !vetoed(line_end)
        {
            out.push(Breakpoint { pos: line_end, kind: BreakpointKind::CodeBlockEnd });
        } else if is_blank && !prev_blank && !vetoed(line_end) {
            out.push(Breakpoint { pos: line_end, kind: BreakpointKind::Paragraph });
        }

        prev_blank = is_blank;
        offset = line_end;
    }

    out.retain(|bp| bp.pos > 0 && bp.pos < content.len());
    out.sort_by_key(|bp| bp.pos);
    out.dedup_by_key(|bp| bp.pos);
    out
}

/// Split content that exceeds the limits into an ordered list of chunks.
///
/// Repeatedly splits at the largest good breakpoint whose prefix stays
/// within the limits; when content cannot be split at a good breakpoint it
/// is returned whole rather than broken mid-construct.
#[must_use]
pub fn split_for_height(content: &str, limits: &BreakLimits) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = content;

    while should_flush_early(rest, limits) {
        let candidates = good_breakpoints(rest);
        let pick = candidates
            .iter()
            .rev()
            .find(|bp| bp.pos >= limits.min_break_chars && !should_flush_early(&rest[..bp.pos], limits))
            .or_else(|| candidates.iter().find(|bp| bp.pos >= limits.min_break_chars))
            .or_else(|| candidates.last());

        match pick {
            Some(bp) if bp.pos > 0 && bp.pos < rest.len() => {
                chunks.push(rest[..bp.pos].trim_end_matches('\n').to_owned());
                rest = &rest[bp.pos..];
            }
            _ => break,
        }
    }

    chunks.push(rest.to_owned());
    chunks
}
