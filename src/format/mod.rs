//! Streaming formatter: child events in, platform posts out.
//!
//! Buffers fragments produced from child events, debounces writes, and
//! decides between updating the open post and starting a new one, never
//! leaving a code fence open across a post boundary. The owning session
//! task drives it; nothing here is shared between tasks.

pub mod tool_use;

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::breaker::{self, BreakLimits};
use crate::child::ContentBlock;
use crate::platform::{PlatformAdapter, ThreadRef};
use crate::registry::{PostRegistry, PostRole};
use crate::session::SessionKey;
use crate::Result;
use tool_use::PathContext;

const THINKING_PREVIEW_CHARS: usize = 100;

/// Blocks the formatter hands off instead of rendering.
#[derive(Debug, Clone)]
pub enum Diversion {
    /// `ExitPlanMode`: a plan is ready for approval.
    PlanReady {
        /// Raw tool input (the plan body).
        input: serde_json::Value,
    },
    /// `AskUserQuestion`: a question set for the thread.
    QuestionSet {
        /// Tool invocation id, echoed when answering.
        tool_use_id: String,
        /// Raw tool input (questions array).
        input: serde_json::Value,
    },
    /// `TodoWrite`: the task list changed.
    TaskList {
        /// Raw tool input (todos array).
        input: serde_json::Value,
    },
    /// `Task`: a subagent was started.
    Subagent {
        /// Tool invocation id; keys the status post.
        tool_use_id: String,
        /// Raw tool input (description, prompt).
        input: serde_json::Value,
    },
}

/// Result of preparing one assistant event.
#[derive(Debug, Default)]
pub struct AssistantOutcome {
    /// Renderable fragments, in block order.
    pub fragments: Vec<String>,
    /// Blocks diverted to the interaction engine or side channels.
    pub diversions: Vec<Diversion>,
    /// When true the whole event contributes nothing to the stream.
    pub suppressed: bool,
}

/// Formatter tuning, derived from the global stream config.
#[derive(Debug, Clone)]
pub struct FormatterConfig {
    /// Break thresholds.
    pub limits: BreakLimits,
    /// Debounce window between an append and its flush.
    pub debounce: Duration,
    /// Re-send interval for the typing indicator.
    pub typing_interval: Duration,
    /// Render Edit invocations with a fenced diff preview.
    pub detailed_edits: bool,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            limits: BreakLimits::default(),
            debounce: Duration::from_millis(500),
            typing_interval: Duration::from_secs(3),
            detailed_edits: false,
        }
    }
}

/// Per-session streaming state.
pub struct StreamingFormatter {
    config: FormatterConfig,
    path_ctx: PathContext,
    pending: String,
    current_post_id: Option<String>,
    current_post_text: String,
    /// Language to re-open with after a forced fence close.
    reopen_language: Option<String>,
    flush_deadline: Option<Instant>,
    typing: bool,
}

impl StreamingFormatter {
    /// Create a formatter for one session.
    #[must_use]
    pub fn new(config: FormatterConfig, path_ctx: PathContext) -> Self {
        Self {
            config,
            path_ctx,
            pending: String::new(),
            current_post_id: None,
            current_post_text: String::new(),
            reopen_language: None,
            flush_deadline: None,
            typing: false,
        }
    }

    /// Update the path-shortening context (worktree changes).
    pub fn set_path_context(&mut self, ctx: PathContext) {
        self.path_ctx = ctx;
    }

    /// Turn an assistant event's blocks into fragments and diversions.
    ///
    /// `ExitPlanMode` and `AskUserQuestion` suppress the whole event;
    /// `TodoWrite` and `Task` divert their own block only.
    #[must_use]
    pub fn prepare_assistant(&self, blocks: &[ContentBlock]) -> AssistantOutcome {
        let mut outcome = AssistantOutcome::default();

        for block in blocks {
            match block {
                ContentBlock::Text { text } => outcome.fragments.push(text.clone()),
                ContentBlock::Thinking { thinking } => {
                    outcome.fragments.push(thinking_preview(thinking));
                }
                ContentBlock::ToolUse { id, name, input }
                | ContentBlock::ServerToolUse { id, name, input } => match name.as_str() {
                    "ExitPlanMode" => {
                        outcome.suppressed = true;
                        outcome.diversions.push(Diversion::PlanReady { input: input.clone() });
                    }
                    "AskUserQuestion" => {
                        outcome.suppressed = true;
                        outcome.diversions.push(Diversion::QuestionSet {
                            tool_use_id: id.clone(),
                            input: input.clone(),
                        });
                    }
                    "TodoWrite" => {
                        outcome.diversions.push(Diversion::TaskList { input: input.clone() });
                    }
                    "Task" => {
                        outcome.diversions.push(Diversion::Subagent {
                            tool_use_id: id.clone(),
                            input: input.clone(),
                        });
                    }
                    _ => {
                        if let Some(fragment) = tool_use::format_tool_use(
                            name,
                            input,
                            self.config.detailed_edits,
                            &self.path_ctx,
                        ) {
                            outcome.fragments.push(fragment);
                        }
                    }
                },
                ContentBlock::ToolResult { .. } | ContentBlock::Unknown => {}
            }
        }

        if outcome.suppressed {
            outcome.fragments.clear();
        }
        outcome
    }

    /// Append a fragment to the pending buffer and arm the debounce.
    pub fn append(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        self.pending.push_str(fragment);
        if !fragment.ends_with('\n') {
            self.pending.push('\n');
        }
        self.flush_deadline = Some(Instant::now() + self.config.debounce);
    }

    /// Whether buffered content has outgrown the debounce window.
    #[must_use]
    pub fn should_flush_early(&self) -> bool {
        breaker::should_flush_early(&self.pending, &self.config.limits)
    }

    /// Deadline for the owning task's flush timer.
    #[must_use]
    pub fn flush_deadline(&self) -> Option<Instant> {
        self.flush_deadline
    }

    /// Disarm the flush timer, keeping the buffered content.
    ///
    /// Used while a pending interaction blocks output posts; completion
    /// triggers an explicit flush.
    pub fn defer_flush(&mut self) {
        self.flush_deadline = None;
    }

    /// Whether anything is buffered.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.trim().is_empty()
    }

    /// Start the typing indicator.
    pub fn start_typing(&mut self) {
        self.typing = true;
    }

    /// Stop the typing indicator.
    pub fn stop_typing(&mut self) {
        self.typing = false;
    }

    /// Whether typing is currently on.
    #[must_use]
    pub fn typing(&self) -> bool {
        self.typing
    }

    /// Typing re-send interval.
    #[must_use]
    pub fn typing_interval(&self) -> Duration {
        self.config.typing_interval
    }

    /// End the current turn: the next flush starts a fresh post.
    pub fn end_turn(&mut self) {
        self.current_post_id = None;
        self.current_post_text.clear();
        self.stop_typing();
    }

    /// Post id currently being streamed into.
    #[must_use]
    pub fn current_post_id(&self) -> Option<&str> {
        self.current_post_id.as_deref()
    }

    /// Write buffered content out as post updates and/or new posts.
    ///
    /// # Errors
    ///
    /// Returns the adapter error when post creation fails; update failures
    /// are recovered by falling back to a fresh post.
    pub async fn flush(
        &mut self,
        adapter: &dyn PlatformAdapter,
        registry: &PostRegistry,
        session: &SessionKey,
        thread: &ThreadRef,
    ) -> Result<()> {
        self.flush_deadline = None;

        let mut content = normalize(&std::mem::take(&mut self.pending));
        if content.is_empty() {
            return Ok(());
        }

        // Re-open a fence that the previous post force-closed.
        if let Some(lang) = self.reopen_language.take() {
            content = format!("```{lang}\n{content}");
        }

        // Try to extend the open post first.
        if let Some(post_id) = self.current_post_id.clone() {
            let combined = join_posts(&self.current_post_text, &content);
            if !breaker::should_flush_early(&combined, &self.config.limits)
                && fence_closed(&combined)
            {
                match adapter.update_post(&post_id, &combined).await {
                    Ok(()) => {
                        self.current_post_text = combined;
                        return Ok(());
                    }
                    Err(err) => {
                        // Post gone upstream; start a new one.
                        warn!(%err, post_id, "update failed, falling back to new post");
                        self.current_post_id = None;
                        self.current_post_text.clear();
                    }
                }
            } else {
                // The open post is full; later chunks go to fresh posts.
                self.current_post_id = None;
                self.current_post_text.clear();
            }
        }

        let chunks = breaker::split_for_height(&content, &self.config.limits);
        let last = chunks.len().saturating_sub(1);
        for (index, chunk) in chunks.into_iter().enumerate() {
            let (body, carried) = close_open_fence(chunk.trim_matches('\n'));
            if let Some(lang) = carried {
                self.reopen_language = Some(lang);
            }
            if body.trim().is_empty() {
                continue;
            }

            let post = adapter.create_post(thread, &body).await?;
            registry.register(
                post.id.clone(),
                thread.encode(),
                session.clone(),
                PostRole::Content,
                None,
                None,
            );
            if index == last {
                self.current_post_id = Some(post.id);
                self.current_post_text = body;
            }
        }

        Ok(())
    }
}

/// Italic preview of a thinking block.
fn thinking_preview(thinking: &str) -> String {
    let flat = thinking.replace('\n', " ");
    let preview: String = flat.chars().take(THINKING_PREVIEW_CHARS).collect();
    let ellipsis = if flat.chars().count() > THINKING_PREVIEW_CHARS {
        "\u{2026}"
    } else {
        ""
    };
    format!("_{}{ellipsis}_", preview.trim_end())
}

/// Collapse runs of three or more newlines to two and trim.
fn normalize(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut run = 0usize;
    for ch in content.chars() {
        if ch == '\n' {
            run += 1;
            if run <= 2 {
                out.push(ch);
            }
        } else {
            run = 0;
            out.push(ch);
        }
    }
    out.trim_matches('\n').trim_end().to_owned()
}

fn join_posts(existing: &str, addition: &str) -> String {
    if existing.is_empty() {
        addition.to_owned()
    } else {
        format!("{existing}\n{addition}")
    }
}

fn fence_closed(content: &str) -> bool {
    !breaker::code_block_state_at(content, content.len()).inside_open
}

/// Force-close a trailing open fence; returns the body and the language to
/// re-open with in the next post.
fn close_open_fence(content: &str) -> (String, Option<String>) {
    let state = breaker::code_block_state_at(content, content.len());
    if state.inside_open {
        debug!("force-closing open code fence at post boundary");
        let language = state.language;
        (format!("{content}\n```"), Some(language.unwrap_or_default()))
    } else {
        (content.to_owned(), None)
    }
}
