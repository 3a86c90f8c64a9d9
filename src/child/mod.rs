//! Child assistant process abstraction.
//!
//! One child process serves one session. The [`ChildProcess`] trait hides
//! the concrete CLI behind spawn options, an outbound message surface, and
//! a typed event stream; [`claude`] provides the production implementation
//! over NDJSON stdio.

pub mod claude;
pub mod codec;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::Result;

/// One block of assistant-message content.
///
/// The wire shape is heterogeneous; everything is normalised into this
/// tagged variant before the formatter sees it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain prose.
    Text {
        /// The text itself.
        text: String,
    },
    /// Extended-thinking excerpt.
    Thinking {
        /// Raw thinking text.
        thinking: String,
    },
    /// A tool invocation.
    ToolUse {
        /// Invocation id, echoed in the matching result.
        id: String,
        /// Tool name.
        name: String,
        /// Tool input object.
        input: serde_json::Value,
    },
    /// A tool result inside a user (tool-result) message.
    ToolResult {
        /// Invocation this result answers.
        tool_use_id: String,
        /// Result payload; shape varies by tool.
        #[serde(default)]
        content: serde_json::Value,
        /// Whether the tool failed.
        #[serde(default)]
        is_error: bool,
    },
    /// A server-side tool invocation (executed by the model provider).
    ServerToolUse {
        /// Invocation id.
        id: String,
        /// Tool name.
        name: String,
        /// Tool input object.
        input: serde_json::Value,
    },
    /// Anything this version does not model; preserved for debugging.
    #[serde(other)]
    Unknown,
}

/// Token usage reported on a result event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct Usage {
    /// Input tokens consumed.
    #[serde(default)]
    pub input_tokens: u64,
    /// Output tokens produced.
    #[serde(default)]
    pub output_tokens: u64,
}

/// Events emitted by a child process.
#[derive(Debug, Clone)]
pub enum ChildEvent {
    /// Assistant turn content.
    Assistant {
        /// Content blocks of the message.
        blocks: Vec<ContentBlock>,
    },
    /// User-side message carrying tool results.
    User {
        /// Tool-result blocks.
        blocks: Vec<ContentBlock>,
    },
    /// The turn finished.
    TurnResult {
        /// Token usage, when reported.
        usage: Option<Usage>,
        /// Whether the child marked the turn as an error.
        is_error: bool,
        /// Child-side session id, used for resume.
        session_id: Option<String>,
    },
    /// Out-of-band system event.
    System {
        /// Event subtype (`init`, `error`, …).
        subtype: String,
        /// Human-readable detail, when present.
        message: Option<String>,
    },
    /// The child asks permission for a tool action.
    PermissionRequest {
        /// Request id, echoed in the decision.
        request_id: String,
        /// What the child wants to do.
        description: String,
    },
    /// The process exited.
    Exit {
        /// Exit code, when the process terminated normally.
        code: Option<i32>,
    },
}

/// Options for spawning a child.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Working directory the child runs in.
    pub working_dir: PathBuf,
    /// Thread the session belongs to, exported to the child environment.
    pub thread_id: String,
    /// Skip the child's permission prompts.
    pub skip_permissions: bool,
    /// Child-side session id; freshly generated per working directory.
    pub session_id: String,
    /// Resume a previous child session instead of starting fresh.
    pub resume: Option<String>,
    /// Start with browser tooling enabled.
    pub chrome: bool,
    /// Platform-specific permission-tool configuration.
    pub platform_config: Option<serde_json::Value>,
    /// Extra system-prompt text appended for this session.
    pub append_system_prompt: Option<String>,
    /// Timeout for interactive permission prompts.
    pub permission_timeout_ms: Option<u64>,
}

/// Outbound user message content.
#[derive(Debug, Clone)]
pub enum UserContent {
    /// Plain text.
    Text(String),
    /// Pre-built content blocks (attachments).
    Blocks(Vec<serde_json::Value>),
}

/// A running child assistant process.
#[async_trait]
pub trait ChildProcess: Send + Sync {
    /// Deliver a user message to the child.
    async fn send_message(&self, content: UserContent) -> Result<()>;

    /// Stop the current turn without exiting the process.
    async fn interrupt(&self) -> Result<()>;

    /// Answer a pending permission request.
    async fn respond_permission(&self, request_id: &str, approved: bool) -> Result<()>;

    /// Terminate the process.
    async fn kill(&self) -> Result<()>;

    /// Whether the process is still alive.
    fn is_running(&self) -> bool;
}

/// Factory for child processes, injectable for tests.
#[async_trait]
pub trait ChildLauncher: Send + Sync {
    /// Spawn a child and return its handle plus event stream.
    async fn launch(
        &self,
        options: SpawnOptions,
    ) -> Result<(std::sync::Arc<dyn ChildProcess>, mpsc::Receiver<ChildEvent>)>;
}
