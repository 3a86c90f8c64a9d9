//! Persisted session snapshot types.
//!
//! One record per session plus the per-platform enabled map, written
//! atomically by [`store::SessionStore`] after lifecycle-relevant
//! mutations and reloaded on startup for resume.

pub mod store;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::worktree::WorktreeInfo;

/// Lifecycle state as persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PersistedLifecycle {
    /// Session was active when snapshotted.
    Active,
    /// Session was paused (idle timeout, platform disabled).
    Paused,
    /// Session had ended; retained only for resume via header reactions.
    Ended,
}

/// One session record in the snapshot file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PersistedSession {
    /// Platform the thread lives on.
    pub platform_id: String,
    /// Thread id within the platform.
    pub thread_id: String,
    /// Bridge-side session id.
    pub session_id: String,
    /// Child-side session id used for `--resume`.
    pub claude_session_id: Option<String>,
    /// Working directory of the child.
    pub working_dir: String,
    /// Worktree the session ran in, if any.
    pub worktree_info: Option<WorktreeInfo>,
    /// User who started the session.
    pub started_by: String,
    /// Users allowed to control the session.
    pub allowed_users: Vec<String>,
    /// Session start time.
    pub started_at: DateTime<Utc>,
    /// Last activity time.
    pub last_activity_at: DateTime<Utc>,
    /// Whether a plan was already approved.
    pub plan_approved: bool,
    /// Whether the user forced interactive permissions.
    pub force_interactive_permissions: bool,
    /// Messages exchanged so far.
    pub message_count: u64,
    /// Pinned session-header post; target of resume reactions.
    pub session_start_post_id: Option<String>,
    /// Title derived from the first titled response.
    pub session_title: Option<String>,
    /// Lifecycle state at snapshot time.
    pub lifecycle_state: PersistedLifecycle,
}

/// The whole snapshot file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Snapshot {
    /// All persisted sessions.
    #[serde(default)]
    pub sessions: Vec<PersistedSession>,
    /// Which platforms were enabled at snapshot time.
    #[serde(default)]
    pub platform_enabled: HashMap<String, bool>,
}
