//! Per-thread session state and lifecycle.
//!
//! A session is the core's unit of state for one chat thread: owner and
//! allow-list, working directory, the child's resume id, the pending
//! interaction slot, streaming bookkeeping, and the lifecycle machine.
//! The runtime task in [`runtime`] owns all mutation; the manager in
//! [`manager`] owns the map of sessions.

pub mod manager;
pub mod message;
pub mod runtime;

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::config::WorktreeMode;
use crate::interactions::PendingInteraction;
use crate::persistence::{PersistedLifecycle, PersistedSession};
use crate::platform::{FileInfo, ThreadRef};
use crate::worktree::WorktreeInfo;

/// Number of recent events retained for bug reports.
const RECENT_EVENTS_CAP: usize = 50;

/// Session identity: one session per platform thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    /// Platform the thread lives on.
    pub platform_id: String,
    /// Opaque thread id within the platform.
    pub thread_id: String,
}

impl SessionKey {
    /// Build a key.
    #[must_use]
    pub fn new(platform_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            platform_id: platform_id.into(),
            thread_id: thread_id.into(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.platform_id, self.thread_id)
    }
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Child running, output flowing.
    Active,
    /// Child stopped, persistence retained for resume.
    Paused,
    /// Child being re-spawned (cd, worktree move, plugin change).
    Restarting,
    /// Teardown in progress.
    Ending,
    /// Fully torn down.
    Ended,
}

impl LifecycleState {
    /// Whether a transition to `next` is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Restarting | Self::Paused | Self::Ending)
                | (Self::Restarting, Self::Active | Self::Ending | Self::Ended)
                | (Self::Paused, Self::Active | Self::Ending)
                | (Self::Ending, Self::Ended)
        )
    }

    /// Whether the session counts as live in its thread.
    #[must_use]
    pub fn is_in_thread(self) -> bool {
        matches!(self, Self::Active | Self::Restarting)
    }
}

/// Full per-session state. Mutated only by the owning runtime task.
#[derive(Debug)]
pub struct SessionState {
    /// Session identity.
    pub key: SessionKey,
    /// Decoded thread reference.
    pub thread: ThreadRef,
    /// Bridge-side session id.
    pub session_id: String,
    /// User who started the session.
    pub owner: String,
    /// Users allowed to control the session (owner included).
    pub allowed_users: HashSet<String>,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Last activity time; drives the idle sweep.
    pub last_activity_at: DateTime<Utc>,
    /// Child working directory.
    pub working_dir: PathBuf,
    /// Worktree the session runs in, if any.
    pub worktree: Option<WorktreeInfo>,
    /// Lifecycle state.
    pub lifecycle: LifecycleState,
    /// Child-side session id for resume.
    pub child_session_id: Option<String>,
    /// Prompt parked while a pre-session decision is pending.
    pub queued_prompt: Option<String>,
    /// File attachments parked with the queued prompt.
    pub queued_files: Vec<FileInfo>,
    /// Child runs with permission checks skipped.
    pub skip_permissions: bool,
    /// User explicitly demanded interactive permissions.
    pub force_interactive_permissions: bool,
    /// Worktree prompting mode the session was created under.
    pub worktree_mode: WorktreeMode,
    /// Messages exchanged with the child.
    pub message_count: u64,
    /// Title from the first titled response.
    pub session_title: Option<String>,
    /// Most recent surfaced error, attached to bug reports.
    pub last_error: Option<String>,
    /// Last post authored on behalf of the session.
    pub last_message_id: Option<String>,
    /// Time of that post.
    pub last_message_at: Option<DateTime<Utc>>,
    /// Pinned session-header post; target of resume reactions.
    pub session_start_post_id: Option<String>,
    /// The at-most-one pending interaction.
    pub pending_interaction: Option<PendingInteraction>,
    /// Active subagents: tool-use id to status post id.
    pub active_subagents: HashMap<String, String>,
    /// Task-list mirror post.
    pub tasks_post_id: Option<String>,
    /// Whether the task list is collapsed.
    pub tasks_minimized: bool,
    /// A plan was approved; later plan exits auto-continue.
    pub plan_approved: bool,
    /// Ring buffer of recent events for debugging.
    pub recent_events: VecDeque<String>,
}

impl SessionState {
    /// Create a fresh active session.
    #[must_use]
    pub fn new(
        key: SessionKey,
        thread: ThreadRef,
        owner: impl Into<String>,
        working_dir: PathBuf,
        worktree_mode: WorktreeMode,
        skip_permissions: bool,
    ) -> Self {
        let owner = owner.into();
        let now = Utc::now();
        let mut allowed_users = HashSet::new();
        allowed_users.insert(owner.clone());
        Self {
            key,
            thread,
            session_id: uuid::Uuid::new_v4().to_string(),
            owner,
            allowed_users,
            started_at: now,
            last_activity_at: now,
            working_dir,
            worktree: None,
            lifecycle: LifecycleState::Active,
            child_session_id: None,
            queued_prompt: None,
            queued_files: Vec::new(),
            skip_permissions,
            force_interactive_permissions: false,
            worktree_mode,
            message_count: 0,
            session_title: None,
            last_error: None,
            last_message_id: None,
            last_message_at: None,
            session_start_post_id: None,
            pending_interaction: None,
            active_subagents: HashMap::new(),
            tasks_post_id: None,
            tasks_minimized: false,
            plan_approved: false,
            recent_events: VecDeque::new(),
        }
    }

    /// Reset the activity clock.
    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    /// Apply a lifecycle transition when valid. Returns whether it applied.
    pub fn transition_to(&mut self, next: LifecycleState) -> bool {
        if self.lifecycle.can_transition_to(next) {
            self.lifecycle = next;
            true
        } else {
            false
        }
    }

    /// Whether the user may control this session (allow-list membership).
    #[must_use]
    pub fn is_session_user(&self, user_id: &str) -> bool {
        self.allowed_users.contains(user_id)
    }

    /// Append to the debug ring buffer.
    pub fn record_event(&mut self, event: impl Into<String>) {
        if self.recent_events.len() == RECENT_EVENTS_CAP {
            self.recent_events.pop_front();
        }
        self.recent_events.push_back(event.into());
    }

    /// Seed the session title from the first assistant text, once.
    pub fn maybe_set_title(&mut self, text: &str) {
        if self.session_title.is_some() {
            return;
        }
        let first_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        let title: String = first_line.trim().chars().take(80).collect();
        if !title.is_empty() {
            self.session_title = Some(title);
        }
    }

    /// Snapshot for the persistence file.
    #[must_use]
    pub fn to_persisted(&self) -> PersistedSession {
        let lifecycle_state = match self.lifecycle {
            LifecycleState::Active | LifecycleState::Restarting => PersistedLifecycle::Active,
            LifecycleState::Paused => PersistedLifecycle::Paused,
            LifecycleState::Ending | LifecycleState::Ended => PersistedLifecycle::Ended,
        };
        PersistedSession {
            platform_id: self.key.platform_id.clone(),
            thread_id: self.key.thread_id.clone(),
            session_id: self.session_id.clone(),
            claude_session_id: self.child_session_id.clone(),
            working_dir: self.working_dir.to_string_lossy().into_owned(),
            worktree_info: self.worktree.clone(),
            started_by: self.owner.clone(),
            allowed_users: self.allowed_users.iter().cloned().collect(),
            started_at: self.started_at,
            last_activity_at: self.last_activity_at,
            plan_approved: self.plan_approved,
            force_interactive_permissions: self.force_interactive_permissions,
            message_count: self.message_count,
            session_start_post_id: self.session_start_post_id.clone(),
            session_title: self.session_title.clone(),
            lifecycle_state,
        }
    }

    /// Rebuild session state from a persisted record, in `Paused` state.
    #[must_use]
    pub fn from_persisted(record: &PersistedSession, worktree_mode: WorktreeMode) -> Self {
        let key = SessionKey::new(record.platform_id.clone(), record.thread_id.clone());
        let thread = ThreadRef::parse(&record.thread_id).unwrap_or(ThreadRef {
            channel_id: record.thread_id.clone(),
            root_id: record.thread_id.clone(),
        });
        let mut allowed_users: HashSet<String> = record.allowed_users.iter().cloned().collect();
        allowed_users.insert(record.started_by.clone());
        Self {
            key,
            thread,
            session_id: record.session_id.clone(),
            owner: record.started_by.clone(),
            allowed_users,
            started_at: record.started_at,
            last_activity_at: record.last_activity_at,
            working_dir: PathBuf::from(&record.working_dir),
            worktree: record.worktree_info.clone(),
            lifecycle: LifecycleState::Paused,
            child_session_id: record.claude_session_id.clone(),
            queued_prompt: None,
            queued_files: Vec::new(),
            skip_permissions: false,
            force_interactive_permissions: record.force_interactive_permissions,
            worktree_mode,
            message_count: record.message_count,
            session_title: record.session_title.clone(),
            last_error: None,
            last_message_id: None,
            last_message_at: None,
            session_start_post_id: record.session_start_post_id.clone(),
            pending_interaction: None,
            active_subagents: HashMap::new(),
            tasks_post_id: None,
            tasks_minimized: false,
            plan_approved: record.plan_approved,
            recent_events: VecDeque::new(),
        }
    }
}
