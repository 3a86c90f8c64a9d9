//! Session manager: routing, caps, sweep, persistence, shutdown.
//!
//! The manager is a single task owning the session maps. Adapter events
//! arrive on one merged channel; everything that touches a session's state
//! is forwarded to that session's runtime task as a [`SessionOp`]. Cross-
//! session state (the maps, the registry) is only touched here and in the
//! registry's own short-locked operations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::child::ChildLauncher;
use crate::commands::{
    CommandAction, CommandContext, CommandRegistry, DispatchOutcome, Issuer, WorktreeCommand,
};
use crate::config::{GlobalConfig, PermissionsMode, WorktreeMode};
use crate::emoji::ReactionKind;
use crate::format::FormatterConfig;
use crate::persistence::store::SessionStore;
use crate::persistence::{PersistedLifecycle, PersistedSession, Snapshot};
use crate::platform::{FileInfo, PlatformAdapter, PlatformEvent, Post, ThreadRef, User};
use crate::registry::{PostRegistry, PostRole};
use crate::session::runtime::{
    self, SessionHandle, SessionLaunch, SessionNotice, SessionOp, StartMode,
};
use crate::session::{LifecycleState, SessionKey, SessionState};
use crate::worktree as git;
use crate::{breaker::BreakLimits, Result};

/// Idle-sweep interval.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Grace period for session teardown during shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Why the manager stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Normal shutdown (signal, `!kill`).
    Shutdown,
    /// Shutdown to apply an update; the supervisor restarts the process.
    UpdateRestart,
}

/// Owns all sessions across all platforms.
pub struct SessionManager {
    config: Arc<GlobalConfig>,
    registry: Arc<PostRegistry>,
    store: Arc<SessionStore>,
    launcher: Arc<dyn ChildLauncher>,
    commands: CommandRegistry,
    cli_binary: String,

    adapters: HashMap<String, Arc<dyn PlatformAdapter>>,
    sessions: HashMap<SessionKey, SessionHandle>,
    paused: HashMap<SessionKey, PersistedSession>,
    paused_headers: HashMap<String, SessionKey>,
    sticky_posts: HashMap<(String, String), String>,
    platform_enabled: HashMap<String, bool>,

    events_tx: mpsc::Sender<(String, PlatformEvent)>,
    events_rx: Option<mpsc::Receiver<(String, PlatformEvent)>>,
    notices_tx: mpsc::Sender<SessionNotice>,
    notices_rx: Option<mpsc::Receiver<SessionNotice>>,
    update_rx: watch::Receiver<Option<String>>,

    shutting_down: bool,
    stop_requested: bool,
    update_restart: bool,
}

impl SessionManager {
    /// Create a manager with no platforms attached yet.
    #[must_use]
    pub fn new(
        config: Arc<GlobalConfig>,
        store: Arc<SessionStore>,
        launcher: Arc<dyn ChildLauncher>,
        cli_binary: String,
        update_rx: watch::Receiver<Option<String>>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(512);
        let (notices_tx, notices_rx) = mpsc::channel(128);
        Self {
            config,
            registry: Arc::new(PostRegistry::new()),
            store,
            launcher,
            commands: CommandRegistry::builtin(),
            cli_binary,
            adapters: HashMap::new(),
            sessions: HashMap::new(),
            paused: HashMap::new(),
            paused_headers: HashMap::new(),
            sticky_posts: HashMap::new(),
            platform_enabled: HashMap::new(),
            events_tx,
            events_rx: Some(events_rx),
            notices_tx,
            notices_rx: Some(notices_rx),
            update_rx,
            shutting_down: false,
            stop_requested: false,
            update_restart: false,
        }
    }

    /// Shared post registry, exposed for tests.
    #[must_use]
    pub fn registry(&self) -> Arc<PostRegistry> {
        Arc::clone(&self.registry)
    }

    /// Attach a platform adapter and start forwarding its events.
    pub fn add_platform(
        &mut self,
        adapter: Arc<dyn PlatformAdapter>,
        mut events: mpsc::Receiver<PlatformEvent>,
    ) {
        let platform_id = adapter.platform_id().to_owned();
        self.platform_enabled.insert(platform_id.clone(), true);
        self.adapters.insert(platform_id.clone(), adapter);

        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if tx.send((platform_id.clone(), event)).await.is_err() {
                    break;
                }
            }
        });
    }

    /// Whether a live session occupies the thread.
    #[must_use]
    pub async fn is_in_session_thread(&self, key: &SessionKey) -> bool {
        let Some(handle) = self.sessions.get(key) else {
            return false;
        };
        let state = handle.state.lock().await;
        state.lifecycle.is_in_thread()
    }

    /// Load the snapshot and mark persisted sessions resumable.
    ///
    /// Sessions that were active within the idle timeout auto-resume;
    /// everything else waits for a resume reaction on its header.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` when the snapshot is unreadable.
    pub async fn resume_from_snapshot(&mut self) -> Result<()> {
        let snapshot = self.store.load()?;
        let timeout = chrono::Duration::milliseconds(
            i64::try_from(self.config.session_timeout_ms).unwrap_or(i64::MAX),
        );
        let now = chrono::Utc::now();

        for record in snapshot.sessions {
            if !self.adapters.contains_key(&record.platform_id) {
                debug!(platform = record.platform_id, "skipping session for unattached platform");
                continue;
            }
            let key = SessionKey::new(record.platform_id.clone(), record.thread_id.clone());
            let fresh_enough = now - record.last_activity_at < timeout;
            let auto_resume =
                record.lifecycle_state == PersistedLifecycle::Active && fresh_enough;

            if let Some(ref post_id) = record.session_start_post_id {
                self.paused_headers.insert(post_id.clone(), key.clone());
            }
            self.paused.insert(key.clone(), record);

            if auto_resume {
                info!(session = %key, "auto-resuming persisted session");
                self.resume_session(&key).await;
            }
        }

        info!(
            paused = self.paused.len(),
            active = self.sessions.len(),
            "resume from snapshot complete"
        );
        Ok(())
    }

    /// Run until cancelled. Returns why the manager stopped.
    pub async fn run(mut self, cancel: CancellationToken) -> StopReason {
        let Some(mut events_rx) = self.events_rx.take() else {
            return StopReason::Shutdown;
        };
        let Some(mut notices_rx) = self.notices_rx.take() else {
            return StopReason::Shutdown;
        };
        let mut update_rx = self.update_rx.clone();
        let mut update_watching = true;
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    self.shutdown(&mut notices_rx).await;
                    break;
                }

                Some((platform_id, event)) = events_rx.recv() => {
                    self.handle_platform_event(&platform_id, event).await;
                    if self.stop_requested {
                        self.shutdown(&mut notices_rx).await;
                        break;
                    }
                }

                Some(notice) = notices_rx.recv() => {
                    if self.handle_notice(notice).await {
                        // Shutdown was requested from inside a session.
                        self.shutdown(&mut notices_rx).await;
                        break;
                    }
                }

                _ = sweep.tick() => self.idle_sweep().await,

                changed = update_rx.changed(), if update_watching => {
                    match changed {
                        Ok(()) => {
                            let version = update_rx.borrow_and_update().clone();
                            if let Some(version) = version {
                                self.broadcast_update(&version).await;
                            }
                        }
                        Err(_) => {
                            // Updater gone; stop polling this arm.
                            update_watching = false;
                        }
                    }
                }
            }
        }

        if self.update_restart {
            StopReason::UpdateRestart
        } else {
            StopReason::Shutdown
        }
    }

    // ── Event routing ───────────────────────────────────────────────

    async fn handle_platform_event(&mut self, platform_id: &str, event: PlatformEvent) {
        if self.shutting_down {
            return;
        }
        match event {
            PlatformEvent::Message { post, user } | PlatformEvent::ChannelPost { post, user } => {
                self.route_post(platform_id, post, user).await;
            }
            PlatformEvent::Reaction { reaction, user } => {
                self.route_reaction(platform_id, &reaction.post_id, &reaction.emoji_name, user)
                    .await;
            }
            PlatformEvent::ReactionRemoved { .. } => {}
            PlatformEvent::Connected => {
                info!(platform_id, "platform connected");
                self.platform_enabled.insert(platform_id.to_owned(), true);
            }
            PlatformEvent::Disconnected => {
                warn!(platform_id, "platform disconnected");
                if !self.config.keep_alive {
                    // Without keep-alive, disconnected platforms park their
                    // sessions for resume after reconnect.
                    let keys: Vec<SessionKey> = self
                        .sessions
                        .keys()
                        .filter(|k| k.platform_id == platform_id)
                        .cloned()
                        .collect();
                    for key in keys {
                        self.send_op(&key, SessionOp::Shutdown).await;
                    }
                }
            }
            PlatformEvent::Reconnecting { attempt } => {
                info!(platform_id, attempt, "platform reconnecting");
            }
            PlatformEvent::Error { message } => {
                warn!(platform_id, message, "platform error");
            }
        }
    }

    async fn route_post(&mut self, platform_id: &str, post: Post, user: Option<User>) {
        let Some(adapter) = self.adapters.get(platform_id).cloned() else {
            return;
        };
        if post.user_id == adapter.bot_user_id() {
            return;
        }

        let thread = post.thread();
        let key = SessionKey::new(platform_id, thread.encode());
        let user = user.unwrap_or_else(|| User {
            id: post.user_id.clone(),
            ..User::default()
        });

        if self.sessions.contains_key(&key) {
            self.route_in_session(&adapter, &key, &post, &user).await;
            return;
        }

        if self.paused.contains_key(&key) {
            // An explicit follow-up wakes a paused session.
            if self.user_may_control_paused(&key, &adapter, &user.id) {
                self.resume_session(&key).await;
                self.route_in_session(&adapter, &key, &post, &user).await;
            }
            return;
        }

        // No session in this thread: only the bot's address starts one.
        let top_level = post.root_id.is_none();
        if !top_level && !adapter.mentions_bot(&post.message) {
            return;
        }
        if !adapter.is_user_allowed(&user.id) {
            debug!(user = user.id, "ignoring message from non-allowed user");
            return;
        }

        let prompt = adapter.extract_prompt(&post.message);
        self.handle_first_message(&adapter, key, thread, &post, &user, &prompt)
            .await;
    }

    async fn route_in_session(
        &mut self,
        adapter: &Arc<dyn PlatformAdapter>,
        key: &SessionKey,
        post: &Post,
        user: &User,
    ) {
        let Some(handle) = self.sessions.get(key) else {
            return;
        };

        let allowed = {
            let state = handle.state.lock().await;
            state.is_session_user(&user.id)
        } || adapter.is_user_allowed(&user.id);

        match self
            .commands
            .dispatch(&post.message, CommandContext::InSession, Issuer::User)
        {
            DispatchOutcome::Handled { action, elevated } => {
                if elevated && !allowed {
                    debug!(user = user.id, "unauthorized command silently ignored");
                    return;
                }
                let op = SessionOp::Command {
                    action,
                    user: user.clone(),
                    issuer: Issuer::User,
                };
                self.send_op(key, op).await;
            }
            DispatchOutcome::NotHandled => {
                let files = self.fetch_file_infos(adapter, &post.file_ids).await;
                let op = if allowed {
                    SessionOp::FollowUp {
                        text: post.message.clone(),
                        files,
                        user: user.clone(),
                    }
                } else {
                    SessionOp::UnauthorizedMessage {
                        text: post.message.clone(),
                        user: user.clone(),
                    }
                };
                self.send_op(key, op).await;
            }
        }
    }

    #[allow(clippy::too_many_lines)] // First-message dispatch is one table.
    async fn handle_first_message(
        &mut self,
        adapter: &Arc<dyn PlatformAdapter>,
        key: SessionKey,
        thread: ThreadRef,
        post: &Post,
        user: &User,
        prompt: &str,
    ) {
        let mut options = NewSessionOptions::default();
        let mut effective_prompt = prompt.to_owned();

        match self
            .commands
            .dispatch(prompt, CommandContext::FirstMessage, Issuer::User)
        {
            DispatchOutcome::Handled { action, .. } => match action {
                CommandAction::ShowHelp => {
                    self.reply(adapter, &thread, &self.commands.help_text()).await;
                    return;
                }
                CommandAction::ShowReleaseNotes => {
                    self.reply(adapter, &thread, runtime::RELEASE_NOTES).await;
                    return;
                }
                CommandAction::Update { now } => {
                    self.handle_standalone_update(adapter, &thread, now).await;
                    return;
                }
                CommandAction::Worktree(WorktreeCommand::Create { branch, remaining }) => {
                    options.worktree_branch = Some(branch);
                    effective_prompt = remaining;
                }
                CommandAction::Worktree(WorktreeCommand::Off) => {
                    options.worktree_mode_override = Some(WorktreeMode::Off);
                    effective_prompt = String::new();
                }
                CommandAction::Worktree(_) => {
                    self.reply(
                        adapter,
                        &thread,
                        "Start a session first; worktree management commands work in-session.",
                    )
                    .await;
                    return;
                }
                CommandAction::ChangeDir { path } => {
                    options.working_dir = Some(path);
                    effective_prompt = String::new();
                }
                CommandAction::Permissions { interactive, remaining } => {
                    if interactive {
                        options.force_interactive = true;
                    } else {
                        options.skip_permissions = Some(true);
                    }
                    effective_prompt = remaining;
                }
                CommandAction::Invalid { usage } => {
                    self.reply(adapter, &thread, &usage).await;
                    return;
                }
                other => {
                    debug!(?other, "command not applicable before a session exists");
                    return;
                }
            },
            DispatchOutcome::NotHandled => {
                if prompt.trim().starts_with('!') {
                    // An in-session-only command in first-message context
                    // is a no-op by design.
                    return;
                }
            }
        }

        let active = self.active_session_count().await;
        if active >= self.config.max_sessions as usize {
            warn!(session = %key, active, "session cap reached");
            self.reply(
                adapter,
                &thread,
                &format!(
                    "\u{1f6ab} Too busy: {active} session(s) are already running. \
                     Try again when one finishes."
                ),
            )
            .await;
            return;
        }

        let files = self.fetch_file_infos(adapter, &post.file_ids).await;
        self.start_session(adapter, key, thread, user, effective_prompt, files, options)
            .await;
    }

    async fn handle_standalone_update(
        &mut self,
        adapter: &Arc<dyn PlatformAdapter>,
        thread: &ThreadRef,
        now: Option<bool>,
    ) {
        match now {
            Some(true) => {
                self.reply(adapter, thread, "\u{2b06}\u{fe0f} Applying the update\u{2026}").await;
                self.update_restart = true;
                self.stop_requested = true;
            }
            Some(false) => {
                self.reply(adapter, thread, "\u{2b06}\u{fe0f} Update deferred.").await;
            }
            None => {
                let text = match self.update_rx.borrow().clone() {
                    Some(v) => format!(
                        "\u{2b06}\u{fe0f} Update `{v}` is available. Use `!update now` to apply."
                    ),
                    None => "No update is currently available.".to_owned(),
                };
                self.reply(adapter, thread, &text).await;
            }
        }
    }

    // ── Session lifecycle ───────────────────────────────────────────

    #[allow(clippy::too_many_arguments)] // Start sites provide each piece.
    async fn start_session(
        &mut self,
        adapter: &Arc<dyn PlatformAdapter>,
        key: SessionKey,
        thread: ThreadRef,
        user: &User,
        prompt: String,
        files: Vec<FileInfo>,
        options: NewSessionOptions,
    ) {
        let working_dir = match options.working_dir {
            Some(ref path) => {
                let expanded = if let Some(rest) = path.strip_prefix("~/") {
                    git::home_dir().join(rest)
                } else {
                    std::path::PathBuf::from(path)
                };
                match expanded.canonicalize() {
                    Ok(dir) if dir.is_dir() => dir,
                    _ => {
                        self.reply(adapter, &thread, &format!("\u{26a0}\u{fe0f} `{path}` is not a directory."))
                            .await;
                        return;
                    }
                }
            }
            None => self.config.working_dir.clone(),
        };

        let worktree_mode = options
            .worktree_mode_override
            .unwrap_or(self.config.worktree_mode);
        let skip_permissions = options
            .skip_permissions
            .unwrap_or(self.config.permissions_mode == PermissionsMode::Auto);

        let mut state = SessionState::new(
            key.clone(),
            thread.clone(),
            user.id.clone(),
            working_dir.clone(),
            worktree_mode,
            skip_permissions && !options.force_interactive,
        );
        state.force_interactive_permissions = options.force_interactive;

        // Decide the start path: explicit worktree, worktree precondition,
        // prior thread history, or straight in.
        let start = if let Some(branch) = options.worktree_branch {
            state.queued_prompt = Some(prompt);
            state.queued_files = files;
            StartMode::WorktreeFirst { branch }
        } else if self.worktree_precondition(&working_dir, worktree_mode).await {
            let suggestions = git::suggest_branches(&prompt);
            state.queued_prompt = Some(prompt);
            state.queued_files = files;
            StartMode::PreWorktree { suggestions }
        } else {
            let history = adapter
                .thread_history(&thread, 50, false)
                .await
                .map(|posts| posts.len().saturating_sub(1))
                .unwrap_or(0);
            if history > 0 {
                state.queued_prompt = Some(prompt);
                state.queued_files = files;
                StartMode::PreContext { thread_message_count: history, after_timeout: false }
            } else {
                StartMode::Immediate { prompt, files }
            }
        };

        info!(session = %key, dir = %working_dir.display(), "starting session");
        let handle = runtime::spawn(SessionLaunch {
            state,
            adapter: Arc::clone(adapter),
            registry: Arc::clone(&self.registry),
            launcher: Arc::clone(&self.launcher),
            notices: self.notices_tx.clone(),
            formatter_config: self.formatter_config(),
            permission_timeout: chrono::Duration::milliseconds(
                i64::try_from(self.config.permission_timeout_ms).unwrap_or(i64::MAX),
            ),
            chrome: self.config.chrome,
            cli_binary: self.cli_binary.clone(),
            start,
        });
        self.sessions.insert(key.clone(), handle);
        self.update_sticky(&key.platform_id, &thread.channel_id).await;
    }

    /// Whether the pre-session worktree prompt should fire.
    async fn worktree_precondition(&self, working_dir: &std::path::Path, mode: WorktreeMode) -> bool {
        if mode == WorktreeMode::Off {
            return false;
        }
        let Some(repo) = git::repo_root(working_dir).await else {
            return false;
        };
        if mode == WorktreeMode::Require {
            return true;
        }
        if git::has_uncommitted_changes(&repo).await.unwrap_or(false) {
            return true;
        }
        // A concurrent session already working in the same repository.
        for handle in self.sessions.values() {
            let state = handle.state.lock().await;
            if state.lifecycle.is_in_thread() && state.working_dir.starts_with(&repo) {
                return true;
            }
        }
        false
    }

    async fn resume_session(&mut self, key: &SessionKey) {
        let Some(record) = self.paused.remove(key) else {
            return;
        };
        if let Some(ref post_id) = record.session_start_post_id {
            self.paused_headers.remove(post_id);
        }
        let Some(adapter) = self.adapters.get(&key.platform_id).cloned() else {
            self.paused.insert(key.clone(), record);
            return;
        };

        let state = SessionState::from_persisted(&record, self.config.worktree_mode);
        let thread = state.thread.clone();
        let start = if record.claude_session_id.is_some() {
            StartMode::Resume
        } else {
            StartMode::PreContext { thread_message_count: 0, after_timeout: true }
        };

        info!(session = %key, "resuming session");
        let handle = runtime::spawn(SessionLaunch {
            state,
            adapter: Arc::clone(&adapter),
            registry: Arc::clone(&self.registry),
            launcher: Arc::clone(&self.launcher),
            notices: self.notices_tx.clone(),
            formatter_config: self.formatter_config(),
            permission_timeout: chrono::Duration::milliseconds(
                i64::try_from(self.config.permission_timeout_ms).unwrap_or(i64::MAX),
            ),
            chrome: self.config.chrome,
            cli_binary: self.cli_binary.clone(),
            start,
        });
        self.sessions.insert(key.clone(), handle);
        self.update_sticky(&key.platform_id, &thread.channel_id).await;
        self.persist_snapshot().await;
    }

    // ── Reactions ───────────────────────────────────────────────────

    async fn route_reaction(
        &mut self,
        platform_id: &str,
        post_id: &str,
        emoji_name: &str,
        user: Option<User>,
    ) {
        let Some(adapter) = self.adapters.get(platform_id).cloned() else {
            return;
        };
        let user = user.unwrap_or_default();
        if user.id == adapter.bot_user_id() {
            return;
        }
        let Some(kind) = ReactionKind::from_name(emoji_name) else {
            return;
        };

        // Reactions on a paused session's header resume or discard it.
        if let Some(key) = self.paused_headers.get(post_id).cloned() {
            if !self.user_may_control_paused(&key, &adapter, &user.id) {
                debug!(user = user.id, "unauthorized header reaction ignored");
                return;
            }
            match kind {
                ReactionKind::Resume => self.resume_session(&key).await,
                ReactionKind::Cancel => {
                    info!(session = %key, "discarding paused session");
                    if let Some(record) = self.paused.remove(&key) {
                        if let Some(ref header) = record.session_start_post_id {
                            self.paused_headers.remove(header);
                        }
                    }
                    self.persist_snapshot().await;
                }
                _ => {}
            }
            return;
        }

        let Some(record) = self.registry.get(post_id) else {
            return;
        };
        let key = record.session.clone();
        let Some(handle) = self.sessions.get(&key) else {
            return;
        };

        let allowed = {
            let state = handle.state.lock().await;
            state.is_session_user(&user.id)
        } || adapter.is_user_allowed(&user.id);
        if !allowed {
            debug!(user = user.id, "unauthorized reaction silently ignored");
            return;
        }

        if record.role == PostRole::SessionHeader {
            let op = match kind {
                ReactionKind::Cancel => SessionOp::Command {
                    action: CommandAction::Stop,
                    user,
                    issuer: Issuer::User,
                },
                ReactionKind::Interrupt => SessionOp::Command {
                    action: CommandAction::Escape,
                    user,
                    issuer: Issuer::User,
                },
                // Resume on an active session is a no-op.
                _ => return,
            };
            self.send_op(&key, op).await;
            return;
        }

        self.send_op(
            &key,
            SessionOp::Reaction { kind, post_id: post_id.to_owned(), user },
        )
        .await;
    }

    fn user_may_control_paused(
        &self,
        key: &SessionKey,
        adapter: &Arc<dyn PlatformAdapter>,
        user_id: &str,
    ) -> bool {
        if adapter.is_user_allowed(user_id) {
            return true;
        }
        self.paused
            .get(key)
            .is_some_and(|record| record.allowed_users.iter().any(|u| u == user_id))
    }

    // ── Notices, sweep, shutdown ────────────────────────────────────

    /// Returns `true` when the notice demands a process shutdown.
    async fn handle_notice(&mut self, notice: SessionNotice) -> bool {
        match notice {
            SessionNotice::Ended { key } | SessionNotice::Paused { key } => {
                if let Some(handle) = self.sessions.remove(&key) {
                    let (record, channel) = {
                        let state = handle.state.lock().await;
                        (state.to_persisted(), state.thread.channel_id.clone())
                    };
                    if let Some(ref post_id) = record.session_start_post_id {
                        self.paused_headers.insert(post_id.clone(), key.clone());
                    }
                    self.paused.insert(key.clone(), record);
                    handle.cancel.cancel();
                    self.update_sticky(&key.platform_id, &channel).await;
                }
                self.persist_snapshot().await;
                false
            }
            SessionNotice::Persist => {
                self.persist_snapshot().await;
                false
            }
            SessionNotice::KillProcess => {
                warn!("kill requested from a session");
                true
            }
            SessionNotice::ApplyUpdate => {
                info!("update accepted; shutting down for restart");
                self.update_restart = true;
                true
            }
        }
    }

    async fn idle_sweep(&mut self) {
        let timeout = chrono::Duration::milliseconds(
            i64::try_from(self.config.session_timeout_ms).unwrap_or(i64::MAX),
        );
        let now = chrono::Utc::now();

        // Collect first; never hold map borrows across the op sends.
        let mut timed_out = Vec::new();
        for (key, handle) in &self.sessions {
            let state = handle.state.lock().await;
            if state.lifecycle == LifecycleState::Active && now - state.last_activity_at > timeout
            {
                timed_out.push(key.clone());
            }
        }

        for key in timed_out {
            info!(session = %key, "session idle timeout");
            self.send_op(&key, SessionOp::Timeout).await;
        }
    }

    async fn broadcast_update(&mut self, version: &str) {
        info!(version, "broadcasting update availability");
        let keys: Vec<SessionKey> = self.sessions.keys().cloned().collect();
        for key in keys {
            self.send_op(&key, SessionOp::UpdateAvailable { version: version.to_owned() })
                .await;
        }
    }

    async fn shutdown(&mut self, notices_rx: &mut mpsc::Receiver<SessionNotice>) {
        info!("session manager shutting down");
        self.shutting_down = true;

        // Tell every session; they tear down and notify back.
        let keys: Vec<SessionKey> = self.sessions.keys().cloned().collect();
        for key in &keys {
            self.send_op(key, SessionOp::Shutdown).await;
        }

        // Drain teardown notices for a bounded grace period.
        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        while !self.sessions.is_empty() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                warn!(stuck = self.sessions.len(), "forcing session teardown");
                for handle in self.sessions.values() {
                    handle.cancel.cancel();
                }
                break;
            }
            match tokio::time::timeout(remaining, notices_rx.recv()).await {
                Ok(Some(notice)) => {
                    let _ = self.handle_notice(notice).await;
                }
                _ => break,
            }
        }

        // Sticky posts flip to offline.
        let stickies: Vec<((String, String), String)> = self
            .sticky_posts
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for ((platform_id, _channel), post_id) in stickies {
            if let Some(adapter) = self.adapters.get(&platform_id) {
                let _ = adapter
                    .update_post(&post_id, "\u{1f50c} thread-relay is offline.")
                    .await;
            }
        }

        self.persist_snapshot().await;

        for adapter in self.adapters.values() {
            if let Err(err) = adapter.disconnect().await {
                warn!(%err, "adapter disconnect failed");
            }
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn formatter_config(&self) -> FormatterConfig {
        FormatterConfig {
            limits: BreakLimits {
                soft_break_chars: self.config.stream.soft_break_chars,
                min_break_chars: self.config.stream.min_break_chars,
                max_lines_before_break: self.config.stream.max_lines_before_break,
                max_height_px: self.config.stream.max_height_px,
            },
            debounce: Duration::from_millis(self.config.stream.update_debounce_ms),
            typing_interval: Duration::from_millis(self.config.stream.typing_interval_ms),
            detailed_edits: false,
        }
    }

    async fn active_session_count(&self) -> usize {
        let mut count = 0;
        for handle in self.sessions.values() {
            let state = handle.state.lock().await;
            if state.lifecycle.is_in_thread() {
                count += 1;
            }
        }
        count
    }

    async fn send_op(&mut self, key: &SessionKey, op: SessionOp) {
        let Some(handle) = self.sessions.get(key) else {
            return;
        };
        if handle.ops.send(op).await.is_err() {
            warn!(session = %key, "session op channel closed; dropping handle");
            self.sessions.remove(key);
        }
    }

    async fn reply(&self, adapter: &Arc<dyn PlatformAdapter>, thread: &ThreadRef, text: &str) {
        if let Err(err) = adapter.create_post(thread, text).await {
            warn!(%err, "failed to post reply");
        }
    }

    async fn fetch_file_infos(
        &self,
        adapter: &Arc<dyn PlatformAdapter>,
        file_ids: &[String],
    ) -> Vec<FileInfo> {
        let mut infos = Vec::new();
        for id in file_ids {
            match adapter.file_info(id).await {
                Ok(info) => infos.push(info),
                Err(err) => warn!(%err, file_id = id, "failed to fetch file info"),
            }
        }
        infos
    }

    /// Create or refresh the pinned sticky status post for a channel.
    async fn update_sticky(&mut self, platform_id: &str, channel_id: &str) {
        let Some(adapter) = self.adapters.get(platform_id).cloned() else {
            return;
        };

        let mut lines = Vec::new();
        for handle in self.sessions.values() {
            let state = handle.state.lock().await;
            if state.thread.channel_id == channel_id && state.lifecycle.is_in_thread() {
                let title = state.session_title.clone().unwrap_or_else(|| "untitled".into());
                lines.push(format!("- {title} (started by <@{}>)", state.owner));
            }
        }
        let body = if lines.is_empty() {
            "\u{1f916} thread-relay is online. Mention me or post here to start a session."
                .to_owned()
        } else {
            format!(
                "\u{1f916} thread-relay is online \u{2014} {} active session(s):\n{}",
                lines.len(),
                lines.join("\n")
            )
        };

        let sticky_key = (platform_id.to_owned(), channel_id.to_owned());
        if let Some(post_id) = self.sticky_posts.get(&sticky_key) {
            if adapter.update_post(post_id, &body).await.is_ok() {
                return;
            }
            self.sticky_posts.remove(&sticky_key);
        }
        match adapter.create_channel_post(channel_id, &body).await {
            Ok(post) => {
                if let Err(err) = adapter.pin_post(&post.id).await {
                    debug!(%err, "could not pin sticky post");
                }
                self.sticky_posts.insert(sticky_key, post.id);
            }
            Err(err) => debug!(%err, "could not create sticky post"),
        }
    }

    async fn persist_snapshot(&self) {
        let mut snapshot = Snapshot {
            sessions: Vec::new(),
            platform_enabled: self.platform_enabled.clone(),
        };
        for handle in self.sessions.values() {
            let state = handle.state.lock().await;
            snapshot.sessions.push(state.to_persisted());
        }
        snapshot.sessions.extend(self.paused.values().cloned());

        if let Err(err) = self.store.save(&snapshot).await {
            warn!(%err, "failed to persist sessions");
        }
    }
}

/// Options pre-seeded by first-message commands.
#[derive(Debug, Default)]
struct NewSessionOptions {
    working_dir: Option<String>,
    skip_permissions: Option<bool>,
    force_interactive: bool,
    worktree_branch: Option<String>,
    worktree_mode_override: Option<WorktreeMode>,
}
