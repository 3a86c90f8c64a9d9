//! Session runtime task.
//!
//! One task per session owns every mutation of that session's state: it
//! consumes child events, executes queued operations from the manager,
//! fires the debounced flush, ticks the typing indicator, and runs
//! interaction effects. Adapter callbacks never touch session state
//! directly; they enqueue a [`SessionOp`] instead.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::child::{ChildEvent, ChildLauncher, ChildProcess, ContentBlock, SpawnOptions};
use crate::commands::{
    CommandAction, CommandContext, CommandRegistry, Issuer, PluginCommand, WorktreeCommand,
};
use crate::emoji::ReactionKind;
use crate::format::tool_use::{self, PathContext};
use crate::format::{Diversion, FormatterConfig, StreamingFormatter};
use crate::interactions::{self, ContextChoice, Effect, InteractionCtx, PendingInteraction};
use crate::platform::{FileInfo, PlatformAdapter, User};
use crate::registry::{PostRegistry, PostRole};
use crate::session::message::{build_message_content, elision_notice};
use crate::session::{LifecycleState, SessionKey, SessionState};
use crate::worktree as git;
use crate::{AppError, Result};

/// Release notes posted by `!release-notes`.
pub const RELEASE_NOTES: &str = include_str!("../../RELEASE_NOTES.md");

/// How the session begins once its task starts.
#[derive(Debug)]
pub enum StartMode {
    /// Spawn the child and send the prompt immediately.
    Immediate {
        /// Initial prompt.
        prompt: String,
        /// Attachments on the first message.
        files: Vec<FileInfo>,
    },
    /// Ask the worktree question first; the prompt is queued in state.
    PreWorktree {
        /// Branch suggestions for the prompt.
        suggestions: Vec<String>,
    },
    /// Ask the context question first; the prompt is queued in state.
    PreContext {
        /// Earlier messages in the thread.
        thread_message_count: usize,
        /// Whether this follows an idle-timeout resume.
        after_timeout: bool,
    },
    /// Create the named worktree, then start with the queued prompt.
    WorktreeFirst {
        /// Branch to create.
        branch: String,
    },
    /// Resume a persisted session; the child restarts with `--resume`.
    Resume,
}

/// Operations the manager enqueues onto a session.
#[derive(Debug)]
pub enum SessionOp {
    /// A follow-up message from an allowed user.
    FollowUp {
        /// Message text.
        text: String,
        /// Attachments.
        files: Vec<FileInfo>,
        /// Author.
        user: User,
    },
    /// A normalised reaction on one of the session's posts.
    Reaction {
        /// Semantic reaction kind.
        kind: ReactionKind,
        /// Target post.
        post_id: String,
        /// Reacting user.
        user: User,
    },
    /// A pre-gated command.
    Command {
        /// Parsed action.
        action: CommandAction,
        /// Issuing user.
        user: User,
        /// Who issued it.
        issuer: Issuer,
    },
    /// A message from a user outside the session allow-list.
    UnauthorizedMessage {
        /// Message text.
        text: String,
        /// Author.
        user: User,
    },
    /// The updater announced a new version.
    UpdateAvailable {
        /// Version on offer.
        version: String,
    },
    /// The idle sweep decided this session timed out.
    Timeout,
    /// The process is shutting down.
    Shutdown,
}

/// Notifications the runtime sends back to the manager.
#[derive(Debug)]
pub enum SessionNotice {
    /// The session ended; remove its handle (persistence already updated).
    Ended {
        /// Which session.
        key: SessionKey,
    },
    /// The session paused; move it to the paused map.
    Paused {
        /// Which session.
        key: SessionKey,
    },
    /// Session state changed in a persistence-relevant way.
    Persist,
    /// `!kill`: terminate the whole process.
    KillProcess,
    /// Update accepted: shut down for the update-restart.
    ApplyUpdate,
}

/// Handle the manager keeps per active session.
pub struct SessionHandle {
    /// Shared state for sweep and persistence reads.
    pub state: Arc<Mutex<SessionState>>,
    /// Operation queue into the runtime task.
    pub ops: mpsc::Sender<SessionOp>,
    /// Cancels the runtime task.
    pub cancel: CancellationToken,
}

/// Everything needed to launch a session runtime.
pub struct SessionLaunch {
    /// Initial session state.
    pub state: SessionState,
    /// Adapter for the session's platform.
    pub adapter: Arc<dyn PlatformAdapter>,
    /// Shared post registry.
    pub registry: Arc<PostRegistry>,
    /// Child process factory.
    pub launcher: Arc<dyn ChildLauncher>,
    /// Notice channel back to the manager.
    pub notices: mpsc::Sender<SessionNotice>,
    /// Formatter tuning.
    pub formatter_config: FormatterConfig,
    /// Permission prompt timeout.
    pub permission_timeout: chrono::Duration,
    /// Start with browser tooling.
    pub chrome: bool,
    /// Assistant CLI binary, for out-of-band subcommands.
    pub cli_binary: String,
    /// How to begin.
    pub start: StartMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Spawn the runtime task and return its handle.
#[must_use]
pub fn spawn(launch: SessionLaunch) -> SessionHandle {
    let SessionLaunch {
        state,
        adapter,
        registry,
        launcher,
        notices,
        formatter_config,
        permission_timeout,
        chrome,
        cli_binary,
        start,
    } = launch;

    let path_ctx = PathContext {
        home: Some(git::home_dir()),
        worktree: state
            .worktree
            .as_ref()
            .map(|w| (w.path.clone(), w.branch.clone())),
    };
    let state = Arc::new(Mutex::new(state));
    let cancel = CancellationToken::new();
    let (ops_tx, ops_rx) = mpsc::channel(64);

    let runtime = SessionRuntime {
        state: Arc::clone(&state),
        adapter,
        registry,
        launcher,
        notices,
        formatter: StreamingFormatter::new(formatter_config, path_ctx),
        commands: CommandRegistry::builtin(),
        child: None,
        permission_timeout,
        chrome,
        cli_binary,
        available_update: None,
        cancel: cancel.clone(),
    };

    tokio::spawn(run(runtime, ops_rx, start));

    SessionHandle { state, ops: ops_tx, cancel }
}

struct SessionRuntime {
    state: Arc<Mutex<SessionState>>,
    adapter: Arc<dyn PlatformAdapter>,
    registry: Arc<PostRegistry>,
    launcher: Arc<dyn ChildLauncher>,
    notices: mpsc::Sender<SessionNotice>,
    formatter: StreamingFormatter,
    commands: CommandRegistry,
    child: Option<Arc<dyn ChildProcess>>,
    permission_timeout: chrono::Duration,
    chrome: bool,
    cli_binary: String,
    available_update: Option<String>,
    cancel: CancellationToken,
}

async fn recv_opt<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn run(
    mut rt: SessionRuntime,
    mut ops_rx: mpsc::Receiver<SessionOp>,
    start: StartMode,
) {
    let mut child_rx: Option<mpsc::Receiver<ChildEvent>> = None;

    if let Err(err) = rt.begin(start, &mut child_rx).await {
        warn!(%err, "session start failed");
        rt.post_system(&format!("\u{274c} Could not start the session: {err}"))
            .await;
        rt.teardown(true).await;
        return;
    }

    let mut typing = tokio::time::interval(rt.formatter.typing_interval());
    typing.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let cancel = rt.cancel.clone();

    loop {
        let flush_at = rt.formatter.flush_deadline();
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            op = ops_rx.recv() => {
                match op {
                    Some(op) => {
                        if rt.handle_op(op, &mut child_rx).await == Flow::Stop {
                            break;
                        }
                    }
                    None => break,
                }
            }

            event = recv_opt(&mut child_rx) => {
                match event {
                    Some(event) => {
                        if rt.handle_child_event(event, &mut child_rx).await == Flow::Stop {
                            break;
                        }
                    }
                    None => {
                        debug!("child event stream closed");
                        child_rx = None;
                    }
                }
            }

            () = sleep_opt(flush_at) => rt.flush_now().await,

            _ = typing.tick() => rt.periodic_tick().await,
        }
    }

    debug!("session runtime loop exited");
}

impl SessionRuntime {
    fn ctx(&self) -> InteractionCtx<'_> {
        InteractionCtx {
            adapter: self.adapter.as_ref(),
            registry: self.registry.as_ref(),
        }
    }

    async fn notify(&self, notice: SessionNotice) {
        if self.notices.send(notice).await.is_err() {
            debug!("manager notice channel closed");
        }
    }

    async fn persist(&self) {
        self.notify(SessionNotice::Persist).await;
    }

    /// Post a system-role message into the session thread.
    async fn post_system(&self, text: &str) {
        let state = self.state.lock().await;
        let thread = state.thread.clone();
        let key = state.key.clone();
        drop(state);

        match self.adapter.create_post(&thread, text).await {
            Ok(post) => {
                self.registry.register(
                    post.id,
                    key.thread_id.clone(),
                    key,
                    PostRole::System,
                    None,
                    None,
                );
            }
            Err(err) => warn!(%err, "failed to post system message"),
        }
    }

    /// Post or update the lifecycle notice post.
    async fn post_lifecycle(&self, text: &str) {
        let state = self.state.lock().await;
        let thread = state.thread.clone();
        let key = state.key.clone();
        drop(state);

        let existing = self.registry.list_by_role(&key, PostRole::Lifecycle);
        if let Some(record) = existing.first() {
            if self.adapter.update_post(&record.post_id, text).await.is_ok() {
                return;
            }
        }
        match self.adapter.create_post(&thread, text).await {
            Ok(post) => {
                self.registry.register(
                    post.id,
                    key.thread_id.clone(),
                    key,
                    PostRole::Lifecycle,
                    None,
                    None,
                );
            }
            Err(err) => warn!(%err, "failed to post lifecycle notice"),
        }
    }

    // ── Start paths ─────────────────────────────────────────────────

    async fn begin(
        &mut self,
        start: StartMode,
        child_rx: &mut Option<mpsc::Receiver<ChildEvent>>,
    ) -> Result<()> {
        self.ensure_session_header(matches!(start, StartMode::Resume)).await?;

        match start {
            StartMode::Immediate { prompt, files } => {
                self.start_child(child_rx, false).await?;
                self.send_user_message(&prompt, &files, None).await?;
            }
            StartMode::PreWorktree { suggestions } => {
                let mut state = self.state.lock().await;
                interactions::worktree::begin_initial(&mut state, &self.ctx(), suggestions)
                    .await?;
            }
            StartMode::PreContext { thread_message_count, after_timeout } => {
                let mut state = self.state.lock().await;
                interactions::begin_context_selection(
                    &mut state,
                    &self.ctx(),
                    thread_message_count,
                    after_timeout,
                )
                .await?;
            }
            StartMode::WorktreeFirst { branch } => {
                self.create_worktree_and_restart(child_rx, &branch).await?;
            }
            StartMode::Resume => {
                self.start_child(child_rx, true).await?;
                self.post_lifecycle("\u{1f504} Session resumed").await;
            }
        }

        self.persist().await;
        Ok(())
    }

    /// Post and pin the session-header post, once.
    async fn ensure_session_header(&mut self, resuming: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(ref post_id) = state.session_start_post_id {
            // Re-register so resume reactions keep working after restart.
            self.registry.register(
                post_id.clone(),
                state.key.thread_id.clone(),
                state.key.clone(),
                PostRole::SessionHeader,
                None,
                None,
            );
            return Ok(());
        }

        let title = state
            .session_title
            .clone()
            .or_else(|| state.queued_prompt.as_ref().map(|p| p.chars().take(80).collect()))
            .unwrap_or_else(|| "New session".into());
        let verb = if resuming { "resumed" } else { "started" };
        let body = format!(
            "\u{1f680} **Session {verb}** by <@{}>\n{title}\n\
             _React \u{23f8}\u{fe0f} to interrupt, \u{274c} to end, \u{1f504} to resume when paused._",
            state.owner
        );
        let post = self.adapter.create_post(&state.thread, &body).await?;
        if let Err(err) = self.adapter.pin_post(&post.id).await {
            debug!(%err, "could not pin session header");
        }
        self.registry.register(
            post.id.clone(),
            state.key.thread_id.clone(),
            state.key.clone(),
            PostRole::SessionHeader,
            None,
            None,
        );
        state.session_start_post_id = Some(post.id);
        Ok(())
    }

    /// Spawn (or re-spawn) the child for the current state.
    async fn start_child(
        &mut self,
        child_rx: &mut Option<mpsc::Receiver<ChildEvent>>,
        resume: bool,
    ) -> Result<()> {
        let mut state = self.state.lock().await;

        let resume_id = if resume { state.child_session_id.clone() } else { None };
        if resume_id.is_none() {
            state.child_session_id = Some(uuid::Uuid::new_v4().to_string());
        }
        let session_id = state
            .child_session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let options = SpawnOptions {
            working_dir: state.working_dir.clone(),
            thread_id: state.key.thread_id.clone(),
            skip_permissions: state.skip_permissions && !state.force_interactive_permissions,
            session_id,
            resume: resume_id,
            chrome: self.chrome,
            platform_config: self.adapter.mcp_permission_config(),
            append_system_prompt: None,
            permission_timeout_ms: u64::try_from(self.permission_timeout.num_milliseconds()).ok(),
        };
        drop(state);

        let (child, rx) = self.launcher.launch(options).await?;
        self.child = Some(child);
        *child_rx = Some(rx);

        let mut state = self.state.lock().await;
        state.transition_to(LifecycleState::Active);
        state.touch();
        Ok(())
    }

    /// Build and send a user message; arms typing and bumps counters.
    async fn send_user_message(
        &mut self,
        text: &str,
        files: &[FileInfo],
        context_prefix: Option<&str>,
    ) -> Result<()> {
        let Some(child) = self.child.clone() else {
            return Err(AppError::Child("no child process for this session".into()));
        };

        let full_text = match context_prefix {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}\n\n{text}"),
            _ => text.to_owned(),
        };

        let built = build_message_content(self.adapter.as_ref(), &full_text, files).await?;
        if let Some(notice) = elision_notice(&built.elided) {
            self.post_system(&notice).await;
        }
        child.send_message(built.content).await?;

        let mut state = self.state.lock().await;
        state.message_count += 1;
        state.touch();
        state.record_event(format!("user message ({} chars)", text.len()));
        let thread = state.thread.clone();
        drop(state);

        // First signal goes out immediately; the periodic tick re-sends.
        self.formatter.start_typing();
        if let Err(err) = self.adapter.send_typing(&thread).await {
            debug!(%err, "initial typing signal failed");
        }
        self.persist().await;
        Ok(())
    }

    /// Thread-history context prefix for a queued start.
    async fn build_context_prefix(&self, choice: ContextChoice) -> Option<String> {
        let limit = match choice {
            ContextChoice::None => return None,
            ContextChoice::TimeoutReason => {
                return Some(
                    "Note: the previous session in this thread was paused after an \
                     inactivity timeout."
                        .to_owned(),
                );
            }
            ContextChoice::LastN(n) => n,
            ContextChoice::WholeThread => 200,
        };

        let state = self.state.lock().await;
        let thread = state.thread.clone();
        drop(state);

        match self.adapter.thread_history(&thread, limit, true).await {
            Ok(posts) if !posts.is_empty() => {
                let mut prefix = String::from("Context from earlier in this thread:\n");
                for post in posts {
                    prefix.push_str(&format!("{}: {}\n", post.user_id, post.message));
                }
                Some(prefix)
            }
            Ok(_) => None,
            Err(err) => {
                warn!(%err, "failed to fetch thread history for context");
                None
            }
        }
    }

    /// Start the queued prompt (after a worktree/context decision).
    async fn start_queued(
        &mut self,
        child_rx: &mut Option<mpsc::Receiver<ChildEvent>>,
        context: ContextChoice,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let prompt = state.queued_prompt.take().unwrap_or_default();
        let files = std::mem::take(&mut state.queued_files);
        drop(state);

        if self.child.is_none() {
            self.start_child(child_rx, false).await?;
        }
        let prefix = self.build_context_prefix(context).await;
        if prompt.is_empty() && prefix.is_none() {
            return Ok(());
        }
        self.send_user_message(&prompt, &files, prefix.as_deref()).await
    }

    // ── Worktree plumbing ───────────────────────────────────────────

    async fn create_worktree_and_restart(
        &mut self,
        child_rx: &mut Option<mpsc::Receiver<ChildEvent>>,
        branch: &str,
    ) -> Result<()> {
        let state = self.state.lock().await;
        let working_dir = state.working_dir.clone();
        drop(state);

        let Some(repo) = git::repo_root(&working_dir).await else {
            self.post_system("\u{26a0}\u{fe0f} Not inside a git repository; continuing without a worktree.")
                .await;
            return self.start_queued(child_rx, ContextChoice::None).await;
        };

        // A branch that already has a worktree is a join offer, not a
        // creation failure.
        match git::find_worktree(&repo, branch).await {
            Ok(Some(path)) => {
                let mut state = self.state.lock().await;
                interactions::worktree::begin_existing(&mut state, &self.ctx(), branch, &path)
                    .await?;
                return Ok(());
            }
            Ok(None) => {}
            Err(err) => {
                warn!(%err, branch, "could not inspect existing worktrees");
            }
        }

        match git::create_worktree(&repo, branch).await {
            Ok(info) => {
                self.adopt_worktree(child_rx, info).await?;
                self.post_system(&format!("\u{1f33f} Created worktree for `{branch}`"))
                    .await;
                self.start_queued(child_rx, ContextChoice::None).await
            }
            Err(AppError::Worktree(message)) => {
                let mut state = self.state.lock().await;
                interactions::worktree::begin_failure(&mut state, &self.ctx(), branch, &message)
                    .await?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Move the session into a worktree and restart the child there.
    async fn adopt_worktree(
        &mut self,
        child_rx: &mut Option<mpsc::Receiver<ChildEvent>>,
        info: git::WorktreeInfo,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.transition_to(LifecycleState::Restarting);
        state.working_dir = info.path.clone();
        self.formatter.set_path_context(PathContext {
            home: Some(git::home_dir()),
            worktree: Some((info.path.clone(), info.branch.clone())),
        });
        state.worktree = Some(info);
        state.child_session_id = None;
        state.touch();
        drop(state);

        self.restart_child(child_rx).await
    }

    /// Kill the current child and spawn a fresh one (cd, worktree, plugin).
    async fn restart_child(
        &mut self,
        child_rx: &mut Option<mpsc::Receiver<ChildEvent>>,
    ) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            state.transition_to(LifecycleState::Restarting);
        }
        if self.formatter.has_pending() {
            self.flush_now_unchecked().await;
        }
        if let Some(child) = self.child.take() {
            if let Err(err) = child.kill().await {
                warn!(%err, "failed to kill child during restart");
            }
        }
        *child_rx = None;

        match self.start_child(child_rx, false).await {
            Ok(()) => {
                self.persist().await;
                Ok(())
            }
            Err(err) => {
                let mut state = self.state.lock().await;
                state.transition_to(LifecycleState::Ending);
                state.transition_to(LifecycleState::Ended);
                drop(state);
                Err(err)
            }
        }
    }

    // ── Flush and typing ────────────────────────────────────────────

    /// Debounced flush; gated off while an interaction is pending.
    async fn flush_now(&mut self) {
        let state = self.state.lock().await;
        if state.pending_interaction.is_some() {
            drop(state);
            // Leave content buffered; completion flushes explicitly.
            self.formatter.defer_flush();
            return;
        }
        drop(state);
        self.flush_now_unchecked().await;
    }

    async fn flush_now_unchecked(&mut self) {
        let state = self.state.lock().await;
        let key = state.key.clone();
        let thread = state.thread.clone();
        drop(state);

        if let Err(err) = self
            .formatter
            .flush(self.adapter.as_ref(), self.registry.as_ref(), &key, &thread)
            .await
        {
            warn!(%err, "flush failed");
            let mut state = self.state.lock().await;
            state.last_error = Some(err.to_string());
        } else {
            let mut state = self.state.lock().await;
            if let Some(post_id) = self.formatter.current_post_id() {
                state.last_message_id = Some(post_id.to_owned());
                state.last_message_at = Some(chrono::Utc::now());
            }
            state.touch();
        }
    }

    /// Periodic tick: typing indicator plus permission-timeout checks.
    async fn periodic_tick(&mut self) {
        let mut state = self.state.lock().await;
        let effects =
            interactions::check_permission_timeout(&mut state, &self.ctx(), chrono::Utc::now())
                .await;
        let typing_ok = self.formatter.typing()
            && state.pending_interaction.is_none()
            && state.lifecycle == LifecycleState::Active;
        let thread = state.thread.clone();
        drop(state);

        if !effects.is_empty() {
            let mut rx_placeholder = None;
            self.execute_effects(effects, &mut rx_placeholder).await;
        }
        if typing_ok {
            if let Err(err) = self.adapter.send_typing(&thread).await {
                debug!(%err, "typing signal failed");
            }
        }
    }

    // ── Child events ────────────────────────────────────────────────

    async fn handle_child_event(
        &mut self,
        event: ChildEvent,
        child_rx: &mut Option<mpsc::Receiver<ChildEvent>>,
    ) -> Flow {
        match event {
            ChildEvent::Assistant { blocks } => {
                self.handle_assistant(&blocks, child_rx).await;
                Flow::Continue
            }
            ChildEvent::User { blocks } => {
                self.handle_tool_results(&blocks).await;
                Flow::Continue
            }
            ChildEvent::TurnResult { usage, is_error, session_id } => {
                let mut state = self.state.lock().await;
                if let Some(id) = session_id {
                    state.child_session_id = Some(id);
                }
                if is_error {
                    state.record_event("turn ended with error");
                }
                if let Some(usage) = usage {
                    state.record_event(format!(
                        "turn done (in {} out {})",
                        usage.input_tokens, usage.output_tokens
                    ));
                }
                let gated = state.pending_interaction.is_some();
                drop(state);

                self.formatter.stop_typing();
                if !gated {
                    self.flush_now_unchecked().await;
                }
                self.formatter.end_turn();
                self.persist().await;
                Flow::Continue
            }
            ChildEvent::System { subtype, message } => {
                if subtype == "error" {
                    let text = message.unwrap_or_else(|| "unknown error".into());
                    let mut state = self.state.lock().await;
                    state.last_error = Some(text.clone());
                    state.record_event(format!("child error: {text}"));
                    drop(state);
                    self.formatter
                        .append(&tool_use::tool_result_line(false, &text));
                }
                Flow::Continue
            }
            ChildEvent::PermissionRequest { request_id, description } => {
                self.handle_permission_request(&request_id, &description).await;
                Flow::Continue
            }
            ChildEvent::Exit { code } => self.handle_child_exit(code).await,
        }
    }

    async fn handle_assistant(
        &mut self,
        blocks: &[ContentBlock],
        child_rx: &mut Option<mpsc::Receiver<ChildEvent>>,
    ) {
        let outcome = self.formatter.prepare_assistant(blocks);

        // Title from the first prose block, once.
        {
            let mut state = self.state.lock().await;
            for block in blocks {
                if let ContentBlock::Text { text } = block {
                    state.maybe_set_title(text);
                    break;
                }
            }
            state.record_event(format!("assistant event ({} blocks)", blocks.len()));
        }

        for diversion in outcome.diversions {
            self.handle_diversion(diversion, child_rx).await;
        }

        if outcome.suppressed {
            return;
        }

        // The child may drive a small command set through its own output.
        for block in blocks {
            if let ContentBlock::Text { text } = block {
                for line in crate::commands::extract_assistant_commands(&self.commands, text) {
                    if let crate::commands::DispatchOutcome::Handled { action, .. } = self
                        .commands
                        .dispatch(line, CommandContext::InSession, Issuer::Assistant)
                    {
                        info!(command = line, "executing assistant-emitted command");
                        let bot = User {
                            id: self.adapter.bot_user_id().to_owned(),
                            username: self.adapter.bot_name().to_owned(),
                            ..User::default()
                        };
                        let _ = self
                            .handle_command(action, &bot, Issuer::Assistant, child_rx)
                            .await;
                    }
                }
            }
        }

        for fragment in outcome.fragments {
            self.formatter.append(&fragment);
        }
        if self.formatter.should_flush_early() {
            self.flush_now().await;
        }
    }

    async fn handle_diversion(
        &mut self,
        diversion: Diversion,
        child_rx: &mut Option<mpsc::Receiver<ChildEvent>>,
    ) {
        match diversion {
            Diversion::PlanReady { input } => {
                self.flush_now_unchecked().await;
                let plan = input.get("plan").and_then(|v| v.as_str()).map(str::to_owned);
                let mut state = self.state.lock().await;
                if state.pending_interaction.is_some() {
                    warn!("plan ready while another interaction is pending; dropping");
                    return;
                }
                match interactions::begin_plan_approval(&mut state, &self.ctx(), plan.as_deref())
                    .await
                {
                    Ok(effects) => {
                        drop(state);
                        self.execute_effects(effects, child_rx).await;
                    }
                    Err(err) => warn!(%err, "failed to open plan approval"),
                }
            }
            Diversion::QuestionSet { tool_use_id, input } => {
                self.flush_now_unchecked().await;
                let mut state = self.state.lock().await;
                if state.pending_interaction.is_some() {
                    warn!("question set while another interaction is pending; dropping");
                    return;
                }
                if let Err(err) = interactions::questions::begin_question_set(
                    &mut state,
                    &self.ctx(),
                    &tool_use_id,
                    &input,
                )
                .await
                {
                    warn!(%err, "failed to open question set");
                }
            }
            Diversion::TaskList { input } => self.update_task_list(&input).await,
            Diversion::Subagent { tool_use_id, input } => {
                self.track_subagent(&tool_use_id, &input).await;
            }
        }
    }

    /// Mirror the child's task list into one collapsible post.
    async fn update_task_list(&mut self, input: &serde_json::Value) {
        let mut state = self.state.lock().await;
        let thread = state.thread.clone();
        let key = state.key.clone();
        let minimized = state.tasks_minimized;
        let existing = state.tasks_post_id.clone();

        let body = render_task_list(input, minimized);
        drop(state);

        if let Some(post_id) = existing {
            if self.adapter.update_post(&post_id, &body).await.is_ok() {
                return;
            }
        }
        match self
            .adapter
            .create_interactive_post(&thread, &body, &["arrow_down_small"])
            .await
        {
            Ok(post) => {
                self.registry.register(
                    post.id.clone(),
                    key.thread_id.clone(),
                    key,
                    PostRole::TaskList,
                    None,
                    None,
                );
                let mut state = self.state.lock().await;
                state.tasks_post_id = Some(post.id);
            }
            Err(err) => warn!(%err, "failed to post task list"),
        }
    }

    /// Post a status line for a started subagent.
    async fn track_subagent(&mut self, tool_use_id: &str, input: &serde_json::Value) {
        let description = input
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("subagent");
        let body = format!("\u{1f916} Subagent running: {description}");

        let state = self.state.lock().await;
        let thread = state.thread.clone();
        let key = state.key.clone();
        drop(state);

        match self.adapter.create_post(&thread, &body).await {
            Ok(post) => {
                self.registry.register(
                    post.id.clone(),
                    key.thread_id.clone(),
                    key,
                    PostRole::SubagentStatus,
                    Some(tool_use_id.to_owned()),
                    None,
                );
                let mut state = self.state.lock().await;
                state
                    .active_subagents
                    .insert(tool_use_id.to_owned(), post.id);
            }
            Err(err) => warn!(%err, "failed to post subagent status"),
        }
    }

    async fn handle_tool_results(&mut self, blocks: &[ContentBlock]) {
        for block in blocks {
            let ContentBlock::ToolResult { tool_use_id, content, is_error } = block else {
                continue;
            };

            let completed = {
                let mut state = self.state.lock().await;
                state.active_subagents.remove(tool_use_id)
            };
            if let Some(post_id) = completed {
                if let Err(err) = self
                    .adapter
                    .update_post(&post_id, "\u{1f916} Subagent finished")
                    .await
                {
                    debug!(%err, "failed to update subagent status");
                }
            }

            if *is_error {
                let summary = tool_result_summary(content);
                self.formatter
                    .append(&tool_use::tool_result_line(false, &summary));
                let mut state = self.state.lock().await;
                state.last_error = Some(summary);
            }
        }
        if self.formatter.should_flush_early() {
            self.flush_now().await;
        }
    }

    async fn handle_permission_request(&mut self, request_id: &str, description: &str) {
        let mut state = self.state.lock().await;
        if state.pending_interaction.is_some() {
            drop(state);
            warn!(request_id, "permission request while another interaction is pending; denying");
            if let Some(child) = self.child.clone() {
                let _ = child.respond_permission(request_id, false).await;
            }
            self.post_system("\u{1f512} A permission request arrived while another decision was open; it was denied.")
                .await;
            return;
        }

        self.formatter.stop_typing();
        if let Err(err) = interactions::begin_permission_prompt(
            &mut state,
            &self.ctx(),
            request_id,
            description,
            self.permission_timeout,
        )
        .await
        {
            warn!(%err, "failed to open permission prompt");
        }
    }

    async fn handle_child_exit(&mut self, code: Option<i32>) -> Flow {
        let state = self.state.lock().await;
        let lifecycle = state.lifecycle;
        drop(state);

        match lifecycle {
            // Expected during restart or teardown.
            LifecycleState::Restarting | LifecycleState::Ending | LifecycleState::Ended => {
                Flow::Continue
            }
            _ => {
                if code == Some(0) {
                    info!("child exited cleanly, ending session");
                    self.post_lifecycle("\u{1f3c1} The assistant exited; session ended. React \u{1f504} on the session header to start again.")
                        .await;
                } else {
                    let text = format!(
                        "\u{274c} The assistant exited unexpectedly ({}). React \u{1f504} on the session header to resume.",
                        code.map_or_else(|| "signal".to_owned(), |c| format!("code {c}"))
                    );
                    let mut state = self.state.lock().await;
                    state.last_error = Some(text.clone());
                    drop(state);
                    self.post_lifecycle(&text).await;
                }
                self.teardown(true).await;
                Flow::Stop
            }
        }
    }

    // ── Operations ──────────────────────────────────────────────────

    async fn handle_op(
        &mut self,
        op: SessionOp,
        child_rx: &mut Option<mpsc::Receiver<ChildEvent>>,
    ) -> Flow {
        match op {
            SessionOp::FollowUp { text, files, user } => {
                self.handle_followup(&text, files, &user, child_rx).await;
                Flow::Continue
            }
            SessionOp::Reaction { kind, post_id, user } => {
                self.handle_reaction(kind, &post_id, &user, child_rx).await;
                Flow::Continue
            }
            SessionOp::Command { action, user, issuer } => {
                self.handle_command(action, &user, issuer, child_rx).await
            }
            SessionOp::UnauthorizedMessage { text, user } => {
                let mut state = self.state.lock().await;
                if state.pending_interaction.is_some() {
                    debug!("dropping unauthorized message while interaction pending");
                    return Flow::Continue;
                }
                let label = if user.username.is_empty() { &user.id } else { &user.username };
                if let Err(err) = interactions::begin_message_approval(
                    &mut state,
                    &self.ctx(),
                    &user.id,
                    label,
                    &text,
                )
                .await
                {
                    warn!(%err, "failed to open message approval");
                }
                Flow::Continue
            }
            SessionOp::UpdateAvailable { version } => {
                self.available_update = Some(version.clone());
                let mut state = self.state.lock().await;
                if state.pending_interaction.is_none() {
                    if let Err(err) =
                        interactions::begin_update_prompt(&mut state, &self.ctx(), &version).await
                    {
                        warn!(%err, "failed to open update prompt");
                    }
                }
                Flow::Continue
            }
            SessionOp::Timeout => {
                self.pause("\u{23f1}\u{fe0f} Session timed out after inactivity. React \u{1f504} on the session header to resume.")
                    .await;
                Flow::Stop
            }
            SessionOp::Shutdown => {
                self.post_lifecycle("\u{1f50c} The bridge is shutting down; this session will be resumable after restart.")
                    .await;
                self.teardown(false).await;
                Flow::Stop
            }
        }
    }

    async fn handle_followup(
        &mut self,
        text: &str,
        files: Vec<FileInfo>,
        user: &User,
        child_rx: &mut Option<mpsc::Receiver<ChildEvent>>,
    ) {
        // A pending worktree prompt consumes the text as a branch name.
        let consumed = {
            let mut state = self.state.lock().await;
            match interactions::handle_followup(&mut state, &self.ctx(), text).await {
                Ok(effects) => effects,
                Err(err) => {
                    warn!(%err, "follow-up interaction failed");
                    None
                }
            }
        };
        if let Some(effects) = consumed {
            self.execute_effects(effects, child_rx).await;
            return;
        }

        let mut state = self.state.lock().await;
        state.record_event(format!("follow-up from {}", user.username));
        state.touch();
        drop(state);

        if let Err(err) = self.send_user_message(text, &files, None).await {
            warn!(%err, "failed to send follow-up");
            self.post_system(&format!("\u{26a0}\u{fe0f} Could not deliver the message: {err}"))
                .await;
        }
    }

    async fn handle_reaction(
        &mut self,
        kind: ReactionKind,
        post_id: &str,
        user: &User,
        child_rx: &mut Option<mpsc::Receiver<ChildEvent>>,
    ) {
        // Task-list collapse toggle rides outside the interaction slot.
        if kind == ReactionKind::Toggle {
            self.toggle_task_list(post_id).await;
            return;
        }
        if kind == ReactionKind::BugReport {
            let mut state = self.state.lock().await;
            if state.pending_interaction.is_none() {
                if let Err(err) =
                    interactions::begin_bug_report(&mut state, &self.ctx(), "Reported via reaction")
                        .await
                {
                    warn!(%err, "failed to open bug report");
                }
            }
            return;
        }

        let label = if user.username.is_empty() { &user.id } else { &user.username };
        let effects = {
            let mut state = self.state.lock().await;
            match interactions::handle_reaction(&mut state, &self.ctx(), kind, post_id, label)
                .await
            {
                Ok(effects) => effects,
                Err(err) => {
                    warn!(%err, "reaction transition failed");
                    Vec::new()
                }
            }
        };
        self.execute_effects(effects, child_rx).await;

        // Completing an interaction releases any deferred content.
        let pending_cleared = {
            let state = self.state.lock().await;
            state.pending_interaction.is_none()
        };
        if pending_cleared && self.formatter.has_pending() {
            self.flush_now_unchecked().await;
        }
    }

    async fn toggle_task_list(&mut self, post_id: &str) {
        let mut state = self.state.lock().await;
        if state.tasks_post_id.as_deref() != Some(post_id) {
            return;
        }
        state.tasks_minimized = !state.tasks_minimized;
        let minimized = state.tasks_minimized;
        drop(state);

        let body = if minimized {
            "\u{1f4cb} Task list (collapsed)".to_owned()
        } else {
            "\u{1f4cb} Task list".to_owned()
        };
        if let Err(err) = self.adapter.update_post(post_id, &body).await {
            debug!(%err, "failed to toggle task list");
        }
    }

    #[allow(clippy::too_many_lines)] // One arm per command; splitting hides the table.
    async fn handle_command(
        &mut self,
        action: CommandAction,
        user: &User,
        _issuer: Issuer,
        child_rx: &mut Option<mpsc::Receiver<ChildEvent>>,
    ) -> Flow {
        match action {
            CommandAction::ShowHelp => {
                let help = self.commands.help_text();
                self.post_system(&help).await;
                Flow::Continue
            }
            CommandAction::ShowReleaseNotes => {
                self.post_system(RELEASE_NOTES).await;
                Flow::Continue
            }
            CommandAction::Stop => {
                self.post_lifecycle("\u{1f6d1} Session ended. React \u{1f504} on the session header to start again.")
                    .await;
                self.teardown(true).await;
                Flow::Stop
            }
            CommandAction::Escape => {
                if let Some(child) = self.child.clone() {
                    if let Err(err) = child.interrupt().await {
                        warn!(%err, "interrupt failed");
                    }
                }
                self.formatter.stop_typing();
                let mut state = self.state.lock().await;
                state.record_event("turn interrupted");
                state.touch();
                drop(state);
                self.persist().await;
                Flow::Continue
            }
            CommandAction::Approve => {
                let pending_post = {
                    let state = self.state.lock().await;
                    match state.pending_interaction {
                        Some(PendingInteraction::PlanApproval { ref post_id }) => {
                            Some(post_id.clone())
                        }
                        _ => None,
                    }
                };
                if let Some(post_id) = pending_post {
                    self.handle_reaction(ReactionKind::Approve, &post_id, user, child_rx)
                        .await;
                } else {
                    self.post_system("Nothing is waiting for approval.").await;
                }
                Flow::Continue
            }
            CommandAction::Invite { user: target } => {
                let resolved = self.resolve_user(&target).await;
                let mut state = self.state.lock().await;
                state.allowed_users.insert(resolved.clone());
                state.touch();
                drop(state);
                self.post_system(&format!("\u{2705} @{target} can now control this session."))
                    .await;
                self.persist().await;
                Flow::Continue
            }
            CommandAction::Kick { user: target } => {
                let resolved = self.resolve_user(&target).await;
                let mut state = self.state.lock().await;
                if resolved == state.owner {
                    drop(state);
                    self.post_system("The session owner cannot be removed.").await;
                    return Flow::Continue;
                }
                state.allowed_users.remove(&resolved);
                state.touch();
                drop(state);
                self.post_system(&format!("\u{1f6aa} @{target} no longer controls this session."))
                    .await;
                self.persist().await;
                Flow::Continue
            }
            CommandAction::ChangeDir { path } => {
                self.change_directory(&path, child_rx).await;
                Flow::Continue
            }
            CommandAction::Permissions { interactive, .. } => {
                if interactive {
                    let mut state = self.state.lock().await;
                    state.force_interactive_permissions = true;
                    state.skip_permissions = false;
                    drop(state);
                    if let Err(err) = self.restart_child(child_rx).await {
                        warn!(%err, "restart after permission change failed");
                    }
                    self.post_system("\u{1f510} Permission prompts are now interactive.")
                        .await;
                } else {
                    // Privilege widening is a session-start decision only.
                    self.post_system(
                        "Permission skipping can only be enabled when starting a session.",
                    )
                    .await;
                }
                Flow::Continue
            }
            CommandAction::Worktree(cmd) => {
                self.handle_worktree_command(cmd, child_rx).await;
                Flow::Continue
            }
            CommandAction::Update { now } => {
                match now {
                    Some(true) => {
                        self.notify(SessionNotice::ApplyUpdate).await;
                    }
                    Some(false) => {
                        self.post_system("\u{2b06}\u{fe0f} Update deferred.").await;
                    }
                    None => {
                        let text = match self.available_update {
                            Some(ref v) => {
                                format!("\u{2b06}\u{fe0f} Update `{v}` is available. Use `!update now` to apply.")
                            }
                            None => "No update is currently available.".to_owned(),
                        };
                        self.post_system(&text).await;
                    }
                }
                Flow::Continue
            }
            CommandAction::Kill => {
                self.notify(SessionNotice::KillProcess).await;
                Flow::Continue
            }
            CommandAction::Bug { description } => {
                let mut state = self.state.lock().await;
                if state.pending_interaction.is_some() {
                    drop(state);
                    self.post_system("Finish the open prompt before filing a bug report.")
                        .await;
                } else if let Err(err) =
                    interactions::begin_bug_report(&mut state, &self.ctx(), &description).await
                {
                    warn!(%err, "failed to open bug report");
                }
                Flow::Continue
            }
            CommandAction::Plugin(cmd) => {
                self.handle_plugin_command(cmd, child_rx).await;
                Flow::Continue
            }
            CommandAction::Passthrough { name, rest } => {
                let text = if rest.is_empty() {
                    format!("/{name}")
                } else {
                    format!("/{name} {rest}")
                };
                if let Err(err) = self.send_user_message(&text, &[], None).await {
                    warn!(%err, "passthrough failed");
                }
                Flow::Continue
            }
            CommandAction::Invalid { usage } => {
                self.post_system(&usage).await;
                Flow::Continue
            }
        }
    }

    async fn resolve_user(&self, reference: &str) -> String {
        match self.adapter.user_by_username(reference).await {
            Ok(Some(user)) => user.id,
            _ => reference.to_owned(),
        }
    }

    async fn change_directory(
        &mut self,
        path: &str,
        child_rx: &mut Option<mpsc::Receiver<ChildEvent>>,
    ) {
        let expanded = if let Some(rest) = path.strip_prefix("~/") {
            git::home_dir().join(rest)
        } else {
            PathBuf::from(path)
        };
        let canonical = match tokio::fs::canonicalize(&expanded).await {
            Ok(p) => p,
            Err(err) => {
                self.post_system(&format!("\u{26a0}\u{fe0f} `{path}` is not usable: {err}"))
                    .await;
                return;
            }
        };
        if !canonical.is_dir() {
            self.post_system(&format!("\u{26a0}\u{fe0f} `{path}` is not a directory."))
                .await;
            return;
        }

        self.flush_now_unchecked().await;
        {
            let mut state = self.state.lock().await;
            state.working_dir = canonical.clone();
            // Child sessions are bound to their cwd; force a fresh one.
            state.child_session_id = None;
            state.worktree = None;
        }
        self.formatter.set_path_context(PathContext {
            home: Some(git::home_dir()),
            worktree: None,
        });

        match self.restart_child(child_rx).await {
            Ok(()) => {
                let display = tool_use::shorten_path(
                    &canonical.to_string_lossy(),
                    &PathContext { home: Some(git::home_dir()), worktree: None },
                );
                self.post_system(&format!("\u{1f4c2} Working directory changed to `{display}`"))
                    .await;
            }
            Err(err) => {
                self.post_system(&format!("\u{274c} Restart in `{path}` failed: {err}"))
                    .await;
            }
        }
    }

    async fn handle_worktree_command(
        &mut self,
        cmd: WorktreeCommand,
        child_rx: &mut Option<mpsc::Receiver<ChildEvent>>,
    ) {
        let working_dir = {
            let state = self.state.lock().await;
            state.working_dir.clone()
        };

        match cmd {
            WorktreeCommand::Create { branch, .. } => {
                if let Err(err) = self.create_worktree_and_restart(child_rx, &branch).await {
                    self.post_system(&format!("\u{26a0}\u{fe0f} Worktree creation failed: {err}"))
                        .await;
                }
            }
            WorktreeCommand::List => {
                let Some(repo) = git::repo_root(&working_dir).await else {
                    self.post_system("Not inside a git repository.").await;
                    return;
                };
                match git::list_worktrees(&repo).await {
                    Ok(list) if list.is_empty() => {
                        self.post_system("No worktrees.").await;
                    }
                    Ok(list) => {
                        let mut body = String::from("\u{1f33f} **Worktrees**\n");
                        for (path, branch) in list {
                            body.push_str(&format!("- `{branch}` at `{}`\n", path.display()));
                        }
                        self.post_system(&body).await;
                    }
                    Err(err) => {
                        self.post_system(&format!("\u{26a0}\u{fe0f} {err}")).await;
                    }
                }
            }
            WorktreeCommand::Switch { branch } => {
                let Some(repo) = git::repo_root(&working_dir).await else {
                    self.post_system("Not inside a git repository.").await;
                    return;
                };
                match git::find_worktree(&repo, &branch).await {
                    Ok(Some(path)) => {
                        let info = git::WorktreeInfo {
                            repo_root: repo,
                            path,
                            branch: branch.clone(),
                            is_owner: false,
                        };
                        if let Err(err) = self.adopt_worktree(child_rx, info).await {
                            self.post_system(&format!("\u{274c} Switch failed: {err}")).await;
                        } else {
                            self.post_system(&format!("\u{1f33f} Switched to worktree `{branch}`"))
                                .await;
                        }
                    }
                    Ok(None) => {
                        self.post_system(&format!("No worktree for `{branch}`.")).await;
                    }
                    Err(err) => {
                        self.post_system(&format!("\u{26a0}\u{fe0f} {err}")).await;
                    }
                }
            }
            WorktreeCommand::Remove { branch } => {
                let owned = {
                    let state = self.state.lock().await;
                    state.worktree.clone()
                };
                match owned {
                    Some(info) if info.branch == branch => {
                        match git::remove_worktree(&info, false).await {
                            Ok(true) => {
                                let mut state = self.state.lock().await;
                                state.worktree = None;
                                state.working_dir = info.repo_root.clone();
                                drop(state);
                                if let Err(err) = self.restart_child(child_rx).await {
                                    warn!(%err, "restart after worktree removal failed");
                                }
                                self.post_system(&format!("\u{1f33f} Removed worktree `{branch}`"))
                                    .await;
                            }
                            Ok(false) => {
                                self.post_system("This session does not own that worktree.")
                                    .await;
                            }
                            Err(err) => {
                                self.post_system(&format!("\u{26a0}\u{fe0f} {err}")).await;
                            }
                        }
                    }
                    _ => {
                        self.post_system("This session does not own that worktree.").await;
                    }
                }
            }
            WorktreeCommand::Cleanup => {
                let Some(repo) = git::repo_root(&working_dir).await else {
                    self.post_system("Not inside a git repository.").await;
                    return;
                };
                let in_use = {
                    let state = self.state.lock().await;
                    state.worktree.iter().map(|w| w.branch.clone()).collect::<Vec<_>>()
                };
                match git::cleanup_worktrees(&repo, &in_use).await {
                    Ok(count) => {
                        self.post_system(&format!("\u{1f9f9} Removed {count} unused worktree(s)."))
                            .await;
                    }
                    Err(err) => {
                        self.post_system(&format!("\u{26a0}\u{fe0f} {err}")).await;
                    }
                }
            }
            WorktreeCommand::Off => {
                self.post_system("Worktree prompting is skipped for this session.").await;
            }
        }
    }

    async fn handle_plugin_command(
        &mut self,
        cmd: PluginCommand,
        child_rx: &mut Option<mpsc::Receiver<ChildEvent>>,
    ) {
        let (args, restart): (Vec<String>, bool) = match cmd {
            PluginCommand::List => (vec!["plugin".into(), "list".into()], false),
            PluginCommand::Install { name } => {
                (vec!["plugin".into(), "install".into(), name], true)
            }
            PluginCommand::Uninstall { name } => {
                (vec!["plugin".into(), "uninstall".into(), name], true)
            }
        };

        let output = tokio::process::Command::new(&self.cli_binary)
            .args(&args)
            .output()
            .await;
        match output {
            Ok(out) => {
                let text = String::from_utf8_lossy(if out.status.success() {
                    &out.stdout
                } else {
                    &out.stderr
                });
                let text = text.trim();
                let body = if text.is_empty() { "(no output)" } else { text };
                self.post_system(&format!("```\n{body}\n```")).await;
            }
            Err(err) => {
                self.post_system(&format!("\u{26a0}\u{fe0f} Plugin command failed: {err}"))
                    .await;
                return;
            }
        }

        if restart {
            if let Err(err) = self.restart_child(child_rx).await {
                warn!(%err, "restart after plugin change failed");
            } else {
                self.post_system("\u{1f504} Assistant restarted with the plugin change.")
                    .await;
            }
        }
    }

    // ── Effects ─────────────────────────────────────────────────────

    async fn execute_effects(
        &mut self,
        effects: Vec<Effect>,
        child_rx: &mut Option<mpsc::Receiver<ChildEvent>>,
    ) {
        for effect in effects {
            match effect {
                Effect::SendToChild(text) => {
                    if let Err(err) = self.send_user_message(&text, &[], None).await {
                        warn!(%err, "failed to send continuation");
                    }
                }
                Effect::StartQueued { context } => {
                    if let Err(err) = self.start_queued(child_rx, context).await {
                        warn!(%err, "queued start failed");
                        self.post_system(&format!("\u{274c} Could not start: {err}")).await;
                    }
                }
                Effect::CreateWorktree { branch } => {
                    if let Err(err) = self.create_worktree_and_restart(child_rx, &branch).await {
                        warn!(%err, "worktree creation failed");
                        self.post_system(&format!("\u{26a0}\u{fe0f} {err}")).await;
                    }
                }
                Effect::JoinWorktree { branch, path } => {
                    let repo = {
                        let state = self.state.lock().await;
                        state.working_dir.clone()
                    };
                    let repo = git::repo_root(&repo).await.unwrap_or(repo);
                    let info = git::WorktreeInfo {
                        repo_root: repo,
                        path,
                        branch: branch.clone(),
                        is_owner: false,
                    };
                    match self.adopt_worktree(child_rx, info).await {
                        Ok(()) => {
                            self.post_system(&format!("\u{1f33f} Joined worktree `{branch}`"))
                                .await;
                            if let Err(err) =
                                self.start_queued(child_rx, ContextChoice::None).await
                            {
                                warn!(%err, "queued start after join failed");
                            }
                        }
                        Err(err) => {
                            self.post_system(&format!("\u{274c} Could not join worktree: {err}"))
                                .await;
                        }
                    }
                }
                Effect::SkipWorktree => {
                    let history_count = {
                        let state = self.state.lock().await;
                        let thread = state.thread.clone();
                        drop(state);
                        match self.adapter.thread_history(&thread, 50, true).await {
                            Ok(posts) => posts.len(),
                            Err(_) => 0,
                        }
                    };
                    if history_count > 1 {
                        let mut state = self.state.lock().await;
                        if let Err(err) = interactions::begin_context_selection(
                            &mut state,
                            &self.ctx(),
                            history_count,
                            false,
                        )
                        .await
                        {
                            warn!(%err, "failed to open context selection");
                        }
                    } else if let Err(err) =
                        self.start_queued(child_rx, ContextChoice::None).await
                    {
                        warn!(%err, "queued start failed");
                    }
                }
                Effect::ApplyUpdateNow => {
                    self.notify(SessionNotice::ApplyUpdate).await;
                }
                Effect::DeferUpdate => {}
                Effect::ForwardMessage { text } => {
                    if let Err(err) = self.send_user_message(&text, &[], None).await {
                        warn!(%err, "failed to forward message");
                    }
                }
                Effect::AddAllowedUser { .. } => {
                    self.persist().await;
                }
                Effect::PermissionDecision { request_id, approved, always } => {
                    if always && approved {
                        let mut state = self.state.lock().await;
                        state.skip_permissions = true;
                        state.force_interactive_permissions = false;
                    }
                    if let Some(child) = self.child.clone() {
                        if let Err(err) = child.respond_permission(&request_id, approved).await {
                            warn!(%err, "failed to deliver permission decision");
                        }
                    }
                    self.formatter.start_typing();
                }
                Effect::FileBugReport { title, body } => {
                    self.write_bug_report(&title, &body).await;
                }
                Effect::Notice { text } => {
                    self.post_system(&text).await;
                }
            }
        }
    }

    async fn write_bug_report(&self, title: &str, body: &str) {
        let dir = git::home_dir().join(".thread-relay").join("bug-reports");
        if let Err(err) = std::fs::create_dir_all(&dir) {
            warn!(%err, "could not create bug-report directory");
            return;
        }
        let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
        let path = dir.join(format!("{stamp}.md"));
        let contents = format!("# {title}\n\n{body}\n");
        if let Err(err) = std::fs::write(&path, contents) {
            warn!(%err, "could not write bug report");
        } else {
            info!(path = %path.display(), "bug report written");
        }
    }

    // ── Teardown ────────────────────────────────────────────────────

    /// Pause the session: child stops, persistence is retained, the
    /// session-header keeps accepting resume reactions.
    async fn pause(&mut self, notice: &str) {
        {
            let mut state = self.state.lock().await;
            interactions::cancel_pending(&mut state, &self.ctx()).await;
            state.transition_to(LifecycleState::Paused);
        }
        self.formatter.stop_typing();
        if self.formatter.has_pending() {
            self.flush_now_unchecked().await;
        }
        self.post_lifecycle(notice).await;

        if let Some(child) = self.child.take() {
            if let Err(err) = child.kill().await {
                warn!(%err, "failed to stop child on pause");
            }
        }

        let key = {
            let state = self.state.lock().await;
            state.key.clone()
        };
        self.notify(SessionNotice::Paused { key }).await;
    }

    /// End the session fully. Registry entries are evicted; persistence
    /// is retained so the session-header can still resume it.
    async fn teardown(&mut self, _user_initiated: bool) {
        {
            let mut state = self.state.lock().await;
            interactions::cancel_pending(&mut state, &self.ctx()).await;
            state.transition_to(LifecycleState::Ending);
        }
        self.formatter.stop_typing();
        if self.formatter.has_pending() {
            self.flush_now_unchecked().await;
        }
        if let Some(child) = self.child.take() {
            if let Err(err) = child.kill().await {
                warn!(%err, "failed to stop child on teardown");
            }
        }

        let key = {
            let mut state = self.state.lock().await;
            state.transition_to(LifecycleState::Ended);
            state.key.clone()
        };
        self.registry.clear_session(&key);
        self.notify(SessionNotice::Ended { key }).await;
    }
}

/// Render the `TodoWrite` payload into a checklist post.
fn render_task_list(input: &serde_json::Value, minimized: bool) -> String {
    if minimized {
        return "\u{1f4cb} Task list (collapsed)".to_owned();
    }

    let mut body = String::from("\u{1f4cb} **Tasks**\n");
    if let Some(todos) = input.get("todos").and_then(|v| v.as_array()) {
        for todo in todos {
            let content = todo.get("content").and_then(|v| v.as_str()).unwrap_or("");
            let status = todo.get("status").and_then(|v| v.as_str()).unwrap_or("pending");
            let mark = match status {
                "completed" => "\u{2705}",
                "in_progress" => "\u{1f527}",
                _ => "\u{2b1c}",
            };
            body.push_str(&format!("{mark} {content}\n"));
        }
    }
    body
}

/// Short display form of a tool-result payload.
fn tool_result_summary(content: &serde_json::Value) -> String {
    let text = match content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|i| i.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    };
    let flat = text.replace('\n', " ");
    let summary: String = flat.chars().take(120).collect();
    if flat.chars().count() > 120 {
        format!("{summary}\u{2026}")
    } else {
        summary
    }
}
