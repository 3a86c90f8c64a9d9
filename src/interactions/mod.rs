//! Interaction state machines.
//!
//! An interaction is a finite dialogue between the bot and the thread that
//! pauses child-originated output until resolved. Each machine has an
//! entry action (post a prompt and seed reactions), a transition table
//! keyed by normalised reaction kind or follow-up text, and a completion
//! action expressed as [`Effect`]s for the session runtime to execute.
//! A session holds at most one pending interaction.

pub mod questions;
pub mod worktree;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::emoji::ReactionKind;
use crate::platform::{PlatformAdapter, Post};
use crate::registry::{PostRegistry, PostRole};
use crate::session::SessionState;
use crate::Result;

pub use questions::{Question, QuestionOption, QuestionSetState};

/// Thread-history inclusion choice from the context-selection prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextChoice {
    /// Start with no prior context.
    None,
    /// Prepend the last `n` thread messages.
    LastN(usize),
    /// Prepend the whole thread.
    WholeThread,
    /// Prepend only a note that the previous session timed out.
    TimeoutReason,
}

/// Completion actions handed back to the session runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send a continuation message to the child.
    SendToChild(String),
    /// Start the queued prompt with the chosen context.
    StartQueued {
        /// History inclusion choice.
        context: ContextChoice,
    },
    /// Create a worktree and restart the child in it.
    CreateWorktree {
        /// Branch to create or reuse.
        branch: String,
    },
    /// Join an existing worktree.
    JoinWorktree {
        /// Branch checked out there.
        branch: String,
        /// Worktree path.
        path: PathBuf,
    },
    /// Proceed in the main checkout with the queued prompt.
    SkipWorktree,
    /// Apply the pending update now (update-restart shutdown).
    ApplyUpdateNow,
    /// Defer the pending update.
    DeferUpdate,
    /// Forward an unauthorised user's message to the child once.
    ForwardMessage {
        /// The original message text.
        text: String,
    },
    /// Add a user to the session allow-list.
    AddAllowedUser {
        /// User id to add.
        user_id: String,
    },
    /// Resolve a child permission request.
    PermissionDecision {
        /// Request id from the child.
        request_id: String,
        /// Whether the action is allowed.
        approved: bool,
        /// Whether to stop prompting for the rest of the session.
        always: bool,
    },
    /// Write the bug report to disk and confirm in-thread.
    FileBugReport {
        /// Report title.
        title: String,
        /// Report body.
        body: String,
    },
    /// Post a short user-visible notice, leaving state unchanged.
    Notice {
        /// Notice text.
        text: String,
    },
}

/// The at-most-one pending interaction of a session.
#[derive(Debug, Clone)]
pub enum PendingInteraction {
    /// Plan ready, awaiting approve/deny.
    PlanApproval {
        /// Prompt post id.
        post_id: String,
    },
    /// Question set, one question at a time.
    QuestionSet(QuestionSetState),
    /// Pre-session worktree offer with branch suggestions.
    WorktreeInitial {
        /// Prompt post id.
        post_id: String,
        /// Up to three suggested branch names.
        suggestions: Vec<String>,
    },
    /// The requested branch already has a worktree.
    WorktreeExisting {
        /// Prompt post id.
        post_id: String,
        /// Branch name.
        branch: String,
        /// Existing worktree path.
        existing_path: PathBuf,
    },
    /// Worktree creation failed; offering a retry.
    WorktreeFailure {
        /// Prompt post id.
        post_id: String,
        /// Branch that failed.
        failed_branch: String,
        /// Error summary with suggestion.
        error: String,
    },
    /// Thread-history context selection before (re)start.
    ContextSelection {
        /// Prompt post id.
        post_id: String,
        /// Number of earlier messages in the thread.
        thread_message_count: usize,
        /// Whether this follows an idle-timeout resume.
        after_timeout: bool,
    },
    /// An update is available.
    UpdatePrompt {
        /// Prompt post id.
        post_id: String,
        /// Version on offer.
        latest_version: String,
    },
    /// An unauthorised user wrote in the thread.
    MessageApproval {
        /// Prompt post id.
        post_id: String,
        /// Author of the message.
        from_user: String,
        /// The message text.
        original_message: String,
    },
    /// Child-originated permission request.
    PermissionPrompt {
        /// Prompt post id.
        post_id: String,
        /// Request id from the child.
        request_id: String,
        /// What the child wants to do.
        description: String,
        /// Deadline after which the request is denied.
        expires_at: DateTime<Utc>,
    },
    /// Bug-report draft awaiting confirmation.
    BugReport {
        /// Draft post id.
        post_id: String,
        /// Draft title.
        draft_title: String,
        /// Draft body.
        draft_body: String,
    },
}

impl PendingInteraction {
    /// Post id the interaction currently listens on.
    #[must_use]
    pub fn post_id(&self) -> &str {
        match self {
            Self::PlanApproval { post_id }
            | Self::WorktreeInitial { post_id, .. }
            | Self::WorktreeExisting { post_id, .. }
            | Self::WorktreeFailure { post_id, .. }
            | Self::ContextSelection { post_id, .. }
            | Self::UpdatePrompt { post_id, .. }
            | Self::MessageApproval { post_id, .. }
            | Self::PermissionPrompt { post_id, .. }
            | Self::BugReport { post_id, .. } => post_id,
            Self::QuestionSet(set) => &set.current_post_id,
        }
    }
}

/// Shared handles the machines need for entry and transition actions.
pub struct InteractionCtx<'a> {
    /// Platform adapter of the owning session.
    pub adapter: &'a dyn PlatformAdapter,
    /// Post registry.
    pub registry: &'a PostRegistry,
}

impl InteractionCtx<'_> {
    /// Post an interactive prompt and register it under `role`.
    pub(crate) async fn post_prompt(
        &self,
        state: &SessionState,
        role: PostRole,
        text: &str,
        reactions: &[&str],
    ) -> Result<Post> {
        let post = self
            .adapter
            .create_interactive_post(&state.thread, text, reactions)
            .await?;
        self.registry.register(
            post.id.clone(),
            state.key.thread_id.clone(),
            state.key.clone(),
            role,
            None,
            None,
        );
        Ok(post)
    }

    /// Replace a prompt's body with its resolution text.
    pub(crate) async fn resolve_prompt(&self, post_id: &str, text: &str) {
        if let Err(err) = self.adapter.update_post(post_id, text).await {
            tracing::warn!(%err, post_id, "failed to update resolved prompt");
        }
    }
}

// ── Plan approval ─────────────────────────────────────────────────────────────

/// Entry: post the plan-approval prompt, unless a plan was already
/// approved this session, in which case the child auto-continues.
pub async fn begin_plan_approval(
    state: &mut SessionState,
    ctx: &InteractionCtx<'_>,
    plan: Option<&str>,
) -> Result<Vec<Effect>> {
    if state.plan_approved {
        info!(session = %state.key, "plan already approved, auto-continuing");
        return Ok(vec![Effect::SendToChild("Approved. Please proceed.".into())]);
    }

    let mut body = String::from("\u{1f4cb} **Plan ready for approval**\n");
    if let Some(plan) = plan {
        body.push('\n');
        body.push_str(plan.trim());
        body.push('\n');
    }
    body.push_str("\nReact \u{1f44d} to approve or \u{1f44e} to request changes.");

    let post = ctx
        .post_prompt(state, PostRole::Approval, &body, &["+1", "-1"])
        .await?;
    state.pending_interaction = Some(PendingInteraction::PlanApproval { post_id: post.id });
    Ok(Vec::new())
}

// ── Context selection ─────────────────────────────────────────────────────────

/// History depth offered as "last N".
pub const CONTEXT_LAST_N: usize = 5;

/// Entry: offer thread-history inclusion for the queued prompt.
pub async fn begin_context_selection(
    state: &mut SessionState,
    ctx: &InteractionCtx<'_>,
    thread_message_count: usize,
    after_timeout: bool,
) -> Result<()> {
    let first_option = if after_timeout {
        "Only note that the previous session timed out"
    } else {
        "No prior context"
    };
    let body = format!(
        "\u{1f4da} This thread has {thread_message_count} earlier message(s). Include them?\n\
         1\u{fe0f}\u{20e3} {first_option}\n\
         2\u{fe0f}\u{20e3} Last {CONTEXT_LAST_N} messages\n\
         3\u{fe0f}\u{20e3} Last {} messages\n\
         4\u{fe0f}\u{20e3} Whole thread",
        CONTEXT_LAST_N * 2
    );

    let post = ctx
        .post_prompt(
            state,
            PostRole::ContextPrompt,
            &body,
            &["one", "two", "three", "four"],
        )
        .await?;
    state.pending_interaction = Some(PendingInteraction::ContextSelection {
        post_id: post.id,
        thread_message_count,
        after_timeout,
    });
    Ok(())
}

// ── Update prompt ─────────────────────────────────────────────────────────────

/// Entry: announce an available update.
pub async fn begin_update_prompt(
    state: &mut SessionState,
    ctx: &InteractionCtx<'_>,
    latest_version: &str,
) -> Result<()> {
    let body = format!(
        "\u{2b06}\u{fe0f} Update `{latest_version}` is available. React \u{1f44d} to \
         update now (the session resumes after restart) or \u{1f44e} to defer."
    );
    let post = ctx
        .post_prompt(state, PostRole::UpdatePrompt, &body, &["+1", "-1"])
        .await?;
    state.pending_interaction = Some(PendingInteraction::UpdatePrompt {
        post_id: post.id,
        latest_version: latest_version.to_owned(),
    });
    Ok(())
}

// ── Message approval ──────────────────────────────────────────────────────────

/// Entry: an unauthorised user wrote in the session thread.
pub async fn begin_message_approval(
    state: &mut SessionState,
    ctx: &InteractionCtx<'_>,
    from_user: &str,
    from_label: &str,
    original_message: &str,
) -> Result<()> {
    let quoted: String = original_message
        .lines()
        .map(|l| format!("> {l}\n"))
        .collect();
    let body = format!(
        "\u{2709}\u{fe0f} @{from_label} wrote in this session thread:\n{quoted}\
         React \u{1f44d} to forward once, \u{2705} to invite them to the session, \
         or \u{1f44e} to ignore."
    );
    let post = ctx
        .post_prompt(
            state,
            PostRole::System,
            &body,
            &["+1", "white_check_mark", "-1"],
        )
        .await?;
    state.pending_interaction = Some(PendingInteraction::MessageApproval {
        post_id: post.id,
        from_user: from_user.to_owned(),
        original_message: original_message.to_owned(),
    });
    Ok(())
}

// ── Permission prompt ─────────────────────────────────────────────────────────

/// Entry: the child requests permission for a tool action.
pub async fn begin_permission_prompt(
    state: &mut SessionState,
    ctx: &InteractionCtx<'_>,
    request_id: &str,
    description: &str,
    timeout: chrono::Duration,
) -> Result<()> {
    let body = format!(
        "\u{1f510} **Permission request**\n{description}\n\
         React \u{1f44d} to allow, \u{2705} to allow for the rest of the session, \
         or \u{1f44e} to deny."
    );
    let post = ctx
        .post_prompt(
            state,
            PostRole::Permission,
            &body,
            &["+1", "white_check_mark", "-1"],
        )
        .await?;
    state.pending_interaction = Some(PendingInteraction::PermissionPrompt {
        post_id: post.id,
        request_id: request_id.to_owned(),
        description: description.to_owned(),
        expires_at: Utc::now() + timeout,
    });
    Ok(())
}

/// Deny an expired permission prompt. Returns the effects to execute, or
/// an empty list when nothing expired.
pub async fn check_permission_timeout(
    state: &mut SessionState,
    ctx: &InteractionCtx<'_>,
    now: DateTime<Utc>,
) -> Vec<Effect> {
    let Some(PendingInteraction::PermissionPrompt { post_id, request_id, expires_at, .. }) =
        state.pending_interaction.clone()
    else {
        return Vec::new();
    };
    if now < expires_at {
        return Vec::new();
    }

    state.pending_interaction = None;
    ctx.resolve_prompt(&post_id, "\u{23f1}\u{fe0f} Permission request timed out; denied.")
        .await;
    vec![Effect::PermissionDecision { request_id, approved: false, always: false }]
}

// ── Bug report ────────────────────────────────────────────────────────────────

/// Entry: draft a bug report from the description plus session context.
pub async fn begin_bug_report(
    state: &mut SessionState,
    ctx: &InteractionCtx<'_>,
    description: &str,
) -> Result<()> {
    let title: String = description.lines().next().unwrap_or("").chars().take(80).collect();
    let title = if title.is_empty() { "Untitled report".to_owned() } else { title };

    let mut body = format!("{description}\n\nSession: `{}`\n", state.key);
    if let Some(ref err) = state.last_error {
        body.push_str(&format!("Last error: {err}\n"));
    }
    if !state.recent_events.is_empty() {
        body.push_str("Recent events:\n");
        for event in &state.recent_events {
            body.push_str(&format!("- {event}\n"));
        }
    }

    let draft = format!(
        "\u{1f41b} **Bug report draft**\n**{title}**\n{body}\n\
         React \u{1f44d} to file or \u{1f44e} to discard."
    );
    let post = ctx
        .post_prompt(state, PostRole::BugReport, &draft, &["+1", "-1"])
        .await?;
    state.pending_interaction = Some(PendingInteraction::BugReport {
        post_id: post.id,
        draft_title: title,
        draft_body: body,
    });
    Ok(())
}

// ── Transitions ───────────────────────────────────────────────────────────────

/// Drive the pending interaction with a normalised reaction.
///
/// `post_id` must match the interaction's listening post; reactions on
/// other posts are ignored here. Returns the effects to execute.
pub async fn handle_reaction(
    state: &mut SessionState,
    ctx: &InteractionCtx<'_>,
    kind: ReactionKind,
    post_id: &str,
    user_label: &str,
) -> Result<Vec<Effect>> {
    let Some(pending) = state.pending_interaction.clone() else {
        return Ok(Vec::new());
    };
    if pending.post_id() != post_id {
        return Ok(Vec::new());
    }

    match pending {
        PendingInteraction::PlanApproval { post_id } => match kind {
            ReactionKind::Approve => {
                state.pending_interaction = None;
                state.plan_approved = true;
                state.touch();
                ctx.resolve_prompt(&post_id, &format!("\u{2705} Plan approved by @{user_label}"))
                    .await;
                Ok(vec![Effect::SendToChild("Approved. Please proceed.".into())])
            }
            ReactionKind::Deny => {
                state.pending_interaction = None;
                state.touch();
                ctx.resolve_prompt(
                    &post_id,
                    &format!("\u{274c} Plan rejected by @{user_label}; asked for revisions"),
                )
                .await;
                Ok(vec![Effect::SendToChild("Please revise the plan.".into())])
            }
            _ => Ok(Vec::new()),
        },

        PendingInteraction::QuestionSet(set) => {
            questions::handle_reaction(state, ctx, set, kind).await
        }

        PendingInteraction::WorktreeInitial { .. }
        | PendingInteraction::WorktreeExisting { .. }
        | PendingInteraction::WorktreeFailure { .. } => {
            worktree::handle_reaction(state, ctx, kind, user_label).await
        }

        PendingInteraction::ContextSelection { post_id, after_timeout, .. } => {
            let ReactionKind::Number(n) = kind else {
                return Ok(Vec::new());
            };
            let context = match (n, after_timeout) {
                (1, true) => ContextChoice::TimeoutReason,
                (1, false) => ContextChoice::None,
                (2, _) => ContextChoice::LastN(CONTEXT_LAST_N),
                (3, _) => ContextChoice::LastN(CONTEXT_LAST_N * 2),
                _ => ContextChoice::WholeThread,
            };
            state.pending_interaction = None;
            state.touch();
            ctx.resolve_prompt(&post_id, &format!("\u{1f4da} Context set by @{user_label}"))
                .await;
            Ok(vec![Effect::StartQueued { context }])
        }

        PendingInteraction::UpdatePrompt { post_id, latest_version } => match kind {
            ReactionKind::Approve => {
                state.pending_interaction = None;
                ctx.resolve_prompt(
                    &post_id,
                    &format!("\u{2b06}\u{fe0f} Updating to `{latest_version}`\u{2026}"),
                )
                .await;
                Ok(vec![Effect::ApplyUpdateNow])
            }
            ReactionKind::Deny => {
                state.pending_interaction = None;
                state.touch();
                ctx.resolve_prompt(&post_id, "\u{2b06}\u{fe0f} Update deferred.").await;
                Ok(vec![Effect::DeferUpdate])
            }
            _ => Ok(Vec::new()),
        },

        PendingInteraction::MessageApproval { post_id, from_user, original_message } => {
            match kind {
                ReactionKind::Approve => {
                    state.pending_interaction = None;
                    state.touch();
                    ctx.resolve_prompt(
                        &post_id,
                        &format!("\u{2709}\u{fe0f} Message forwarded by @{user_label}"),
                    )
                    .await;
                    Ok(vec![Effect::ForwardMessage { text: original_message }])
                }
                ReactionKind::AllowAll => {
                    state.pending_interaction = None;
                    state.allowed_users.insert(from_user.clone());
                    state.touch();
                    ctx.resolve_prompt(
                        &post_id,
                        &format!("\u{2705} Invited to the session by @{user_label}"),
                    )
                    .await;
                    Ok(vec![
                        Effect::AddAllowedUser { user_id: from_user },
                        Effect::ForwardMessage { text: original_message },
                    ])
                }
                ReactionKind::Deny => {
                    state.pending_interaction = None;
                    state.touch();
                    ctx.resolve_prompt(&post_id, "\u{2709}\u{fe0f} Message ignored.").await;
                    Ok(Vec::new())
                }
                _ => Ok(Vec::new()),
            }
        }

        PendingInteraction::PermissionPrompt { post_id, request_id, .. } => match kind {
            ReactionKind::Approve | ReactionKind::AllowAll => {
                let always = kind == ReactionKind::AllowAll;
                state.pending_interaction = None;
                state.touch();
                ctx.resolve_prompt(
                    &post_id,
                    &format!("\u{1f513} Allowed by @{user_label}"),
                )
                .await;
                Ok(vec![Effect::PermissionDecision { request_id, approved: true, always }])
            }
            ReactionKind::Deny => {
                state.pending_interaction = None;
                state.touch();
                ctx.resolve_prompt(&post_id, &format!("\u{1f512} Denied by @{user_label}"))
                    .await;
                Ok(vec![Effect::PermissionDecision { request_id, approved: false, always: false }])
            }
            _ => Ok(Vec::new()),
        },

        PendingInteraction::BugReport { post_id, draft_title, draft_body } => match kind {
            ReactionKind::Approve => {
                state.pending_interaction = None;
                state.touch();
                ctx.resolve_prompt(
                    &post_id,
                    &format!("\u{1f41b} Bug report filed: **{draft_title}**"),
                )
                .await;
                Ok(vec![Effect::FileBugReport { title: draft_title, body: draft_body }])
            }
            ReactionKind::Deny => {
                state.pending_interaction = None;
                state.touch();
                ctx.resolve_prompt(&post_id, "\u{1f41b} Bug report discarded.").await;
                Ok(Vec::new())
            }
            _ => Ok(Vec::new()),
        },
    }
}

/// Offer follow-up text to the pending interaction (typed branch names).
///
/// Returns `Some(effects)` when the text was consumed.
pub async fn handle_followup(
    state: &mut SessionState,
    ctx: &InteractionCtx<'_>,
    text: &str,
) -> Result<Option<Vec<Effect>>> {
    match state.pending_interaction {
        Some(
            PendingInteraction::WorktreeInitial { .. }
            | PendingInteraction::WorktreeExisting { .. }
            | PendingInteraction::WorktreeFailure { .. },
        ) => worktree::handle_followup(state, ctx, text).await.map(Some),
        _ => Ok(None),
    }
}

/// Cancel any pending interaction (session end, `!stop`).
pub async fn cancel_pending(state: &mut SessionState, ctx: &InteractionCtx<'_>) {
    let Some(pending) = state.pending_interaction.take() else {
        return;
    };
    info!(session = %state.key, "cancelling pending interaction");
    ctx.resolve_prompt(pending.post_id(), "\u{1f6ab} Cancelled.").await;
}
