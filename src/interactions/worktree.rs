//! Worktree prompt machines.
//!
//! Three prompts share one transition table: the pre-session offer with
//! branch suggestions, the existing-worktree join offer, and the
//! creation-failure retry. Numbered reactions pick a suggestion, a typed
//! branch name retries creation, and ❌ proceeds in the main checkout
//! (withheld in require mode).

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::WorktreeMode;
use crate::emoji::{keycap_glyph, ReactionKind};
use crate::interactions::{Effect, InteractionCtx, PendingInteraction};
use crate::registry::PostRole;
use crate::session::SessionState;
use crate::worktree as git;
use crate::Result;

/// Entry: offer running the queued session in a worktree.
pub async fn begin_initial(
    state: &mut SessionState,
    ctx: &InteractionCtx<'_>,
    suggestions: Vec<String>,
) -> Result<()> {
    let mut body = String::from("\u{1f33f} **Run this session in a worktree?**\n");
    for (i, branch) in suggestions.iter().take(3).enumerate() {
        let n = u8::try_from(i + 1).unwrap_or(u8::MAX);
        body.push_str(&format!("{} `{branch}`\n", keycap_glyph(n)));
    }
    body.push_str("\nReact with a number, or reply with a branch name.");

    let mut reactions: Vec<&str> = ["one", "two", "three"]
        .into_iter()
        .take(suggestions.len().min(3))
        .collect();
    if state.worktree_mode != WorktreeMode::Require {
        body.push_str(" React \u{274c} to continue in the main checkout.");
        reactions.push("x");
    }

    let post = ctx
        .post_prompt(state, PostRole::WorktreePrompt, &body, &reactions)
        .await?;
    state.pending_interaction = Some(PendingInteraction::WorktreeInitial {
        post_id: post.id,
        suggestions,
    });
    Ok(())
}

/// Entry: the requested branch already has a worktree.
pub async fn begin_existing(
    state: &mut SessionState,
    ctx: &InteractionCtx<'_>,
    branch: &str,
    existing_path: &Path,
) -> Result<()> {
    let body = format!(
        "\u{1f33f} Branch `{branch}` already has a worktree at `{}`.\n\
         React \u{1f44d} to join it or \u{1f44e} to pick a different branch.",
        existing_path.display()
    );
    let post = ctx
        .post_prompt(state, PostRole::WorktreePrompt, &body, &["+1", "-1"])
        .await?;
    state.pending_interaction = Some(PendingInteraction::WorktreeExisting {
        post_id: post.id,
        branch: branch.to_owned(),
        existing_path: existing_path.to_path_buf(),
    });
    Ok(())
}

/// Entry: worktree creation failed; offer a retry.
pub async fn begin_failure(
    state: &mut SessionState,
    ctx: &InteractionCtx<'_>,
    failed_branch: &str,
    error: &str,
) -> Result<()> {
    let kind = git::WorktreeErrorKind::classify(error);
    let mut body = format!(
        "\u{26a0}\u{fe0f} Could not create a worktree for `{failed_branch}`:\n\
         `{error}`\n{}\n\nReply with a new branch name to retry.",
        kind.suggestion()
    );
    let mut reactions: Vec<&str> = Vec::new();
    if state.worktree_mode != WorktreeMode::Require {
        body.push_str(" React \u{274c} to continue in the main checkout.");
        reactions.push("x");
    }

    let post = ctx
        .post_prompt(state, PostRole::WorktreePrompt, &body, &reactions)
        .await?;
    state.pending_interaction = Some(PendingInteraction::WorktreeFailure {
        post_id: post.id,
        failed_branch: failed_branch.to_owned(),
        error: error.to_owned(),
    });
    Ok(())
}

/// Transition table shared by the three worktree prompts.
pub(crate) async fn handle_reaction(
    state: &mut SessionState,
    ctx: &InteractionCtx<'_>,
    kind: ReactionKind,
    user_label: &str,
) -> Result<Vec<Effect>> {
    let Some(pending) = state.pending_interaction.clone() else {
        return Ok(Vec::new());
    };

    match pending {
        PendingInteraction::WorktreeInitial { post_id, suggestions } => match kind {
            ReactionKind::Number(n) => {
                let Some(branch) = suggestions.get(usize::from(n).saturating_sub(1)) else {
                    return Ok(Vec::new());
                };
                let branch = branch.clone();
                state.pending_interaction = None;
                state.touch();
                ctx.resolve_prompt(
                    &post_id,
                    &format!("\u{1f33f} Worktree `{branch}` chosen by @{user_label}"),
                )
                .await;
                Ok(vec![Effect::CreateWorktree { branch }])
            }
            ReactionKind::Cancel if state.worktree_mode != WorktreeMode::Require => {
                state.pending_interaction = None;
                state.touch();
                ctx.resolve_prompt(&post_id, "\u{1f33f} Continuing in the main checkout.")
                    .await;
                Ok(vec![Effect::SkipWorktree])
            }
            _ => Ok(Vec::new()),
        },

        PendingInteraction::WorktreeExisting { post_id, branch, existing_path } => match kind {
            ReactionKind::Approve => {
                state.pending_interaction = None;
                state.touch();
                ctx.resolve_prompt(
                    &post_id,
                    &format!("\u{1f33f} Joining worktree `{branch}`"),
                )
                .await;
                Ok(vec![Effect::JoinWorktree { branch, path: existing_path }])
            }
            ReactionKind::Deny => {
                state.pending_interaction = None;
                ctx.resolve_prompt(&post_id, "\u{1f33f} Reply with a branch name to retry.")
                    .await;
                // Re-arm as a failure prompt so a typed branch retries.
                begin_failure(state, ctx, &branch, "branch already in use").await?;
                Ok(Vec::new())
            }
            _ => Ok(Vec::new()),
        },

        PendingInteraction::WorktreeFailure { post_id, .. } => match kind {
            ReactionKind::Cancel if state.worktree_mode != WorktreeMode::Require => {
                state.pending_interaction = None;
                state.touch();
                ctx.resolve_prompt(&post_id, "\u{1f33f} Continuing in the main checkout.")
                    .await;
                Ok(vec![Effect::SkipWorktree])
            }
            _ => Ok(Vec::new()),
        },

        _ => Ok(Vec::new()),
    }
}

/// Follow-up text while a worktree prompt is pending: a typed branch name.
pub(crate) async fn handle_followup(
    state: &mut SessionState,
    ctx: &InteractionCtx<'_>,
    text: &str,
) -> Result<Vec<Effect>> {
    let branch = text.trim();
    if let Err(err) = git::validate_branch_name(branch) {
        warn!(%err, branch, "rejected typed branch name");
        return Ok(vec![Effect::Notice {
            text: format!("\u{26a0}\u{fe0f} {err}. Try another branch name."),
        }]);
    }

    let pending_post = state
        .pending_interaction
        .as_ref()
        .map(|p| p.post_id().to_owned());
    state.pending_interaction = None;
    state.touch();
    if let Some(post_id) = pending_post {
        ctx.resolve_prompt(&post_id, &format!("\u{1f33f} Using branch `{branch}`"))
            .await;
    }

    // Joining beats creating when the branch already has a worktree.
    if let Some(repo) = git::repo_root(&state.working_dir).await {
        if let Ok(Some(path)) = git::find_worktree(&repo, branch).await {
            return Ok(vec![Effect::JoinWorktree {
                branch: branch.to_owned(),
                path: PathBuf::from(path),
            }]);
        }
    }

    Ok(vec![Effect::CreateWorktree { branch: branch.to_owned() }])
}
