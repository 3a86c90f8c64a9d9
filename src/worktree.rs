//! Git worktree orchestration.
//!
//! Sessions can opt into running inside a worktree under a central root
//! (`~/.thread-relay/worktrees`). The session that creates a worktree owns
//! it; joining sessions do not, and cleanup only ever deletes owned,
//! unused worktrees under the central root. All git access goes through
//! the `git` CLI.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

use crate::{AppError, Result};

/// Worktree a session runs in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorktreeInfo {
    /// Root of the repository the worktree links to.
    pub repo_root: PathBuf,
    /// Worktree path on disk.
    pub path: PathBuf,
    /// Checked-out branch.
    pub branch: String,
    /// Whether this session created the worktree.
    pub is_owner: bool,
}

/// Classified worktree failure, each with a human-readable suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorktreeErrorKind {
    /// The branch is checked out in another worktree.
    AlreadyCheckedOut,
    /// A branch or worktree with this name already exists.
    Exists,
    /// Filesystem permissions blocked the operation.
    PermissionDenied,
    /// The disk is full.
    NoSpace,
    /// A git lock file is in the way.
    Lock,
    /// The branch name is not a valid git ref.
    InvalidRef,
    /// Anything else.
    Generic,
}

impl WorktreeErrorKind {
    /// Classify a git error message.
    #[must_use]
    pub fn classify(stderr: &str) -> Self {
        let lower = stderr.to_lowercase();
        if lower.contains("already checked out") || lower.contains("already used by worktree") {
            Self::AlreadyCheckedOut
        } else if lower.contains("already exists") {
            Self::Exists
        } else if lower.contains("permission denied") {
            Self::PermissionDenied
        } else if lower.contains("no space left") {
            Self::NoSpace
        } else if lower.contains("index.lock")
            || (lower.contains("unable to create") && lower.contains(".lock"))
        {
            Self::Lock
        } else if lower.contains("not a valid ref") || lower.contains("invalid reference") {
            Self::InvalidRef
        } else {
            Self::Generic
        }
    }

    /// Suggestion shown in the worktree-failure prompt.
    #[must_use]
    pub fn suggestion(self) -> &'static str {
        match self {
            Self::AlreadyCheckedOut => {
                "that branch is checked out elsewhere; pick a different branch name"
            }
            Self::Exists => "a worktree or branch with that name exists; try another name or `!worktree switch`",
            Self::PermissionDenied => "check filesystem permissions on the worktree root",
            Self::NoSpace => "free up disk space and retry",
            Self::Lock => "another git process holds a lock; retry in a moment",
            Self::InvalidRef => "branch names may use letters, digits, `.`, `_`, `-` and `/`",
            Self::Generic => "retry with a different branch name",
        }
    }
}

#[allow(clippy::expect_used)] // The pattern is a compile-time constant.
fn branch_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/-]*$").expect("valid branch regex")
    })
}

/// Validate a branch name before handing it to git.
///
/// # Errors
///
/// Returns `AppError::InvalidInput` with the reason on rejection.
pub fn validate_branch_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 200 {
        return Err(AppError::InvalidInput("branch name must be 1-200 characters".into()));
    }
    if name.contains("..") || name.ends_with('/') || name.ends_with(".lock") {
        return Err(AppError::InvalidInput(format!("`{name}` is not a valid branch name")));
    }
    if !branch_pattern().is_match(name) {
        return Err(AppError::InvalidInput(format!("`{name}` is not a valid branch name")));
    }
    Ok(())
}

/// Central root all managed worktrees live under.
#[must_use]
pub fn worktree_root() -> PathBuf {
    home_dir().join(".thread-relay").join("worktrees")
}

/// Best-effort home directory.
#[must_use]
pub fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map_or_else(|| PathBuf::from("/"), PathBuf::from)
}

async fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|err| AppError::Worktree(format!("failed to run git: {err}")))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(AppError::Worktree(
            String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        ))
    }
}

/// Repository root containing `dir`, or `None` when outside a repository.
pub async fn repo_root(dir: &Path) -> Option<PathBuf> {
    match run_git(dir, &["rev-parse", "--show-toplevel"]).await {
        Ok(out) => {
            let trimmed = out.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(PathBuf::from(trimmed))
            }
        }
        Err(_) => None,
    }
}

/// Whether the repository has uncommitted changes.
///
/// # Errors
///
/// Returns `AppError::Worktree` when git fails.
pub async fn has_uncommitted_changes(repo: &Path) -> Result<bool> {
    let out = run_git(repo, &["status", "--porcelain"]).await?;
    Ok(!out.trim().is_empty())
}

/// Worktrees of a repository as `(path, branch)` pairs.
///
/// # Errors
///
/// Returns `AppError::Worktree` when git fails.
pub async fn list_worktrees(repo: &Path) -> Result<Vec<(PathBuf, String)>> {
    let out = run_git(repo, &["worktree", "list", "--porcelain"]).await?;
    let mut result = Vec::new();
    let mut current_path: Option<PathBuf> = None;
    for line in out.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            current_path = Some(PathBuf::from(path));
        } else if let Some(branch) = line.strip_prefix("branch ") {
            if let Some(path) = current_path.take() {
                let branch = branch.strip_prefix("refs/heads/").unwrap_or(branch);
                result.push((path, branch.to_owned()));
            }
        }
    }
    Ok(result)
}

/// Find an existing worktree checked out on `branch`.
///
/// # Errors
///
/// Returns `AppError::Worktree` when git fails.
pub async fn find_worktree(repo: &Path, branch: &str) -> Result<Option<PathBuf>> {
    let worktrees = list_worktrees(repo).await?;
    Ok(worktrees
        .into_iter()
        .find(|(_, b)| b == branch)
        .map(|(path, _)| path))
}

/// Create a worktree for `branch` under the central root.
///
/// Reuses the branch when it already exists, otherwise creates it from the
/// current HEAD. The returned info is marked owned.
///
/// # Errors
///
/// Returns `AppError::InvalidInput` for a bad branch name and
/// `AppError::Worktree` (classifiable via [`WorktreeErrorKind::classify`])
/// when git fails.
pub async fn create_worktree(repo: &Path, branch: &str) -> Result<WorktreeInfo> {
    validate_branch_name(branch)?;

    let repo_name = repo
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "repo".into());
    let slug = branch.replace('/', "-");
    let unique = uuid::Uuid::new_v4().simple().to_string();
    let short = &unique[..8];
    let path = worktree_root().join(format!("{repo_name}--{slug}--{short}"));

    std::fs::create_dir_all(worktree_root())
        .map_err(|err| AppError::Worktree(format!("failed to create worktree root: {err}")))?;

    let branch_exists = run_git(
        repo,
        &["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")],
    )
    .await
    .is_ok();

    let path_str = path.to_string_lossy().into_owned();
    let result = if branch_exists {
        run_git(repo, &["worktree", "add", &path_str, branch]).await
    } else {
        run_git(repo, &["worktree", "add", "-b", branch, &path_str]).await
    };
    result?;

    info!(branch, path = %path.display(), "worktree created");
    Ok(WorktreeInfo {
        repo_root: repo.to_path_buf(),
        path,
        branch: branch.to_owned(),
        is_owner: true,
    })
}

/// Remove a worktree if the ownership and containment rules allow it.
///
/// Deletes only when the caller owns the worktree, no other session uses
/// it, and the path lies under the central root. Returns whether anything
/// was removed.
///
/// # Errors
///
/// Returns `AppError::Worktree` when git refuses the removal.
pub async fn remove_worktree(info: &WorktreeInfo, used_by_others: bool) -> Result<bool> {
    if !info.is_owner || used_by_others {
        return Ok(false);
    }
    if !info.path.starts_with(worktree_root()) {
        warn!(path = %info.path.display(), "refusing to remove worktree outside central root");
        return Ok(false);
    }

    let path_str = info.path.to_string_lossy().into_owned();
    run_git(&info.repo_root, &["worktree", "remove", "--force", &path_str]).await?;
    info!(branch = info.branch, path = %info.path.display(), "worktree removed");
    Ok(true)
}

/// Remove every managed worktree of `repo` not in `in_use` (branch names).
///
/// # Errors
///
/// Returns `AppError::Worktree` when listing fails; individual removal
/// failures are logged and skipped.
pub async fn cleanup_worktrees(repo: &Path, in_use: &[String]) -> Result<usize> {
    let root = worktree_root();
    let mut removed = 0;
    for (path, branch) in list_worktrees(repo).await? {
        if !path.starts_with(&root) || in_use.contains(&branch) {
            continue;
        }
        let path_str = path.to_string_lossy().into_owned();
        match run_git(repo, &["worktree", "remove", "--force", &path_str]).await {
            Ok(_) => removed += 1,
            Err(err) => warn!(%err, branch, "failed to remove worktree during cleanup"),
        }
    }
    Ok(removed)
}

/// Derive up to three branch-name suggestions from a prompt.
///
/// Used to seed the pre-session worktree prompt; the interaction engine
/// itself never invents names.
#[must_use]
pub fn suggest_branches(prompt: &str) -> Vec<String> {
    let slug: String = prompt
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let words: Vec<&str> = slug.split('-').filter(|w| w.len() > 2).take(3).collect();
    if words.is_empty() {
        return vec!["session-work".into()];
    }

    let base = words.join("-");
    let mut out = vec![base.clone()];
    if words.len() > 1 {
        out.push(words[..2].join("-"));
    }
    out.push(format!("wip/{base}"));
    out.truncate(3);
    out.dedup();
    out
}
