//! Worktree prompt flows over a real temporary repository.

use std::path::Path;
use std::time::Duration;

use thread_relay::commands::{CommandAction, Issuer, WorktreeCommand};
use thread_relay::emoji::ReactionKind;
use thread_relay::session::runtime::SessionOp;
use thread_relay::worktree::worktree_root;

use super::test_helpers::{spawn_immediate, user, wait_until};

/// `git init` plus one commit, so worktrees can be added.
fn init_repo(dir: &Path) {
    let git = |args: &[&str]| {
        let status = std::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .status()
            .expect("run git");
        assert!(status.success(), "git {args:?} failed");
    };
    git(&["init", "-q", "-b", "main"]);
    std::fs::write(dir.join("README.md"), "seed\n").expect("write seed file");
    git(&["add", "."]);
    git(&[
        "-c",
        "user.email=relay@test",
        "-c",
        "user.name=relay",
        "commit",
        "-q",
        "-m",
        "seed",
    ]);
}

#[tokio::test]
async fn existing_worktree_offers_a_join_prompt() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_repo(temp.path());

    // Pre-create a worktree for the branch the session will ask for.
    let existing = temp.path().join("wt-feature-x");
    let status = std::process::Command::new("git")
        .args(["worktree", "add", "-q", "-b", "feature-x"])
        .arg(&existing)
        .current_dir(temp.path())
        .status()
        .expect("run git worktree add");
    assert!(status.success());

    let fixture = spawn_immediate("work on it", temp.path()).await;
    fixture
        .handle
        .ops
        .send(SessionOp::Command {
            action: CommandAction::Worktree(WorktreeCommand::Create {
                branch: "feature-x".into(),
                remaining: String::new(),
            }),
            user: user("U1"),
            issuer: Issuer::User,
        })
        .await
        .expect("send op");

    // The join offer appears instead of a creation failure.
    let adapter = fixture.adapter.clone();
    assert!(
        wait_until(Duration::from_secs(3), || {
            adapter.find_message("already has a worktree").is_some()
        })
        .await,
        "existing branch must offer a join prompt"
    );
    assert!(fixture.adapter.find_message("Could not create a worktree").is_none());
    let prompt = fixture
        .adapter
        .find_message("already has a worktree")
        .expect("prompt");
    assert_eq!(prompt.reactions, vec!["+1".to_owned(), "-1".to_owned()]);

    // Joining restarts the child inside the existing worktree.
    fixture
        .handle
        .ops
        .send(SessionOp::Reaction {
            kind: ReactionKind::Approve,
            post_id: prompt.id,
            user: user("U1"),
        })
        .await
        .expect("send op");

    let adapter = fixture.adapter.clone();
    assert!(
        wait_until(Duration::from_secs(3), || {
            adapter.find_message("Joined worktree `feature-x`").is_some()
        })
        .await
    );
    assert!(
        wait_until(Duration::from_secs(3), || fixture.launcher.launch_count() == 2).await,
        "join must respawn the child in the worktree"
    );

    let state = fixture.handle.state.lock().await;
    let worktree = state.worktree.as_ref().expect("worktree info");
    assert_eq!(worktree.branch, "feature-x");
    assert!(!worktree.is_owner, "joined worktrees are not owned");
    assert_eq!(state.working_dir, worktree.path);
}

#[tokio::test]
async fn declining_a_join_rearms_for_a_retry_branch() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_repo(temp.path());

    let existing = temp.path().join("wt-feature-x");
    let status = std::process::Command::new("git")
        .args(["worktree", "add", "-q", "-b", "feature-x"])
        .arg(&existing)
        .current_dir(temp.path())
        .status()
        .expect("run git worktree add");
    assert!(status.success());

    let fixture = spawn_immediate("work on it", temp.path()).await;
    fixture
        .handle
        .ops
        .send(SessionOp::Command {
            action: CommandAction::Worktree(WorktreeCommand::Create {
                branch: "feature-x".into(),
                remaining: String::new(),
            }),
            user: user("U1"),
            issuer: Issuer::User,
        })
        .await
        .expect("send op");

    let adapter = fixture.adapter.clone();
    assert!(
        wait_until(Duration::from_secs(3), || {
            adapter.find_message("already has a worktree").is_some()
        })
        .await
    );
    let prompt = fixture
        .adapter
        .find_message("already has a worktree")
        .expect("prompt");

    fixture
        .handle
        .ops
        .send(SessionOp::Reaction {
            kind: ReactionKind::Deny,
            post_id: prompt.id,
            user: user("U1"),
        })
        .await
        .expect("send op");

    // The decline re-arms as a retry prompt that accepts a typed branch.
    let adapter = fixture.adapter.clone();
    assert!(
        wait_until(Duration::from_secs(3), || {
            adapter.find_message("Reply with a new branch name").is_some()
        })
        .await
    );

    fixture
        .handle
        .ops
        .send(SessionOp::FollowUp {
            text: "feature-y".into(),
            files: Vec::new(),
            user: user("U1"),
        })
        .await
        .expect("send op");

    let adapter = fixture.adapter.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            adapter.find_message("Created worktree for `feature-y`").is_some()
        })
        .await,
        "typed retry branch must create a fresh worktree"
    );

    let state = fixture.handle.state.lock().await;
    let worktree = state.worktree.as_ref().expect("worktree info");
    assert_eq!(worktree.branch, "feature-y");
    assert!(worktree.is_owner);
    assert!(worktree.path.starts_with(worktree_root()));

    // Leave nothing behind under the central root.
    let _ = std::fs::remove_dir_all(&worktree.path);
}
