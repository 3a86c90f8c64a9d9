//! Post registry: typed index from platform post id to owning session.
//!
//! Every post the core creates on behalf of a session is recorded here so
//! that incoming reactions can be routed back to the session and so that a
//! session's posts can be evicted when it ends. The registry is an index
//! plus a role tag, not a lifetime tracker; eviction is explicit.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::session::SessionKey;

/// What a registered post is for. Drives reaction routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PostRole {
    /// Streamed assistant output.
    Content,
    /// The pinned first post of a session; target of resume reactions.
    SessionHeader,
    /// Collapsible task-list mirror.
    TaskList,
    /// Status line for one active subagent.
    SubagentStatus,
    /// A question-set prompt awaiting a numbered reaction.
    Question,
    /// Plan-approval prompt.
    Approval,
    /// Child-originated permission prompt.
    Permission,
    /// Worktree initial/existing/failure prompt.
    WorktreePrompt,
    /// Thread-history context-selection prompt.
    ContextPrompt,
    /// Update-available prompt.
    UpdatePrompt,
    /// Bug-report draft post.
    BugReport,
    /// Lifecycle notice (timeout, resume, shutdown).
    Lifecycle,
    /// Anything else the core posts (help text, errors).
    System,
}

/// Registry entry for one platform post.
#[derive(Debug, Clone)]
pub struct PostRecord {
    /// Platform post id.
    pub post_id: String,
    /// Thread the post lives in.
    pub thread_id: String,
    /// Owning session.
    pub session: SessionKey,
    /// Why the post exists.
    pub role: PostRole,
    /// Child tool invocation the post tracks, if any.
    pub tool_use_id: Option<String>,
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// Free-form extra context.
    pub metadata: Option<serde_json::Value>,
}

#[derive(Default)]
struct Inner {
    posts: HashMap<String, PostRecord>,
    by_session: HashMap<SessionKey, HashSet<String>>,
}

/// In-memory post index with a secondary session index.
///
/// All operations take a coarse internal lock for the duration of one map
/// mutation; none of them performs I/O or blocks.
#[derive(Default)]
pub struct PostRegistry {
    inner: Mutex<Inner>,
}

impl PostRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a post for a session. Re-registering an id replaces the
    /// previous record and keeps the secondary index consistent.
    pub fn register(
        &self,
        post_id: impl Into<String>,
        thread_id: impl Into<String>,
        session: SessionKey,
        role: PostRole,
        tool_use_id: Option<String>,
        metadata: Option<serde_json::Value>,
    ) {
        let post_id = post_id.into();
        let record = PostRecord {
            post_id: post_id.clone(),
            thread_id: thread_id.into(),
            session: session.clone(),
            role,
            tool_use_id,
            created_at: Utc::now(),
            metadata,
        };

        let mut inner = self.lock();
        if let Some(previous) = inner.posts.insert(post_id.clone(), record) {
            if previous.session != session {
                remove_from_index(&mut inner.by_session, &previous.session, &post_id);
            }
        }
        inner
            .by_session
            .entry(session)
            .or_default()
            .insert(post_id);
    }

    /// Remove a post. Returns whether it was present.
    pub fn unregister(&self, post_id: &str) -> bool {
        let mut inner = self.lock();
        let Some(record) = inner.posts.remove(post_id) else {
            return false;
        };
        remove_from_index(&mut inner.by_session, &record.session, post_id);
        true
    }

    /// Look up a post record.
    #[must_use]
    pub fn get(&self, post_id: &str) -> Option<PostRecord> {
        self.lock().posts.get(post_id).cloned()
    }

    /// Thread id of a registered post.
    #[must_use]
    pub fn thread_id(&self, post_id: &str) -> Option<String> {
        self.lock().posts.get(post_id).map(|r| r.thread_id.clone())
    }

    /// Owning session of a registered post.
    #[must_use]
    pub fn find_session(&self, post_id: &str) -> Option<SessionKey> {
        self.lock().posts.get(post_id).map(|r| r.session.clone())
    }

    /// All records owned by a session, in no particular order.
    #[must_use]
    pub fn list_for_session(&self, session: &SessionKey) -> Vec<PostRecord> {
        let inner = self.lock();
        let Some(ids) = inner.by_session.get(session) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| inner.posts.get(id).cloned())
            .collect()
    }

    /// Records owned by a session with the given role.
    #[must_use]
    pub fn list_by_role(&self, session: &SessionKey, role: PostRole) -> Vec<PostRecord> {
        self.list_for_session(session)
            .into_iter()
            .filter(|r| r.role == role)
            .collect()
    }

    /// Drop every record owned by a session. Returns the removed count.
    pub fn clear_session(&self, session: &SessionKey) -> usize {
        let mut inner = self.lock();
        let Some(ids) = inner.by_session.remove(session) else {
            return 0;
        };
        let mut removed = 0;
        for id in ids {
            if inner.posts.remove(&id).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.posts.clear();
        inner.by_session.clear();
    }

    /// Number of registered posts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().posts.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().posts.is_empty()
    }

    /// Whether a post id is registered.
    #[must_use]
    pub fn has(&self, post_id: &str) -> bool {
        self.lock().posts.contains_key(post_id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means another thread panicked mid-mutation; the
        // maps themselves are still structurally valid, so keep serving.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn remove_from_index(
    index: &mut HashMap<SessionKey, HashSet<String>>,
    session: &SessionKey,
    post_id: &str,
) {
    if let Some(set) = index.get_mut(session) {
        set.remove(post_id);
        if set.is_empty() {
            index.remove(session);
        }
    }
}
