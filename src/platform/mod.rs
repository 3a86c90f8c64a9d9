//! Platform-agnostic chat surface.
//!
//! The session core never talks to Slack or Mattermost directly; it
//! consumes the [`PlatformAdapter`] trait and the event stream the adapter
//! feeds into the manager. Concrete adapters live in [`slack`] and
//! [`mattermost`].

pub mod mattermost;
pub mod slack;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::Result;

/// A chat post as the core sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    /// Platform post id.
    pub id: String,
    /// Platform the post belongs to (`slack`, `mattermost`).
    pub platform_id: String,
    /// Channel containing the post.
    pub channel_id: String,
    /// Authoring user id.
    pub user_id: String,
    /// Raw message text.
    pub message: String,
    /// Root post id when the post is a thread reply.
    pub root_id: Option<String>,
    /// Post creation time.
    pub timestamp: DateTime<Utc>,
    /// Ids of files attached to the post.
    pub file_ids: Vec<String>,
}

impl Post {
    /// Thread reference this post belongs to (its own id when top-level).
    #[must_use]
    pub fn thread(&self) -> ThreadRef {
        ThreadRef {
            channel_id: self.channel_id.clone(),
            root_id: self.root_id.clone().unwrap_or_else(|| self.id.clone()),
        }
    }
}

/// A reaction added to or removed from a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaction {
    /// Reacting user id.
    pub user_id: String,
    /// Target post id.
    pub post_id: String,
    /// Platform emoji name, un-normalised.
    pub emoji_name: String,
    /// Reaction time.
    pub timestamp: DateTime<Utc>,
}

/// A platform user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct User {
    /// Platform user id.
    pub id: String,
    /// Login name.
    pub username: String,
    /// Display name, when distinct from the login name.
    pub display_name: String,
    /// E-mail address, when the platform exposes it.
    pub email: String,
}

/// Metadata for a file attached to a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Platform file id.
    pub id: String,
    /// Original filename.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// MIME type as reported by the platform.
    pub mime_type: String,
    /// Lower-cased filename extension without the dot.
    pub extension: String,
}

/// Addressable thread: channel plus root post.
///
/// Serialised as `channel|root` so the core can treat threads as opaque
/// string keys while adapters recover both halves.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadRef {
    /// Channel containing the thread.
    pub channel_id: String,
    /// Root post of the thread.
    pub root_id: String,
}

impl ThreadRef {
    /// Encode into the opaque thread id the core keys sessions by.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}|{}", self.channel_id, self.root_id)
    }

    /// Decode an opaque thread id. Returns `None` for malformed input.
    #[must_use]
    pub fn parse(thread_id: &str) -> Option<Self> {
        let (channel_id, root_id) = thread_id.split_once('|')?;
        if channel_id.is_empty() || root_id.is_empty() {
            return None;
        }
        Some(Self {
            channel_id: channel_id.to_owned(),
            root_id: root_id.to_owned(),
        })
    }
}

/// Events an adapter feeds into the session manager.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    /// A post in a thread the bot can see.
    Message {
        /// The post.
        post: Post,
        /// Author, when the adapter could resolve it.
        user: Option<User>,
    },
    /// A reaction was added.
    Reaction {
        /// The reaction.
        reaction: Reaction,
        /// Reacting user, when resolvable.
        user: Option<User>,
    },
    /// A reaction was removed.
    ReactionRemoved {
        /// The removed reaction.
        reaction: Reaction,
        /// Reacting user, when resolvable.
        user: Option<User>,
    },
    /// A top-level channel post (not inside an existing thread).
    ChannelPost {
        /// The post.
        post: Post,
        /// Author, when resolvable.
        user: Option<User>,
    },
    /// The realtime connection is established.
    Connected,
    /// The realtime connection dropped.
    Disconnected,
    /// A reconnect attempt is underway.
    Reconnecting {
        /// 1-based attempt counter.
        attempt: u32,
    },
    /// Adapter-level error the core should log.
    Error {
        /// Human-readable description.
        message: String,
    },
}

/// Platform-agnostic surface the session core consumes.
///
/// All methods that hit the network return [`AppError::Platform`]
/// (or [`AppError::RateLimited`]) on failure; transient errors are retried
/// inside the adapter before surfacing.
///
/// [`AppError::Platform`]: crate::AppError::Platform
/// [`AppError::RateLimited`]: crate::AppError::RateLimited
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Stable platform identifier (`slack`, `mattermost`).
    fn platform_id(&self) -> &str;

    /// Establish the realtime connection and start emitting events.
    async fn connect(&self) -> Result<()>;

    /// Tear the connection down; no further events are emitted.
    async fn disconnect(&self) -> Result<()>;

    /// Quiesce outgoing traffic ahead of a deliberate reconnect.
    async fn prepare_for_reconnect(&self) -> Result<()>;

    /// Bot account login name.
    fn bot_name(&self) -> &str;

    /// Bot account user id.
    fn bot_user_id(&self) -> &str;

    /// Look a user up by id.
    async fn user_by_id(&self, user_id: &str) -> Result<Option<User>>;

    /// Look a user up by login name.
    async fn user_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Whether the user is on the platform allow-list.
    fn is_user_allowed(&self, user_id: &str) -> bool;

    /// Whether the message text addresses the bot.
    fn mentions_bot(&self, text: &str) -> bool;

    /// Strip the bot mention and surrounding noise from a message.
    fn extract_prompt(&self, text: &str) -> String;

    /// Create a post in a thread. Returns the created post.
    async fn create_post(&self, thread: &ThreadRef, message: &str) -> Result<Post>;

    /// Create a top-level channel post (sticky status, announcements).
    async fn create_channel_post(&self, channel_id: &str, message: &str) -> Result<Post>;

    /// Replace the text of an existing post.
    async fn update_post(&self, post_id: &str, message: &str) -> Result<()>;

    /// Fetch a post by id.
    async fn get_post(&self, post_id: &str) -> Result<Post>;

    /// Delete a post.
    async fn delete_post(&self, post_id: &str) -> Result<()>;

    /// Pin a post to its channel.
    async fn pin_post(&self, post_id: &str) -> Result<()>;

    /// Remove a pin.
    async fn unpin_post(&self, post_id: &str) -> Result<()>;

    /// Pinned posts of a channel.
    async fn get_pinned_posts(&self, channel_id: &str) -> Result<Vec<Post>>;

    /// Create a post and seed it with the given reactions, in order.
    async fn create_interactive_post(
        &self,
        thread: &ThreadRef,
        message: &str,
        reactions: &[&str],
    ) -> Result<Post>;

    /// Emit a typing indicator for the thread.
    async fn send_typing(&self, thread: &ThreadRef) -> Result<()>;

    /// Add a reaction to a post.
    async fn add_reaction(&self, post_id: &str, emoji_name: &str) -> Result<()>;

    /// Remove one of the bot's reactions from a post.
    async fn remove_reaction(&self, post_id: &str, emoji_name: &str) -> Result<()>;

    /// Posts of a thread, oldest first, capped at `limit`.
    async fn thread_history(
        &self,
        thread: &ThreadRef,
        limit: usize,
        exclude_bot: bool,
    ) -> Result<Vec<Post>>;

    /// Download a file attachment.
    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>>;

    /// Metadata of a file attachment.
    async fn file_info(&self, file_id: &str) -> Result<FileInfo>;

    /// Bold markup in the platform dialect.
    fn format_bold(&self, text: &str) -> String;

    /// Inline-code markup in the platform dialect.
    fn format_code(&self, text: &str) -> String;

    /// Italic markup in the platform dialect.
    fn format_italic(&self, text: &str) -> String;

    /// Link markup in the platform dialect.
    fn format_link(&self, text: &str, url: &str) -> String;

    /// Permission-tool configuration handed to spawned children, if the
    /// platform provides one.
    fn mcp_permission_config(&self) -> Option<serde_json::Value>;
}
