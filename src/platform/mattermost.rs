//! Mattermost adapter: REST v4 plus the WebSocket event stream.
//!
//! The REST surface is a thin reqwest client over `/api/v4`. The realtime
//! connection authenticates over WebSocket, tracks heartbeats, and
//! reconnects with capped exponential backoff, emitting
//! [`PlatformEvent::Reconnecting`] along the way.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{MattermostConfig, ReconnectConfig};
use crate::platform::{FileInfo, PlatformAdapter, PlatformEvent, Post, Reaction, ThreadRef, User};
use crate::{AppError, Result};

const EVENT_QUEUE_CAPACITY: usize = 512;
const MAX_API_ATTEMPTS: u32 = 5;
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Mattermost platform adapter.
pub struct MattermostAdapter {
    base_url: String,
    token: String,
    bot_user_id: String,
    bot_name: String,
    allowed_users: Vec<String>,
    reconnect: ReconnectConfig,
    http: reqwest::Client,
    events_tx: mpsc::Sender<PlatformEvent>,
    ws_cancel: Mutex<Option<CancellationToken>>,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    id: String,
    username: String,
    #[serde(default)]
    nickname: String,
    #[serde(default)]
    email: String,
}

#[derive(Debug, Deserialize)]
struct RawPost {
    id: String,
    channel_id: String,
    user_id: String,
    message: String,
    #[serde(default)]
    root_id: String,
    #[serde(default)]
    create_at: i64,
    #[serde(default)]
    file_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawPostList {
    order: Vec<String>,
    posts: std::collections::HashMap<String, RawPost>,
}

#[derive(Debug, Deserialize)]
struct RawFileInfo {
    id: String,
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    extension: String,
}

fn raw_to_post(raw: RawPost) -> Post {
    let root_id = if raw.root_id.is_empty() { None } else { Some(raw.root_id) };
    Post {
        id: raw.id,
        platform_id: "mattermost".into(),
        channel_id: raw.channel_id,
        user_id: raw.user_id,
        message: raw.message,
        root_id,
        timestamp: Utc
            .timestamp_millis_opt(raw.create_at)
            .single()
            .unwrap_or_else(Utc::now),
        file_ids: raw.file_ids,
    }
}

fn raw_to_user(raw: RawUser) -> User {
    User {
        id: raw.id,
        display_name: if raw.nickname.is_empty() { raw.username.clone() } else { raw.nickname },
        username: raw.username,
        email: raw.email,
    }
}

impl MattermostAdapter {
    /// Create the adapter, resolve the bot identity, and hand back the
    /// event stream. Call [`PlatformAdapter::connect`] to start the
    /// WebSocket listener.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Platform` when the server or token is rejected.
    pub async fn new(
        config: &MattermostConfig,
        reconnect: ReconnectConfig,
    ) -> Result<(Arc<Self>, mpsc::Receiver<PlatformEvent>)> {
        let base_url = config.url.trim_end_matches('/').to_owned();
        let http = reqwest::Client::new();

        let me: RawUser = http
            .get(format!("{base_url}/api/v4/users/me"))
            .bearer_auth(&config.token)
            .send()
            .await
            .map_err(|err| AppError::Platform(format!("mattermost unreachable: {err}")))?
            .error_for_status()
            .map_err(|err| AppError::Platform(format!("mattermost auth failed: {err}")))?
            .json()
            .await
            .map_err(|err| AppError::Platform(format!("mattermost users/me decode: {err}")))?;
        info!(bot_user_id = me.id, bot_name = me.username, "mattermost identity resolved");

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let adapter = Arc::new(Self {
            base_url,
            token: config.token.clone(),
            bot_user_id: me.id,
            bot_name: me.username,
            allowed_users: config.allowed_users.clone(),
            reconnect,
            http,
            events_tx,
            ws_cancel: Mutex::new(None),
        });
        Ok((adapter, events_rx))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v4{path}", self.base_url)
    }

    /// Run a REST call with bounded retry; 429 responses back off.
    async fn with_retry<T, F, Fut>(&self, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, reqwest::Error>>,
    {
        let mut backoff = INITIAL_RETRY_DELAY;
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    attempt += 1;
                    let rate_limited = error.status()
                        == Some(reqwest::StatusCode::TOO_MANY_REQUESTS);
                    if attempt >= MAX_API_ATTEMPTS {
                        return Err(if rate_limited {
                            AppError::RateLimited(error.to_string())
                        } else {
                            AppError::Platform(error.to_string())
                        });
                    }
                    warn!(%error, attempt, "mattermost call failed; retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_RETRY_DELAY);
                }
            }
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        self.with_retry(|| async {
            self.http
                .get(&url)
                .bearer_auth(&self.token)
                .send()
                .await?
                .error_for_status()?
                .json::<T>()
                .await
        })
        .await
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let url = self.url(path);
        self.with_retry(|| async {
            self.http
                .post(&url)
                .bearer_auth(&self.token)
                .json(body)
                .send()
                .await?
                .error_for_status()?
                .json::<T>()
                .await
        })
        .await
    }

    async fn post_empty(&self, path: &str, body: Option<&serde_json::Value>) -> Result<()> {
        let url = self.url(path);
        self.with_retry(|| async {
            let mut request = self.http.post(&url).bearer_auth(&self.token);
            if let Some(body) = body {
                request = request.json(body);
            }
            request.send().await?.error_for_status()?;
            Ok(())
        })
        .await
    }

    async fn delete_empty(&self, path: &str) -> Result<()> {
        let url = self.url(path);
        self.with_retry(|| async {
            self.http
                .delete(&url)
                .bearer_auth(&self.token)
                .send()
                .await?
                .error_for_status()?;
            Ok(())
        })
        .await
    }
}

// ── WebSocket listener ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WsEvent {
    #[serde(default)]
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

async fn run_websocket(
    base_url: String,
    token: String,
    bot_user_id: String,
    reconnect: ReconnectConfig,
    events_tx: mpsc::Sender<PlatformEvent>,
    cancel: CancellationToken,
) {
    let ws_url = format!(
        "{}/api/v4/websocket",
        base_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1)
    );

    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            break;
        }
        if attempt > 0 {
            if attempt > reconnect.max_attempts {
                warn!("mattermost reconnect attempts exhausted");
                let _ = events_tx.send(PlatformEvent::Disconnected).await;
                break;
            }
            let delay = Duration::from_millis(
                reconnect.backoff_base_ms.saturating_mul(1u64 << attempt.min(10)),
            )
            .min(Duration::from_secs(60));
            let _ = events_tx.send(PlatformEvent::Reconnecting { attempt }).await;
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
        attempt += 1;

        let stream = match tokio_tungstenite::connect_async(&ws_url).await {
            Ok((stream, _)) => stream,
            Err(err) => {
                warn!(%err, "mattermost websocket connect failed");
                continue;
            }
        };
        let (mut sink, mut source) = stream.split();

        // Authenticate before anything else arrives.
        let auth = serde_json::json!({
            "seq": 1,
            "action": "authentication_challenge",
            "data": {"token": token},
        });
        if let Err(err) = sink.send(WsMessage::Text(auth.to_string().into())).await {
            warn!(%err, "mattermost websocket auth send failed");
            continue;
        }

        let _ = events_tx.send(PlatformEvent::Connected).await;
        attempt = 1; // A successful connect resets the backoff.

        let mut ping = tokio::time::interval(Duration::from_millis(reconnect.heartbeat_interval_ms));
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let heartbeat_timeout = Duration::from_millis(reconnect.heartbeat_timeout_ms);
        let mut last_heard = tokio::time::Instant::now();

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return;
                }

                _ = ping.tick() => {
                    if last_heard.elapsed() > heartbeat_timeout {
                        warn!("mattermost heartbeat timed out; reconnecting");
                        let _ = events_tx.send(PlatformEvent::Disconnected).await;
                        break;
                    }
                    if sink.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }

                item = source.next() => {
                    match item {
                        Some(Ok(WsMessage::Text(text))) => {
                            last_heard = tokio::time::Instant::now();
                            handle_ws_text(&text, &bot_user_id, &events_tx).await;
                        }
                        Some(Ok(WsMessage::Pong(_) | WsMessage::Ping(_))) => {
                            last_heard = tokio::time::Instant::now();
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            let _ = events_tx.send(PlatformEvent::Disconnected).await;
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(%err, "mattermost websocket error");
                            let _ = events_tx.send(PlatformEvent::Disconnected).await;
                            break;
                        }
                    }
                }
            }
        }
    }
}

async fn handle_ws_text(text: &str, bot_user_id: &str, events_tx: &mpsc::Sender<PlatformEvent>) {
    let event: WsEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(_) => return, // Sequence replies and hellos have no `event`.
    };

    match event.event.as_str() {
        "posted" => {
            // The post rides inside the event as a JSON-encoded string.
            let Some(encoded) = event.data.get("post").and_then(|v| v.as_str()) else {
                return;
            };
            let Ok(raw) = serde_json::from_str::<RawPost>(encoded) else {
                debug!("unparseable posted event");
                return;
            };
            if raw.user_id == bot_user_id {
                return;
            }
            let post = raw_to_post(raw);
            let wrapped = if post.root_id.is_none() {
                PlatformEvent::ChannelPost { post, user: None }
            } else {
                PlatformEvent::Message { post, user: None }
            };
            let _ = events_tx.send(wrapped).await;
        }
        "reaction_added" | "reaction_removed" => {
            #[derive(Deserialize)]
            struct RawReaction {
                user_id: String,
                post_id: String,
                emoji_name: String,
                #[serde(default)]
                create_at: i64,
            }
            let Some(encoded) = event.data.get("reaction").and_then(|v| v.as_str()) else {
                return;
            };
            let Ok(raw) = serde_json::from_str::<RawReaction>(encoded) else {
                return;
            };
            if raw.user_id == bot_user_id {
                return;
            }
            let reaction = Reaction {
                user_id: raw.user_id,
                post_id: raw.post_id,
                emoji_name: raw.emoji_name,
                timestamp: Utc
                    .timestamp_millis_opt(raw.create_at)
                    .single()
                    .unwrap_or_else(Utc::now),
            };
            let wrapped = if event.event == "reaction_added" {
                PlatformEvent::Reaction { reaction, user: None }
            } else {
                PlatformEvent::ReactionRemoved { reaction, user: None }
            };
            let _ = events_tx.send(wrapped).await;
        }
        "hello" => {
            debug!("mattermost hello");
        }
        other => {
            debug!(event = other, "unhandled mattermost event");
        }
    }
}

#[async_trait]
impl PlatformAdapter for MattermostAdapter {
    fn platform_id(&self) -> &str {
        "mattermost"
    }

    async fn connect(&self) -> Result<()> {
        let cancel = CancellationToken::new();
        *self.ws_cancel.lock().await = Some(cancel.clone());

        tokio::spawn(run_websocket(
            self.base_url.clone(),
            self.token.clone(),
            self.bot_user_id.clone(),
            self.reconnect,
            self.events_tx.clone(),
            cancel,
        ));
        info!("mattermost websocket listener started");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(cancel) = self.ws_cancel.lock().await.take() {
            cancel.cancel();
        }
        info!("mattermost adapter disconnected");
        Ok(())
    }

    async fn prepare_for_reconnect(&self) -> Result<()> {
        self.disconnect().await
    }

    fn bot_name(&self) -> &str {
        &self.bot_name
    }

    fn bot_user_id(&self) -> &str {
        &self.bot_user_id
    }

    async fn user_by_id(&self, user_id: &str) -> Result<Option<User>> {
        match self.get_json::<RawUser>(&format!("/users/{user_id}")).await {
            Ok(raw) => Ok(Some(raw_to_user(raw))),
            Err(AppError::Platform(msg)) if msg.contains("404") => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>> {
        match self
            .get_json::<RawUser>(&format!("/users/username/{username}"))
            .await
        {
            Ok(raw) => Ok(Some(raw_to_user(raw))),
            Err(AppError::Platform(msg)) if msg.contains("404") => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn is_user_allowed(&self, user_id: &str) -> bool {
        self.allowed_users.iter().any(|id| id == user_id)
    }

    fn mentions_bot(&self, text: &str) -> bool {
        text.contains(&format!("@{}", self.bot_name))
    }

    fn extract_prompt(&self, text: &str) -> String {
        text.replace(&format!("@{}", self.bot_name), "").trim().to_owned()
    }

    async fn create_post(&self, thread: &ThreadRef, message: &str) -> Result<Post> {
        let body = serde_json::json!({
            "channel_id": thread.channel_id,
            "message": message,
            "root_id": thread.root_id,
        });
        let raw: RawPost = self.post_json("/posts", &body).await?;
        Ok(raw_to_post(raw))
    }

    async fn create_channel_post(&self, channel_id: &str, message: &str) -> Result<Post> {
        let body = serde_json::json!({
            "channel_id": channel_id,
            "message": message,
        });
        let raw: RawPost = self.post_json("/posts", &body).await?;
        Ok(raw_to_post(raw))
    }

    async fn update_post(&self, post_id: &str, message: &str) -> Result<()> {
        let url = self.url(&format!("/posts/{post_id}/patch"));
        let body = serde_json::json!({"message": message});
        self.with_retry(|| async {
            self.http
                .put(&url)
                .bearer_auth(&self.token)
                .json(&body)
                .send()
                .await?
                .error_for_status()?;
            Ok(())
        })
        .await
    }

    async fn get_post(&self, post_id: &str) -> Result<Post> {
        let raw: RawPost = self.get_json(&format!("/posts/{post_id}")).await?;
        Ok(raw_to_post(raw))
    }

    async fn delete_post(&self, post_id: &str) -> Result<()> {
        self.delete_empty(&format!("/posts/{post_id}")).await
    }

    async fn pin_post(&self, post_id: &str) -> Result<()> {
        self.post_empty(&format!("/posts/{post_id}/pin"), None).await
    }

    async fn unpin_post(&self, post_id: &str) -> Result<()> {
        self.post_empty(&format!("/posts/{post_id}/unpin"), None).await
    }

    async fn get_pinned_posts(&self, channel_id: &str) -> Result<Vec<Post>> {
        let list: RawPostList = self
            .get_json(&format!("/channels/{channel_id}/pinned"))
            .await?;
        let mut posts = Vec::new();
        for id in &list.order {
            if let Some(raw) = list.posts.get(id) {
                posts.push(raw_to_post(RawPost {
                    id: raw.id.clone(),
                    channel_id: raw.channel_id.clone(),
                    user_id: raw.user_id.clone(),
                    message: raw.message.clone(),
                    root_id: raw.root_id.clone(),
                    create_at: raw.create_at,
                    file_ids: raw.file_ids.clone(),
                }));
            }
        }
        Ok(posts)
    }

    async fn create_interactive_post(
        &self,
        thread: &ThreadRef,
        message: &str,
        reactions: &[&str],
    ) -> Result<Post> {
        let post = self.create_post(thread, message).await?;
        for emoji in reactions {
            if let Err(err) = self.add_reaction(&post.id, emoji).await {
                warn!(%err, emoji, "failed to seed reaction");
            }
        }
        Ok(post)
    }

    async fn send_typing(&self, thread: &ThreadRef) -> Result<()> {
        let body = serde_json::json!({
            "channel_id": thread.channel_id,
            "parent_id": thread.root_id,
        });
        self.post_empty("/users/me/typing", Some(&body)).await
    }

    async fn add_reaction(&self, post_id: &str, emoji_name: &str) -> Result<()> {
        let body = serde_json::json!({
            "user_id": self.bot_user_id,
            "post_id": post_id,
            "emoji_name": emoji_name,
        });
        self.post_empty("/reactions", Some(&body)).await
    }

    async fn remove_reaction(&self, post_id: &str, emoji_name: &str) -> Result<()> {
        self.delete_empty(&format!(
            "/users/{}/posts/{post_id}/reactions/{emoji_name}",
            self.bot_user_id
        ))
        .await
    }

    async fn thread_history(
        &self,
        thread: &ThreadRef,
        limit: usize,
        exclude_bot: bool,
    ) -> Result<Vec<Post>> {
        let list: RawPostList = self
            .get_json(&format!("/posts/{}/thread", thread.root_id))
            .await?;
        let mut posts: Vec<Post> = Vec::new();
        for id in &list.order {
            if let Some(raw) = list.posts.get(id) {
                let post = raw_to_post(RawPost {
                    id: raw.id.clone(),
                    channel_id: raw.channel_id.clone(),
                    user_id: raw.user_id.clone(),
                    message: raw.message.clone(),
                    root_id: raw.root_id.clone(),
                    create_at: raw.create_at,
                    file_ids: raw.file_ids.clone(),
                });
                if exclude_bot && post.user_id == self.bot_user_id {
                    continue;
                }
                posts.push(post);
            }
        }
        posts.sort_by_key(|p| p.timestamp);
        posts.truncate(limit);
        Ok(posts)
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        let url = self.url(&format!("/files/{file_id}"));
        let bytes = self
            .with_retry(|| async {
                self.http
                    .get(&url)
                    .bearer_auth(&self.token)
                    .send()
                    .await?
                    .error_for_status()?
                    .bytes()
                    .await
            })
            .await?;
        Ok(bytes.to_vec())
    }

    async fn file_info(&self, file_id: &str) -> Result<FileInfo> {
        let raw: RawFileInfo = self.get_json(&format!("/files/{file_id}/info")).await?;
        Ok(FileInfo {
            id: raw.id,
            name: raw.name,
            size: raw.size,
            mime_type: raw.mime_type,
            extension: raw.extension.to_lowercase(),
        })
    }

    fn format_bold(&self, text: &str) -> String {
        format!("**{text}**")
    }

    fn format_code(&self, text: &str) -> String {
        format!("`{text}`")
    }

    fn format_italic(&self, text: &str) -> String {
        format!("*{text}*")
    }

    fn format_link(&self, text: &str, url: &str) -> String {
        format!("[{text}]({url})")
    }

    fn mcp_permission_config(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({"platform": "mattermost", "bot_user": self.bot_user_id}))
    }
}
