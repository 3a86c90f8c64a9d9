//! Slack adapter: Socket Mode events plus REST messaging.
//!
//! Realtime events arrive over a Socket Mode listener and are translated
//! into [`PlatformEvent`]s; outgoing calls go through the Web API with a
//! rate-limit-aware retry. Slack threads are addressed as
//! `channel|thread_ts`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use slack_morphism::prelude::{
    SlackApiChatDeleteRequest, SlackApiChatPostMessageRequest, SlackApiChatUpdateRequest,
    SlackApiConversationsHistoryRequest, SlackApiConversationsRepliesRequest,
    SlackApiPinsAddRequest, SlackApiPinsListRequest, SlackApiPinsRemoveRequest,
    SlackApiReactionsAddRequest, SlackApiReactionsRemoveRequest, SlackApiToken, SlackApiTokenType,
    SlackApiTokenValue, SlackApiUsersInfoRequest, SlackApiUsersListRequest, SlackChannelId,
    SlackClient, SlackClientEventsListenerEnvironment, SlackClientEventsUserState,
    SlackClientHyperHttpsConnector, SlackClientSocketModeConfig, SlackClientSocketModeListener,
    SlackEventCallbackBody, SlackHistoryMessage, SlackMessageContent, SlackPushEventCallback,
    SlackReactionName, SlackReactionsItem, SlackSocketModeListenerCallbacks, SlackTs, SlackUserId,
};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::config::SlackConfig;
use crate::platform::{FileInfo, PlatformAdapter, PlatformEvent, Post, Reaction, ThreadRef, User};
use crate::{AppError, Result};

const EVENT_QUEUE_CAPACITY: usize = 512;
const MAX_API_ATTEMPTS: u32 = 5;
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// State shared into the Socket Mode callbacks.
struct CallbackState {
    events_tx: mpsc::Sender<PlatformEvent>,
    bot_user_id: String,
}

/// Slack platform adapter.
pub struct SlackAdapter {
    client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    bot_token: SlackApiToken,
    app_token: SlackApiToken,
    bot_user_id: String,
    bot_name: String,
    allowed_users: Vec<String>,
    events_tx: mpsc::Sender<PlatformEvent>,
    socket_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    http: reqwest::Client,
}

impl SlackAdapter {
    /// Create the adapter, resolve the bot identity, and hand back the
    /// event stream. Call [`PlatformAdapter::connect`] to start Socket
    /// Mode.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Platform` when the connector cannot be created
    /// or the token is rejected.
    pub async fn new(config: &SlackConfig) -> Result<(Arc<Self>, mpsc::Receiver<PlatformEvent>)> {
        let connector = SlackClientHyperHttpsConnector::new()
            .map_err(|err| AppError::Platform(format!("failed to init slack connector: {err}")))?;
        let client = Arc::new(SlackClient::new(connector));

        let bot_token = SlackApiToken {
            token_value: SlackApiTokenValue(config.bot_token.clone()),
            cookie: None,
            team_id: None,
            scope: None,
            token_type: Some(SlackApiTokenType::Bot),
        };
        let app_token = SlackApiToken {
            token_value: SlackApiTokenValue(config.app_token.clone()),
            cookie: None,
            team_id: None,
            scope: None,
            token_type: Some(SlackApiTokenType::App),
        };

        // Resolve the bot identity up front; mention parsing needs it.
        let session = client.open_session(&bot_token);
        let auth = session
            .auth_test()
            .await
            .map_err(|err| AppError::Platform(format!("slack auth test failed: {err}")))?;
        let bot_user_id = auth.user_id.to_string();
        let bot_name = auth.user.unwrap_or_else(|| "relay".into());
        info!(bot_user_id, bot_name, "slack identity resolved");

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let adapter = Arc::new(Self {
            client,
            bot_token,
            app_token,
            bot_user_id,
            bot_name,
            allowed_users: config.allowed_users.clone(),
            events_tx,
            socket_task: Mutex::new(None),
            http: reqwest::Client::new(),
        });
        Ok((adapter, events_rx))
    }

    fn session(&self) -> slack_morphism::SlackClientSession<'_, SlackClientHyperHttpsConnector> {
        self.client.open_session(&self.bot_token)
    }

    /// Run a Slack API call with rate-limit-aware retry.
    async fn with_retry<T, F, Fut>(&self, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<
            Output = std::result::Result<T, slack_morphism::errors::SlackClientError>,
        >,
    {
        let mut backoff = INITIAL_RETRY_DELAY;
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    attempt += 1;
                    if attempt >= MAX_API_ATTEMPTS {
                        return Err(match &error {
                            slack_morphism::errors::SlackClientError::RateLimitError(_) => {
                                AppError::RateLimited(error.to_string())
                            }
                            _ => AppError::Platform(error.to_string()),
                        });
                    }
                    let delay = match &error {
                        slack_morphism::errors::SlackClientError::RateLimitError(rate) => {
                            rate.retry_after.unwrap_or(backoff)
                        }
                        _ => backoff,
                    };
                    warn!(?error, ?delay, attempt, "slack call failed; retrying");
                    tokio::time::sleep(delay).await;
                    backoff = (backoff * 2).min(MAX_RETRY_DELAY);
                }
            }
        }
    }

    fn history_to_post(&self, channel_id: &str, msg: &SlackHistoryMessage) -> Post {
        Post {
            id: format!("{channel_id}|{}", msg.origin.ts),
            platform_id: "slack".into(),
            channel_id: channel_id.to_owned(),
            user_id: msg
                .sender
                .user
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            message: msg.content.text.clone().unwrap_or_default(),
            root_id: msg.origin.thread_ts.as_ref().map(ToString::to_string),
            timestamp: ts_to_datetime(&msg.origin.ts),
            file_ids: Vec::new(),
        }
    }
}

/// Registered id (`channel|ts`) of a reaction's target message.
fn reaction_item_id(item: &SlackReactionsItem) -> String {
    match item {
        SlackReactionsItem::Message(message) => {
            let channel = message
                .origin
                .channel
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            format!("{channel}|{}", message.origin.ts)
        }
        SlackReactionsItem::File(_) => String::new(),
    }
}

/// Convert a Slack `ts` ("1700000000.000100") to a UTC timestamp.
fn ts_to_datetime(ts: &SlackTs) -> DateTime<Utc> {
    let seconds = ts
        .to_string()
        .split('.')
        .next()
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(0);
    Utc.timestamp_opt(seconds, 0).single().unwrap_or_else(Utc::now)
}

/// Socket Mode push-event callback: translate into [`PlatformEvent`]s.
async fn on_push_event(
    event: SlackPushEventCallback,
    _client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    state: SlackClientEventsUserState,
) -> slack_morphism::UserCallbackResult<()> {
    let cb: Option<Arc<CallbackState>> = {
        let guard = state.read().await;
        guard.get_user_state::<Arc<CallbackState>>().cloned()
    };
    let Some(cb) = cb else {
        warn!("slack callback state missing");
        return Ok(());
    };

    match event.event {
        SlackEventCallbackBody::Message(msg) => {
            // Skip edits/joins and our own messages.
            if msg.subtype.is_some() {
                return Ok(());
            }
            let Some(channel) = msg.origin.channel else {
                return Ok(());
            };
            let user_id = msg
                .sender
                .user
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            if user_id.is_empty() || user_id == cb.bot_user_id {
                return Ok(());
            }

            let file_ids = msg
                .content
                .as_ref()
                .and_then(|c| c.files.as_ref())
                .map(|files| files.iter().map(|f| f.id.0.clone()).collect())
                .unwrap_or_default();
            let root_id = msg.origin.thread_ts.as_ref().map(ToString::to_string);
            let post = Post {
                id: format!("{channel}|{}", msg.origin.ts),
                platform_id: "slack".into(),
                channel_id: channel.to_string(),
                user_id,
                message: msg
                    .content
                    .as_ref()
                    .and_then(|c| c.text.clone())
                    .unwrap_or_default(),
                root_id: root_id.clone(),
                timestamp: ts_to_datetime(&msg.origin.ts),
                file_ids,
            };
            let event = if root_id.is_none() {
                PlatformEvent::ChannelPost { post, user: None }
            } else {
                PlatformEvent::Message { post, user: None }
            };
            let _ = cb.events_tx.send(event).await;
        }
        SlackEventCallbackBody::ReactionAdded(added) => {
            let reaction = Reaction {
                user_id: added.user.to_string(),
                post_id: reaction_item_id(&added.item),
                emoji_name: added.reaction.to_string(),
                timestamp: Utc::now(),
            };
            let _ = cb
                .events_tx
                .send(PlatformEvent::Reaction { reaction, user: None })
                .await;
        }
        SlackEventCallbackBody::ReactionRemoved(removed) => {
            let reaction = Reaction {
                user_id: removed.user.to_string(),
                post_id: reaction_item_id(&removed.item),
                emoji_name: removed.reaction.to_string(),
                timestamp: Utc::now(),
            };
            let _ = cb
                .events_tx
                .send(PlatformEvent::ReactionRemoved { reaction, user: None })
                .await;
        }
        other => {
            debug!(?other, "unhandled slack push event");
        }
    }
    Ok(())
}

#[async_trait]
impl PlatformAdapter for SlackAdapter {
    fn platform_id(&self) -> &str {
        "slack"
    }

    async fn connect(&self) -> Result<()> {
        let listener_env = Arc::new(
            SlackClientEventsListenerEnvironment::new(Arc::clone(&self.client))
                .with_error_handler(|err, _client, _state| {
                    tracing::error!(?err, "slack socket mode error");
                    http::StatusCode::INTERNAL_SERVER_ERROR
                })
                .with_user_state(Arc::new(CallbackState {
                    events_tx: self.events_tx.clone(),
                    bot_user_id: self.bot_user_id.clone(),
                })),
        );

        let callbacks = SlackSocketModeListenerCallbacks::new()
            .with_hello_events(|event, _client, _state| async move {
                debug!(?event, "slack socket hello");
            })
            .with_push_events(on_push_event);

        let config = SlackClientSocketModeConfig {
            max_connections_count: SlackClientSocketModeConfig::DEFAULT_CONNECTIONS_COUNT,
            debug_connections: SlackClientSocketModeConfig::DEFAULT_DEBUG_CONNECTIONS,
            initial_backoff_in_seconds:
                SlackClientSocketModeConfig::DEFAULT_INITIAL_BACKOFF_IN_SECONDS,
            reconnect_timeout_in_seconds:
                SlackClientSocketModeConfig::DEFAULT_RECONNECT_TIMEOUT_IN_SECONDS,
            ping_interval_in_seconds: SlackClientSocketModeConfig::DEFAULT_PING_INTERVAL_IN_SECONDS,
            ping_failure_threshold_times:
                SlackClientSocketModeConfig::DEFAULT_PING_FAILURE_THRESHOLD_TIMES,
        };
        let listener = SlackClientSocketModeListener::new(&config, listener_env, callbacks);
        let app_token = self.app_token.clone();
        let events_tx = self.events_tx.clone();

        let task = tokio::spawn(async move {
            if let Err(error) = listener.listen_for(&app_token).await {
                tracing::error!(?error, "slack socket mode listen failed");
                let _ = events_tx.send(PlatformEvent::Disconnected).await;
                return;
            }
            let _ = events_tx.send(PlatformEvent::Connected).await;
            listener.serve().await;
            let _ = events_tx.send(PlatformEvent::Disconnected).await;
        });
        *self.socket_task.lock().await = Some(task);

        info!("slack socket mode started");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(task) = self.socket_task.lock().await.take() {
            task.abort();
        }
        info!("slack adapter disconnected");
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
        let request = SlackApiUsersInfoRequest::new(SlackUserId(user_id.to_owned()));
        let response = self
            .with_retry(|| async { self.session().users_info(&request).await })
            .await?;
        let user = response.user;
        Ok(Some(User {
            id: user.id.to_string(),
            username: user.name.clone().unwrap_or_default(),
            display_name: user
                .profile
                .as_ref()
                .and_then(|p| p.display_name.clone())
                .unwrap_or_default(),
            email: user
                .profile
                .as_ref()
                .and_then(|p| p.email.as_ref().map(ToString::to_string))
                .unwrap_or_default(),
        }))
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>> {
        let request = SlackApiUsersListRequest::new();
        let response = self
            .with_retry(|| async { self.session().users_list(&request).await })
            .await?;
        Ok(response.members.into_iter().find_map(|member| {
            let name = member.name.clone().unwrap_or_default();
            if name == username {
                Some(User {
                    id: member.id.to_string(),
                    username: name,
                    display_name: member
                        .profile
                        .as_ref()
                        .and_then(|p| p.display_name.clone())
                        .unwrap_or_default(),
                    email: String::new(),
                })
            } else {
                None
            }
        }))
    }

    fn is_user_allowed(&self, user_id: &str) -> bool {
        self.allowed_users.iter().any(|id| id == user_id)
    }

    fn mentions_bot(&self, text: &str) -> bool {
        text.contains(&format!("<@{}>", self.bot_user_id))
    }

    fn extract_prompt(&self, text: &str) -> String {
        text.replace(&format!("<@{}>", self.bot_user_id), "")
            .trim()
            .to_owned()
    }

    async fn create_post(&self, thread: &ThreadRef, message: &str) -> Result<Post> {
        let request = SlackApiChatPostMessageRequest {
            channel: SlackChannelId(thread.channel_id.clone()),
            content: SlackMessageContent::new().with_text(message.to_owned()),
            as_user: None,
            icon_emoji: None,
            icon_url: None,
            link_names: Some(true),
            parse: None,
            thread_ts: Some(SlackTs(thread.root_id.clone())),
            username: None,
            reply_broadcast: None,
            unfurl_links: None,
            unfurl_media: None,
        };
        let response = self
            .with_retry(|| async { self.session().chat_post_message(&request).await })
            .await?;
        Ok(Post {
            id: format!("{}|{}", thread.channel_id, response.ts),
            platform_id: "slack".into(),
            channel_id: thread.channel_id.clone(),
            user_id: self.bot_user_id.clone(),
            message: message.to_owned(),
            root_id: Some(thread.root_id.clone()),
            timestamp: Utc::now(),
            file_ids: Vec::new(),
        })
    }

    async fn create_channel_post(&self, channel_id: &str, message: &str) -> Result<Post> {
        let request = SlackApiChatPostMessageRequest {
            channel: SlackChannelId(channel_id.to_owned()),
            content: SlackMessageContent::new().with_text(message.to_owned()),
            as_user: None,
            icon_emoji: None,
            icon_url: None,
            link_names: Some(true),
            parse: None,
            thread_ts: None,
            username: None,
            reply_broadcast: None,
            unfurl_links: None,
            unfurl_media: None,
        };
        let response = self
            .with_retry(|| async { self.session().chat_post_message(&request).await })
            .await?;
        Ok(Post {
            id: format!("{channel_id}|{}", response.ts),
            platform_id: "slack".into(),
            channel_id: channel_id.to_owned(),
            user_id: self.bot_user_id.clone(),
            message: message.to_owned(),
            root_id: None,
            timestamp: Utc::now(),
            file_ids: Vec::new(),
        })
    }

    async fn update_post(&self, post_id: &str, message: &str) -> Result<()> {
        let (channel, ts) = split_post_id(post_id)?;
        let request = SlackApiChatUpdateRequest::new(
            SlackChannelId(channel),
            SlackMessageContent::new().with_text(message.to_owned()),
            SlackTs(ts),
        );
        self.with_retry(|| async { self.session().chat_update(&request).await })
            .await?;
        Ok(())
    }

    async fn get_post(&self, post_id: &str) -> Result<Post> {
        let (channel, ts) = split_post_id(post_id)?;
        let request = SlackApiConversationsHistoryRequest {
            channel: Some(SlackChannelId(channel.clone())),
            cursor: None,
            latest: Some(SlackTs(ts.clone())),
            limit: Some(1),
            oldest: Some(SlackTs(ts)),
            inclusive: Some(true),
            include_all_metadata: None,
        };
        let response = self
            .with_retry(|| async { self.session().conversations_history(&request).await })
            .await?;
        response
            .messages
            .first()
            .map(|m| self.history_to_post(&channel, m))
            .ok_or_else(|| AppError::NotFound(format!("post {post_id} not found")))
    }

    async fn delete_post(&self, post_id: &str) -> Result<()> {
        let (channel, ts) = split_post_id(post_id)?;
        let request = SlackApiChatDeleteRequest::new(SlackChannelId(channel), SlackTs(ts));
        self.with_retry(|| async { self.session().chat_delete(&request).await })
            .await?;
        Ok(())
    }

    async fn pin_post(&self, post_id: &str) -> Result<()> {
        let (channel, ts) = split_post_id(post_id)?;
        let request = SlackApiPinsAddRequest::new(SlackChannelId(channel), SlackTs(ts));
        self.with_retry(|| async { self.session().pins_add(&request).await })
            .await?;
        Ok(())
    }

    async fn unpin_post(&self, post_id: &str) -> Result<()> {
        let (channel, ts) = split_post_id(post_id)?;
        let request = SlackApiPinsRemoveRequest::new(SlackChannelId(channel), SlackTs(ts));
        self.with_retry(|| async { self.session().pins_remove(&request).await })
            .await?;
        Ok(())
    }

    async fn get_pinned_posts(&self, channel_id: &str) -> Result<Vec<Post>> {
        let request = SlackApiPinsListRequest::new(SlackChannelId(channel_id.to_owned()));
        let response = self
            .with_retry(|| async { self.session().pins_list(&request).await })
            .await?;
        Ok(response
            .items
            .into_iter()
            .filter_map(|item| {
                item.message.map(|m| {
                    let history = SlackHistoryMessage {
                        origin: m.origin,
                        content: m.content,
                        sender: m.sender,
                        parent: m.parent,
                        subtype: None,
                        edited: None,
                    };
                    self.history_to_post(channel_id, &history)
                })
            })
            .collect())
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

    async fn send_typing(&self, _thread: &ThreadRef) -> Result<()> {
        // The Slack Web API offers no typing indicator for apps.
        Ok(())
    }

    async fn add_reaction(&self, post_id: &str, emoji_name: &str) -> Result<()> {
        let (channel, ts) = split_post_id(post_id)?;
        let request = SlackApiReactionsAddRequest::new(
            SlackChannelId(channel),
            SlackReactionName(emoji_name.to_owned()),
            SlackTs(ts),
        );
        self.with_retry(|| async { self.session().reactions_add(&request).await })
            .await?;
        Ok(())
    }

    async fn remove_reaction(&self, post_id: &str, emoji_name: &str) -> Result<()> {
        let (channel, ts) = split_post_id(post_id)?;
        let request = SlackApiReactionsRemoveRequest::new(SlackReactionName(emoji_name.to_owned()))
            .with_channel(SlackChannelId(channel))
            .with_timestamp(SlackTs(ts));
        self.with_retry(|| async { self.session().reactions_remove(&request).await })
            .await?;
        Ok(())
    }

    async fn thread_history(
        &self,
        thread: &ThreadRef,
        limit: usize,
        exclude_bot: bool,
    ) -> Result<Vec<Post>> {
        let request = SlackApiConversationsRepliesRequest::new(
            SlackChannelId(thread.channel_id.clone()),
            SlackTs(thread.root_id.clone()),
        )
        .with_limit(u16::try_from(limit).unwrap_or(u16::MAX));
        let response = self
            .with_retry(|| async { self.session().conversations_replies(&request).await })
            .await?;
        Ok(response
            .messages
            .iter()
            .map(|m| self.history_to_post(&thread.channel_id, m))
            .filter(|p| !exclude_bot || p.user_id != self.bot_user_id)
            .collect())
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        let info = self.file_url(file_id).await?;
        let response = self
            .http
            .get(&info)
            .bearer_auth(&self.bot_token.token_value.0)
            .send()
            .await
            .map_err(|err| AppError::Platform(format!("file download failed: {err}")))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| AppError::Platform(format!("file read failed: {err}")))?;
        Ok(bytes.to_vec())
    }

    async fn file_info(&self, file_id: &str) -> Result<FileInfo> {
        // files.info is not wrapped by the REST client we use for the
        // upload flow, so query it directly.
        #[derive(serde::Deserialize)]
        struct FilesInfo {
            ok: bool,
            file: Option<RawFile>,
        }
        #[derive(serde::Deserialize)]
        struct RawFile {
            id: String,
            name: Option<String>,
            size: Option<u64>,
            mimetype: Option<String>,
        }

        let response: FilesInfo = self
            .http
            .get("https://slack.com/api/files.info")
            .query(&[("file", file_id)])
            .bearer_auth(&self.bot_token.token_value.0)
            .send()
            .await
            .map_err(|err| AppError::Platform(format!("files.info failed: {err}")))?
            .json()
            .await
            .map_err(|err| AppError::Platform(format!("files.info decode failed: {err}")))?;

        let file = response
            .file
            .filter(|_| response.ok)
            .ok_or_else(|| AppError::NotFound(format!("file {file_id} not found")))?;
        let name = file.name.unwrap_or_default();
        let extension = name.rsplit('.').next().unwrap_or("").to_lowercase();
        Ok(FileInfo {
            id: file.id,
            name,
            size: file.size.unwrap_or(0),
            mime_type: file.mimetype.unwrap_or_default(),
            extension,
        })
    }

    fn format_bold(&self, text: &str) -> String {
        format!("*{text}*")
    }

    fn format_code(&self, text: &str) -> String {
        format!("`{text}`")
    }

    fn format_italic(&self, text: &str) -> String {
        format!("_{text}_")
    }

    fn format_link(&self, text: &str, url: &str) -> String {
        format!("<{url}|{text}>")
    }

    fn mcp_permission_config(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({"platform": "slack", "bot_user": self.bot_user_id}))
    }
}

impl SlackAdapter {
    /// Resolve the private download URL of a file.
    async fn file_url(&self, file_id: &str) -> Result<String> {
        #[derive(serde::Deserialize)]
        struct FilesInfo {
            ok: bool,
            file: Option<RawFile>,
        }
        #[derive(serde::Deserialize)]
        struct RawFile {
            url_private: Option<String>,
        }

        let response: FilesInfo = self
            .http
            .get("https://slack.com/api/files.info")
            .query(&[("file", file_id)])
            .bearer_auth(&self.bot_token.token_value.0)
            .send()
            .await
            .map_err(|err| AppError::Platform(format!("files.info failed: {err}")))?
            .json()
            .await
            .map_err(|err| AppError::Platform(format!("files.info decode failed: {err}")))?;

        response
            .file
            .filter(|_| response.ok)
            .and_then(|f| f.url_private)
            .ok_or_else(|| AppError::NotFound(format!("file {file_id} has no url")))
    }
}

/// Split a registered Slack post id (`channel|ts`) into its halves.
fn split_post_id(post_id: &str) -> Result<(String, String)> {
    post_id
        .split_once('|')
        .map(|(c, t)| (c.to_owned(), t.to_owned()))
        .ok_or_else(|| {
            AppError::InvalidInput(format!("slack post id `{post_id}` is missing its channel"))
        })
}
