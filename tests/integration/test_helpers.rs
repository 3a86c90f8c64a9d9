//! Shared mocks for the integration tests: an in-memory platform adapter
//! and a scriptable child process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use thread_relay::child::{
    ChildEvent, ChildLauncher, ChildProcess, SpawnOptions, UserContent,
};
use thread_relay::platform::{FileInfo, PlatformAdapter, Post, ThreadRef, User};
use thread_relay::{AppError, Result};

/// A post recorded by the mock adapter.
#[derive(Debug, Clone)]
pub struct RecordedPost {
    pub id: String,
    pub thread: ThreadRef,
    pub message: String,
    pub reactions: Vec<String>,
    pub pinned: bool,
}

/// In-memory platform adapter.
pub struct MockAdapter {
    pub allowed: Vec<String>,
    pub posts: Mutex<Vec<RecordedPost>>,
    pub history: Mutex<Vec<Post>>,
    pub files: Mutex<HashMap<String, (FileInfo, Vec<u8>)>>,
    pub typing_count: AtomicUsize,
    pub fail_updates: AtomicBool,
    next_id: AtomicUsize,
}

impl MockAdapter {
    pub fn new(allowed: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            allowed: allowed.iter().map(|s| (*s).to_owned()).collect(),
            posts: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            files: Mutex::new(HashMap::new()),
            typing_count: AtomicUsize::new(0),
            fail_updates: AtomicBool::new(false),
            next_id: AtomicUsize::new(1),
        })
    }

    pub fn recorded(&self) -> Vec<RecordedPost> {
        self.posts.lock().expect("posts lock").clone()
    }

    pub fn find_message(&self, needle: &str) -> Option<RecordedPost> {
        self.recorded().into_iter().find(|p| p.message.contains(needle))
    }

    fn record(&self, thread: ThreadRef, message: &str, reactions: Vec<String>) -> Post {
        let id = format!("p{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.posts.lock().expect("posts lock").push(RecordedPost {
            id: id.clone(),
            thread: thread.clone(),
            message: message.to_owned(),
            reactions,
            pinned: false,
        });
        Post {
            id,
            platform_id: "mock".into(),
            channel_id: thread.channel_id.clone(),
            user_id: "B0".into(),
            message: message.to_owned(),
            root_id: Some(thread.root_id),
            timestamp: Utc::now(),
            file_ids: Vec::new(),
        }
    }
}

#[async_trait]
impl PlatformAdapter for MockAdapter {
    fn platform_id(&self) -> &str {
        "mock"
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn prepare_for_reconnect(&self) -> Result<()> {
        Ok(())
    }

    fn bot_name(&self) -> &str {
        "relay"
    }

    fn bot_user_id(&self) -> &str {
        "B0"
    }

    async fn user_by_id(&self, user_id: &str) -> Result<Option<User>> {
        Ok(Some(User {
            id: user_id.to_owned(),
            username: user_id.to_lowercase(),
            display_name: user_id.to_owned(),
            email: String::new(),
        }))
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(Some(User {
            id: username.to_uppercase(),
            username: username.to_owned(),
            display_name: username.to_owned(),
            email: String::new(),
        }))
    }

    fn is_user_allowed(&self, user_id: &str) -> bool {
        self.allowed.iter().any(|u| u == user_id)
    }

    fn mentions_bot(&self, text: &str) -> bool {
        text.contains("@relay")
    }

    fn extract_prompt(&self, text: &str) -> String {
        text.replace("@relay", "").trim().to_owned()
    }

    async fn create_post(&self, thread: &ThreadRef, message: &str) -> Result<Post> {
        Ok(self.record(thread.clone(), message, Vec::new()))
    }

    async fn create_channel_post(&self, channel_id: &str, message: &str) -> Result<Post> {
        let thread = ThreadRef { channel_id: channel_id.to_owned(), root_id: "top".into() };
        Ok(self.record(thread, message, Vec::new()))
    }

    async fn update_post(&self, post_id: &str, message: &str) -> Result<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(AppError::Platform("update disabled by test".into()));
        }
        let mut posts = self.posts.lock().expect("posts lock");
        let post = posts
            .iter_mut()
            .find(|p| p.id == post_id)
            .ok_or_else(|| AppError::NotFound(format!("post {post_id}")))?;
        post.message = message.to_owned();
        Ok(())
    }

    async fn get_post(&self, post_id: &str) -> Result<Post> {
        let posts = self.posts.lock().expect("posts lock");
        posts
            .iter()
            .find(|p| p.id == post_id)
            .map(|p| Post {
                id: p.id.clone(),
                platform_id: "mock".into(),
                channel_id: p.thread.channel_id.clone(),
                user_id: "B0".into(),
                message: p.message.clone(),
                root_id: Some(p.thread.root_id.clone()),
                timestamp: Utc::now(),
                file_ids: Vec::new(),
            })
            .ok_or_else(|| AppError::NotFound(format!("post {post_id}")))
    }

    async fn delete_post(&self, post_id: &str) -> Result<()> {
        self.posts.lock().expect("posts lock").retain(|p| p.id != post_id);
        Ok(())
    }

    async fn pin_post(&self, post_id: &str) -> Result<()> {
        let mut posts = self.posts.lock().expect("posts lock");
        if let Some(post) = posts.iter_mut().find(|p| p.id == post_id) {
            post.pinned = true;
        }
        Ok(())
    }

    async fn unpin_post(&self, post_id: &str) -> Result<()> {
        let mut posts = self.posts.lock().expect("posts lock");
        if let Some(post) = posts.iter_mut().find(|p| p.id == post_id) {
            post.pinned = false;
        }
        Ok(())
    }

    async fn get_pinned_posts(&self, channel_id: &str) -> Result<Vec<Post>> {
        let posts = self.posts.lock().expect("posts lock");
        Ok(posts
            .iter()
            .filter(|p| p.pinned && p.thread.channel_id == channel_id)
            .map(|p| Post {
                id: p.id.clone(),
                platform_id: "mock".into(),
                channel_id: p.thread.channel_id.clone(),
                user_id: "B0".into(),
                message: p.message.clone(),
                root_id: Some(p.thread.root_id.clone()),
                timestamp: Utc::now(),
                file_ids: Vec::new(),
            })
            .collect())
    }

    async fn create_interactive_post(
        &self,
        thread: &ThreadRef,
        message: &str,
        reactions: &[&str],
    ) -> Result<Post> {
        let reactions = reactions.iter().map(|r| (*r).to_owned()).collect();
        Ok(self.record(thread.clone(), message, reactions))
    }

    async fn send_typing(&self, _thread: &ThreadRef) -> Result<()> {
        self.typing_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn add_reaction(&self, post_id: &str, emoji_name: &str) -> Result<()> {
        let mut posts = self.posts.lock().expect("posts lock");
        if let Some(post) = posts.iter_mut().find(|p| p.id == post_id) {
            post.reactions.push(emoji_name.to_owned());
        }
        Ok(())
    }

    async fn remove_reaction(&self, post_id: &str, emoji_name: &str) -> Result<()> {
        let mut posts = self.posts.lock().expect("posts lock");
        if let Some(post) = posts.iter_mut().find(|p| p.id == post_id) {
            post.reactions.retain(|r| r != emoji_name);
        }
        Ok(())
    }

    async fn thread_history(
        &self,
        thread: &ThreadRef,
        limit: usize,
        exclude_bot: bool,
    ) -> Result<Vec<Post>> {
        let history = self.history.lock().expect("history lock");
        Ok(history
            .iter()
            .filter(|p| p.channel_id == thread.channel_id)
            .filter(|p| !exclude_bot || p.user_id != "B0")
            .take(limit)
            .cloned()
            .collect())
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        let files = self.files.lock().expect("files lock");
        files
            .get(file_id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| AppError::NotFound(format!("file {file_id}")))
    }

    async fn file_info(&self, file_id: &str) -> Result<FileInfo> {
        let files = self.files.lock().expect("files lock");
        files
            .get(file_id)
            .map(|(info, _)| info.clone())
            .ok_or_else(|| AppError::NotFound(format!("file {file_id}")))
    }

    fn format_bold(&self, text: &str) -> String {
        format!("**{text}**")
    }

    fn format_code(&self, text: &str) -> String {
        format!("`{text}`")
    }

    fn format_italic(&self, text: &str) -> String {
        format!("_{text}_")
    }

    fn format_link(&self, text: &str, url: &str) -> String {
        format!("[{text}]({url})")
    }

    fn mcp_permission_config(&self) -> Option<serde_json::Value> {
        None
    }
}

/// A scriptable child: records what it is sent, exposes a sender so the
/// test can emit events into the runtime.
pub struct MockChild {
    pub sent: Mutex<Vec<String>>,
    pub permission_replies: Mutex<Vec<(String, bool)>>,
    pub interrupts: AtomicUsize,
    pub running: AtomicBool,
}

#[async_trait]
impl ChildProcess for MockChild {
    async fn send_message(&self, content: UserContent) -> Result<()> {
        let text = match content {
            UserContent::Text(text) => text,
            UserContent::Blocks(blocks) => serde_json::to_string(&blocks).unwrap_or_default(),
        };
        self.sent.lock().expect("sent lock").push(text);
        Ok(())
    }

    async fn interrupt(&self) -> Result<()> {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn respond_permission(&self, request_id: &str, approved: bool) -> Result<()> {
        self.permission_replies
            .lock()
            .expect("permissions lock")
            .push((request_id.to_owned(), approved));
        Ok(())
    }

    async fn kill(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Launcher handing out [`MockChild`]ren and keeping their event senders.
#[derive(Default)]
pub struct MockLauncher {
    pub launched: Mutex<Vec<SpawnOptions>>,
    pub children: Mutex<Vec<Arc<MockChild>>>,
    pub event_senders: Mutex<Vec<mpsc::Sender<ChildEvent>>>,
}

impl MockLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn launch_count(&self) -> usize {
        self.launched.lock().expect("launched lock").len()
    }

    pub fn last_child(&self) -> Option<Arc<MockChild>> {
        self.children.lock().expect("children lock").last().cloned()
    }

    pub fn last_sender(&self) -> Option<mpsc::Sender<ChildEvent>> {
        self.event_senders.lock().expect("senders lock").last().cloned()
    }
}

#[async_trait]
impl ChildLauncher for MockLauncher {
    async fn launch(
        &self,
        options: SpawnOptions,
    ) -> Result<(Arc<dyn ChildProcess>, mpsc::Receiver<ChildEvent>)> {
        let child = Arc::new(MockChild {
            sent: Mutex::new(Vec::new()),
            permission_replies: Mutex::new(Vec::new()),
            interrupts: AtomicUsize::new(0),
            running: AtomicBool::new(true),
        });
        let (tx, rx) = mpsc::channel(64);

        self.launched.lock().expect("launched lock").push(options);
        self.children.lock().expect("children lock").push(Arc::clone(&child));
        self.event_senders.lock().expect("senders lock").push(tx);

        Ok((child, rx))
    }
}

/// Poll `condition` until it holds or the timeout elapses.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// A session runtime wired to mocks, for driving flows directly.
pub struct RuntimeFixture {
    pub adapter: Arc<MockAdapter>,
    pub launcher: Arc<MockLauncher>,
    pub registry: Arc<thread_relay::registry::PostRegistry>,
    pub handle: thread_relay::session::runtime::SessionHandle,
    pub notices: mpsc::Receiver<thread_relay::session::runtime::SessionNotice>,
    pub key: thread_relay::session::SessionKey,
    pub thread: ThreadRef,
}

/// Spawn a session runtime in `Immediate` mode with the given prompt.
pub async fn spawn_immediate(prompt: &str, working_dir: &std::path::Path) -> RuntimeFixture {
    use thread_relay::config::WorktreeMode;
    use thread_relay::format::FormatterConfig;
    use thread_relay::session::runtime::{self, SessionLaunch, StartMode};
    use thread_relay::session::{SessionKey, SessionState};

    let adapter = MockAdapter::new(&["U1"]);
    let launcher = MockLauncher::new();
    let registry = Arc::new(thread_relay::registry::PostRegistry::new());
    let thread = ThreadRef { channel_id: "C1".into(), root_id: "r1".into() };
    let key = SessionKey::new("mock", thread.encode());
    let (notices_tx, notices_rx) = mpsc::channel(64);

    let state = SessionState::new(
        key.clone(),
        thread.clone(),
        "U1",
        working_dir.to_path_buf(),
        WorktreeMode::Off,
        false,
    );

    let handle = runtime::spawn(SessionLaunch {
        state,
        adapter: Arc::clone(&adapter) as Arc<dyn PlatformAdapter>,
        registry: Arc::clone(&registry),
        launcher: Arc::clone(&launcher) as Arc<dyn ChildLauncher>,
        notices: notices_tx,
        formatter_config: FormatterConfig::default(),
        permission_timeout: chrono::Duration::seconds(120),
        chrome: false,
        cli_binary: "true".into(),
        start: StartMode::Immediate { prompt: prompt.to_owned(), files: Vec::new() },
    });

    let fixture = RuntimeFixture {
        adapter,
        launcher,
        registry,
        handle,
        notices: notices_rx,
        key,
        thread,
    };

    // The initial prompt reaching the child marks the session as started.
    let launcher = Arc::clone(&fixture.launcher);
    assert!(
        wait_until(Duration::from_secs(2), move || {
            launcher
                .last_child()
                .is_some_and(|c| !c.sent.lock().expect("sent lock").is_empty())
        })
        .await,
        "session did not start"
    );

    fixture
}

/// A reacting user for op injection.
pub fn user(id: &str) -> User {
    User {
        id: id.to_owned(),
        username: id.to_lowercase(),
        display_name: id.to_owned(),
        email: String::new(),
    }
}
