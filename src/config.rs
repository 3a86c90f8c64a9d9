//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{AppError, Result};

/// Keyring service name used for credential fallback lookups.
const KEYRING_SERVICE: &str = "thread-relay";

/// Permission handling for child tool calls.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PermissionsMode {
    /// Child runs with permission checks skipped.
    Auto,
    /// Child forwards permission prompts to the thread for approval.
    Interactive,
}

/// When to offer isolating a session in a git worktree.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorktreeMode {
    /// Never prompt; sessions run in the main checkout.
    Off,
    /// Prompt when the repository has uncommitted changes or a concurrent
    /// session already runs in it.
    Prompt,
    /// Every session must run in a worktree; the skip option is withheld.
    Require,
}

/// Slack connectivity settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub struct SlackConfig {
    /// Bot user token used for REST calls. May be filled from the
    /// `SLACK_BOT_TOKEN` environment variable or the keyring.
    #[serde(default)]
    pub bot_token: String,
    /// App-level token used for Socket Mode. May be filled from the
    /// `SLACK_APP_TOKEN` environment variable or the keyring.
    #[serde(default)]
    pub app_token: String,
    /// Slack user IDs allowed to start and control sessions.
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

/// Mattermost connectivity settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub struct MattermostConfig {
    /// Base server URL, e.g. `https://mm.example.com`.
    #[serde(default)]
    pub url: String,
    /// Personal access token for the bot account. May be filled from the
    /// `MATTERMOST_TOKEN` environment variable or the keyring.
    #[serde(default)]
    pub token: String,
    /// Mattermost user IDs allowed to start and control sessions.
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

/// Streaming formatter and message-breaker thresholds.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct StreamConfig {
    /// Byte count at which buffered content is flushed early.
    pub soft_break_chars: usize,
    /// Minimum chunk size the splitter will produce.
    pub min_break_chars: usize,
    /// Newline count at which buffered content is flushed early.
    pub max_lines_before_break: usize,
    /// Estimated rendered height (px) above which a post is split.
    pub max_height_px: u32,
    /// Debounce window for update-in-place flushes.
    pub update_debounce_ms: u64,
    /// Re-send interval for the typing indicator.
    pub typing_interval_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            soft_break_chars: 2000,
            min_break_chars: 500,
            max_lines_before_break: 15,
            max_height_px: 500,
            update_debounce_ms: 500,
            typing_interval_ms: 3000,
        }
    }
}

/// Realtime-connection resilience thresholds.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct ReconnectConfig {
    /// Base delay for exponential reconnect backoff.
    pub backoff_base_ms: u64,
    /// Reconnection attempts before the adapter gives up.
    pub max_attempts: u32,
    /// Interval between heartbeat pings.
    pub heartbeat_interval_ms: u64,
    /// Silence threshold after which a connection is considered dead.
    pub heartbeat_timeout_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 1000,
            max_attempts: 10,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 60_000,
        }
    }
}

fn default_max_sessions() -> u32 {
    5
}

fn default_session_timeout_ms() -> u64 {
    1_800_000
}

fn default_permission_timeout_ms() -> u64 {
    300_000
}

fn default_permissions_mode() -> PermissionsMode {
    PermissionsMode::Interactive
}

fn default_worktree_mode() -> WorktreeMode {
    WorktreeMode::Prompt
}

fn default_keep_alive() -> bool {
    true
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Default working directory for new sessions.
    pub working_dir: PathBuf,
    /// Permission handling for child tool calls.
    #[serde(default = "default_permissions_mode")]
    pub permissions_mode: PermissionsMode,
    /// Whether the child is started with browser tooling enabled.
    #[serde(default)]
    pub chrome: bool,
    /// When to offer git-worktree isolation.
    #[serde(default = "default_worktree_mode")]
    pub worktree_mode: WorktreeMode,
    /// Keep child processes alive across platform disconnects.
    #[serde(default = "default_keep_alive")]
    pub keep_alive: bool,
    /// Maximum concurrent active sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u32,
    /// Idle threshold before a session is paused.
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    /// Timeout for child-originated permission prompts.
    #[serde(default = "default_permission_timeout_ms")]
    pub permission_timeout_ms: u64,
    /// Streaming formatter thresholds.
    #[serde(default)]
    pub stream: StreamConfig,
    /// Realtime-connection resilience thresholds.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Slack adapter settings; absent disables the platform.
    #[serde(default)]
    pub slack: Option<SlackConfig>,
    /// Mattermost adapter settings; absent disables the platform.
    #[serde(default)]
    pub mattermost: Option<MattermostConfig>,
    /// Path of the session snapshot file. Defaults to
    /// `sessions.json` next to the config file.
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Path of the persisted session snapshot.
    #[must_use]
    pub fn state_file(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| self.working_dir.join(".thread-relay").join("sessions.json"))
    }

    /// Fill empty platform tokens from environment variables, then from the
    /// OS keyring.
    ///
    /// Missing credentials are not an error here; a platform with no token
    /// is simply left disabled and reported by [`Self::enabled_platforms`].
    pub fn load_credentials(&mut self) {
        if let Some(ref mut slack) = self.slack {
            fill_credential(&mut slack.bot_token, "SLACK_BOT_TOKEN", "slack-bot-token");
            fill_credential(&mut slack.app_token, "SLACK_APP_TOKEN", "slack-app-token");
        }
        if let Some(ref mut mm) = self.mattermost {
            fill_credential(&mut mm.token, "MATTERMOST_TOKEN", "mattermost-token");
        }
    }

    /// Names of platforms with complete credentials.
    #[must_use]
    pub fn enabled_platforms(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if let Some(ref slack) = self.slack {
            if !slack.bot_token.is_empty() && !slack.app_token.is_empty() {
                out.push("slack");
            }
        }
        if let Some(ref mm) = self.mattermost {
            if !mm.url.is_empty() && !mm.token.is_empty() {
                out.push("mattermost");
            }
        }
        out
    }

    fn validate(&mut self) -> Result<()> {
        if self.max_sessions == 0 {
            return Err(AppError::Config("max_sessions must be greater than zero".into()));
        }

        if self.stream.min_break_chars >= self.stream.soft_break_chars {
            return Err(AppError::Config(
                "stream.min_break_chars must be below stream.soft_break_chars".into(),
            ));
        }

        if self.slack.is_none() && self.mattermost.is_none() {
            return Err(AppError::Config(
                "at least one platform (slack or mattermost) must be configured".into(),
            ));
        }

        let canonical = self
            .working_dir
            .canonicalize()
            .map_err(|err| AppError::Config(format!("working_dir invalid: {err}")))?;
        self.working_dir = canonical;

        Ok(())
    }
}

/// Fill `slot` from an environment variable, then from the keyring entry
/// under the `thread-relay` service, leaving it untouched when already set.
fn fill_credential(slot: &mut String, env_var: &str, keyring_user: &str) {
    if !slot.is_empty() {
        return;
    }

    if let Ok(value) = std::env::var(env_var) {
        if !value.is_empty() {
            *slot = value;
            return;
        }
    }

    match keyring::Entry::new(KEYRING_SERVICE, keyring_user) {
        Ok(entry) => {
            if let Ok(secret) = entry.get_password() {
                *slot = secret;
            }
        }
        Err(err) => {
            tracing::debug!(%err, keyring_user, "keyring entry unavailable");
        }
    }
}
