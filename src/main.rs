#![forbid(unsafe_code)]

//! `thread-relay` server binary.
//!
//! Bootstraps configuration, connects the enabled chat platforms, starts
//! the session manager, and handles graceful shutdown on SIGINT/SIGTERM
//! (a second signal force-exits).

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use thread_relay::child::claude::ClaudeLauncher;
use thread_relay::config::{GlobalConfig, PermissionsMode, WorktreeMode};
use thread_relay::persistence::store::SessionStore;
use thread_relay::platform::mattermost::MattermostAdapter;
use thread_relay::platform::slack::SlackAdapter;
use thread_relay::platform::PlatformAdapter;
use thread_relay::session::manager::{SessionManager, StopReason};
use thread_relay::update::{self, UpdateNotifier};
use thread_relay::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum WorktreeModeArg {
    Off,
    Prompt,
    Require,
}

#[derive(Debug, Parser)]
#[command(
    name = "thread-relay",
    about = "Bridge chat threads to assistant CLI sessions",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Run children with permission checks skipped.
    #[arg(long, overrides_with = "no_skip_permissions")]
    skip_permissions: bool,
    /// Force interactive permission prompts.
    #[arg(long)]
    no_skip_permissions: bool,

    /// Start children with browser tooling enabled.
    #[arg(long, overrides_with = "no_chrome")]
    chrome: bool,
    /// Disable browser tooling.
    #[arg(long)]
    no_chrome: bool,

    /// When to offer git-worktree isolation.
    #[arg(long, value_enum)]
    worktree_mode: Option<WorktreeModeArg>,

    /// Keep children alive across platform disconnects.
    #[arg(long, overrides_with = "no_keep_alive")]
    keep_alive: bool,
    /// Stop children when the platform connection drops.
    #[arg(long)]
    no_keep_alive: bool,

    /// Verbose logging.
    #[arg(long)]
    debug: bool,

    /// Skip the startup update check.
    #[arg(long)]
    skip_version_check: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format, args.debug)?;
    info!("thread-relay bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config).map_err(|err| {
        AppError::Config(format!(
            "cannot load config '{}': {err} — copy config.toml next to the binary \
             or pass --config <path>",
            args.config.display()
        ))
    })?;
    apply_cli_overrides(&mut config, &args);
    config.load_credentials();
    let config = Arc::new(config);

    let enabled = config.enabled_platforms();
    if enabled.is_empty() {
        return Err(AppError::Config(
            "no platform has complete credentials; set SLACK_BOT_TOKEN/SLACK_APP_TOKEN \
             or MATTERMOST_TOKEN"
                .into(),
        ));
    }
    info!(?enabled, "configuration loaded");

    // ── Update checker ──────────────────────────────────
    let ct = CancellationToken::new();
    let (notifier, update_rx) = UpdateNotifier::new();
    if !args.skip_version_check {
        if let Ok(manifest_url) = std::env::var("THREAD_RELAY_UPDATE_MANIFEST") {
            let _checker = update::spawn_checker(
                notifier,
                manifest_url,
                env!("CARGO_PKG_VERSION").to_owned(),
                ct.clone(),
            );
            info!("update checker started");
        }
    }

    // ── Session manager and platforms ───────────────────
    let store = Arc::new(SessionStore::new(config.state_file()));
    let cli_binary =
        std::env::var("THREAD_RELAY_CLI").unwrap_or_else(|_| "claude".into());
    let launcher = Arc::new(ClaudeLauncher { binary: cli_binary.clone() });
    let mut manager = SessionManager::new(
        Arc::clone(&config),
        store,
        launcher,
        cli_binary,
        update_rx,
    );

    if let Some(ref slack_config) = config.slack {
        if enabled.contains(&"slack") {
            let (adapter, events) = SlackAdapter::new(slack_config).await?;
            adapter.connect().await?;
            manager.add_platform(adapter, events);
            info!("slack platform attached");
        }
    }
    if let Some(ref mm_config) = config.mattermost {
        if enabled.contains(&"mattermost") {
            let (adapter, events) =
                MattermostAdapter::new(mm_config, config.reconnect).await?;
            adapter.connect().await?;
            manager.add_platform(adapter, events);
            info!("mattermost platform attached");
        }
    }

    // ── Resume persisted sessions ───────────────────────
    if let Err(err) = manager.resume_from_snapshot().await {
        warn!(%err, "could not resume persisted sessions; starting fresh");
    }

    // ── Run until a shutdown signal ─────────────────────
    let manager_ct = ct.clone();
    let manager_task = tokio::spawn(manager.run(manager_ct));

    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    // A second signal force-exits.
    tokio::spawn(async {
        shutdown_signal().await;
        error!("second shutdown signal received; forcing exit");
        std::process::exit(1);
    });

    match manager_task.await {
        Ok(StopReason::UpdateRestart) => {
            info!("shut down for update restart");
        }
        Ok(StopReason::Shutdown) => {
            info!("thread-relay shut down");
        }
        Err(err) => {
            error!(%err, "session manager task failed");
        }
    }

    Ok(())
}

fn apply_cli_overrides(config: &mut GlobalConfig, args: &Cli) {
    if args.skip_permissions {
        config.permissions_mode = PermissionsMode::Auto;
    }
    if args.no_skip_permissions {
        config.permissions_mode = PermissionsMode::Interactive;
    }
    if args.chrome {
        config.chrome = true;
    }
    if args.no_chrome {
        config.chrome = false;
    }
    if let Some(mode) = args.worktree_mode {
        config.worktree_mode = match mode {
            WorktreeModeArg::Off => WorktreeMode::Off,
            WorktreeModeArg::Prompt => WorktreeMode::Prompt,
            WorktreeModeArg::Require => WorktreeMode::Require,
        };
    }
    if args.keep_alive {
        config.keep_alive = true;
    }
    if args.no_keep_alive {
        config.keep_alive = false;
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat, debug: bool) -> Result<()> {
    let default_filter = if debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
