//! Assistant CLI child process over NDJSON stdio.
//!
//! Spawns the assistant CLI with `kill_on_drop(true)`, reads its
//! newline-delimited JSON event stream through [`StreamCodec`], and writes
//! user messages to its stdin from a buffered channel. One process per
//! session; the session's working directory is the child's cwd.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::child::codec::StreamCodec;
use crate::child::{ChildEvent, ChildLauncher, ChildProcess, ContentBlock, SpawnOptions, Usage, UserContent};
use crate::{AppError, Result};

const EVENT_QUEUE_CAPACITY: usize = 256;
const OUTBOUND_QUEUE_CAPACITY: usize = 64;
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Launcher for the assistant CLI.
#[derive(Debug, Clone)]
pub struct ClaudeLauncher {
    /// Binary name or path of the assistant CLI.
    pub binary: String,
}

impl Default for ClaudeLauncher {
    fn default() -> Self {
        Self { binary: "claude".into() }
    }
}

#[async_trait]
impl ChildLauncher for ClaudeLauncher {
    async fn launch(
        &self,
        options: SpawnOptions,
    ) -> Result<(Arc<dyn ChildProcess>, mpsc::Receiver<ChildEvent>)> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--output-format")
            .arg("stream-json")
            .arg("--input-format")
            .arg("stream-json")
            .arg("--verbose");

        if options.skip_permissions {
            cmd.arg("--dangerously-skip-permissions");
        }
        match &options.resume {
            Some(previous) => {
                cmd.arg("--resume").arg(previous);
            }
            None => {
                cmd.arg("--session-id").arg(&options.session_id);
            }
        }
        if let Some(ref extra) = options.append_system_prompt {
            cmd.arg("--append-system-prompt").arg(extra);
        }

        cmd.env("THREAD_RELAY_THREAD_ID", &options.thread_id);
        if options.chrome {
            cmd.env("THREAD_RELAY_CHROME", "1");
        }
        if let Some(ref config) = options.platform_config {
            cmd.env("THREAD_RELAY_PERMISSION_CONFIG", config.to_string());
        }
        if let Some(timeout_ms) = options.permission_timeout_ms {
            cmd.env("THREAD_RELAY_PERMISSION_TIMEOUT_MS", timeout_ms.to_string());
        }

        cmd.current_dir(&options.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| AppError::Child(format!("failed to spawn assistant cli: {err}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Child("child stdout not captured".into()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Child("child stdin not captured".into()))?;

        let pid = child.id();
        info!(
            session_id = options.session_id,
            pid,
            working_dir = %options.working_dir.display(),
            "assistant process spawned"
        );

        let cancel = CancellationToken::new();
        let running = Arc::new(AtomicBool::new(true));
        let child = Arc::new(Mutex::new(Some(child)));
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);

        tokio::spawn(run_writer(
            options.session_id.clone(),
            stdin,
            outbound_rx,
            cancel.clone(),
        ));
        tokio::spawn(run_reader(
            options.session_id.clone(),
            stdout,
            event_tx,
            Arc::clone(&child),
            Arc::clone(&running),
            cancel.clone(),
        ));

        let process = ClaudeProcess {
            outbound_tx,
            cancel,
            running,
            child,
            pid,
        };

        Ok((Arc::new(process), event_rx))
    }
}

/// Handle to a running assistant process.
pub struct ClaudeProcess {
    outbound_tx: mpsc::Sender<serde_json::Value>,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
    child: Arc<Mutex<Option<Child>>>,
    pid: Option<u32>,
}

#[async_trait]
impl ChildProcess for ClaudeProcess {
    async fn send_message(&self, content: UserContent) -> Result<()> {
        let blocks = match content {
            UserContent::Text(text) => vec![serde_json::json!({"type": "text", "text": text})],
            UserContent::Blocks(blocks) => blocks,
        };
        let envelope = serde_json::json!({
            "type": "user",
            "message": {"role": "user", "content": blocks},
        });
        self.outbound_tx
            .send(envelope)
            .await
            .map_err(|err| AppError::Child(format!("failed to enqueue user message: {err}")))
    }

    async fn respond_permission(&self, request_id: &str, approved: bool) -> Result<()> {
        let behavior = if approved { "allow" } else { "deny" };
        let envelope = serde_json::json!({
            "type": "control_response",
            "request_id": request_id,
            "response": {"behavior": behavior},
        });
        self.outbound_tx
            .send(envelope)
            .await
            .map_err(|err| AppError::Child(format!("failed to enqueue permission response: {err}")))
    }

    async fn interrupt(&self) -> Result<()> {
        #[cfg(unix)]
        {
            let Some(pid) = self.pid else {
                return Err(AppError::Child("child pid unavailable".into()));
            };
            let pid = nix::unistd::Pid::from_raw(
                i32::try_from(pid).map_err(|_| AppError::Child("pid out of range".into()))?,
            );
            nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGINT)
                .map_err(|err| AppError::Child(format!("failed to signal child: {err}")))?;
            Ok(())
        }

        #[cfg(not(unix))]
        {
            warn!(pid = ?self.pid, "turn interrupt is not supported on this platform");
            Ok(())
        }
    }

    async fn kill(&self) -> Result<()> {
        self.cancel.cancel();
        let mut guard = self.child.lock().await;
        let Some(mut process) = guard.take() else {
            return Ok(());
        };
        drop(guard);

        // Closing stdin often lets the child exit on its own; give it a
        // bounded grace period before the hard kill.
        match tokio::time::timeout(KILL_GRACE, process.wait()).await {
            Ok(Ok(exit)) => {
                info!(?exit, "child exited within grace period");
            }
            Ok(Err(err)) => {
                warn!(%err, "error waiting for child exit");
            }
            Err(_) => {
                warn!("child did not exit within grace period, forcing kill");
                if let Err(err) = process.kill().await {
                    warn!(%err, "failed to force-kill child");
                }
            }
        }
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

// ── Wire format ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    subtype: Option<String>,
    message: Option<WireMessage>,
    usage: Option<Usage>,
    #[serde(default)]
    is_error: bool,
    session_id: Option<String>,
    error: Option<String>,
    request_id: Option<String>,
    description: Option<String>,
}

/// Parse one NDJSON line from the child into a [`ChildEvent`].
///
/// Returns `Ok(None)` for blank lines and unknown event types.
///
/// # Errors
///
/// Returns [`AppError::Child`] when the line is not valid JSON.
pub fn parse_event_line(line: &str) -> Result<Option<ChildEvent>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let event: WireEvent = serde_json::from_str(line)
        .map_err(|err| AppError::Child(format!("malformed child event: {err}")))?;

    let parsed = match event.kind.as_str() {
        "assistant" => Some(ChildEvent::Assistant {
            blocks: event.message.map(|m| m.content).unwrap_or_default(),
        }),
        "user" => Some(ChildEvent::User {
            blocks: event.message.map(|m| m.content).unwrap_or_default(),
        }),
        "result" => Some(ChildEvent::TurnResult {
            usage: event.usage,
            is_error: event.is_error,
            session_id: event.session_id,
        }),
        "system" => match event.subtype.as_deref() {
            Some("permission_request") => {
                let Some(request_id) = event.request_id else {
                    return Err(AppError::Child(
                        "permission_request without request_id".into(),
                    ));
                };
                Some(ChildEvent::PermissionRequest {
                    request_id,
                    description: event.description.unwrap_or_else(|| "tool action".into()),
                })
            }
            _ => Some(ChildEvent::System {
                subtype: event.subtype.unwrap_or_else(|| "unknown".into()),
                message: event.error,
            }),
        },
        other => {
            debug!(kind = other, "skipping unknown child event type");
            None
        }
    };

    Ok(parsed)
}

/// Reader task: frame stdout lines, parse, forward events, emit `Exit`.
async fn run_reader<R>(
    session_id: String,
    stdout: R,
    event_tx: mpsc::Sender<ChildEvent>,
    child: Arc<Mutex<Option<Child>>>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
) where
    R: tokio::io::AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, StreamCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, "child reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(session_id, "child reader: EOF");
                        let code = collect_exit_code(&child).await;
                        running.store(false, Ordering::SeqCst);
                        let _ = event_tx.send(ChildEvent::Exit { code }).await;
                        break;
                    }
                    Some(Err(AppError::Child(ref msg))) => {
                        warn!(session_id, error = msg.as_str(), "child reader: framing error, skipping");
                    }
                    Some(Err(err)) => {
                        warn!(session_id, error = %err, "child reader: IO error, stopping");
                        let code = collect_exit_code(&child).await;
                        running.store(false, Ordering::SeqCst);
                        let _ = event_tx.send(ChildEvent::Exit { code }).await;
                        break;
                    }
                    Some(Ok(line)) => match parse_event_line(&line) {
                        Ok(Some(event)) => {
                            if event_tx.send(event).await.is_err() {
                                debug!(session_id, "child reader: event channel closed, stopping");
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(err) => {
                            warn!(session_id, error = %err, "child reader: parse error, skipping line");
                        }
                    },
                }
            }
        }
    }
}

/// Wait briefly for the exited child and collect its exit code.
async fn collect_exit_code(child: &Arc<Mutex<Option<Child>>>) -> Option<i32> {
    let mut guard = child.lock().await;
    let process = guard.as_mut()?;
    match tokio::time::timeout(Duration::from_secs(2), process.wait()).await {
        Ok(Ok(status)) => {
            *guard = None;
            status.code()
        }
        _ => None,
    }
}

/// Writer task: serialise outbound messages and write NDJSON lines to stdin.
async fn run_writer(
    session_id: String,
    mut stdin: tokio::process::ChildStdin,
    mut outbound_rx: mpsc::Receiver<serde_json::Value>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, "child writer: cancellation received, stopping");
                break;
            }

            msg = outbound_rx.recv() => {
                let Some(value) = msg else {
                    debug!(session_id, "child writer: message channel closed, stopping");
                    break;
                };
                let mut bytes = match serde_json::to_vec(&value) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        warn!(session_id, %err, "child writer: failed to serialise message");
                        continue;
                    }
                };
                bytes.push(b'\n');
                if let Err(err) = stdin.write_all(&bytes).await {
                    warn!(session_id, %err, "child writer: write to stdin failed, stopping");
                    break;
                }
            }
        }
    }
}
