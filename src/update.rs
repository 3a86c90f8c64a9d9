//! Auto-update availability signal.
//!
//! The updater itself lives outside the core; the session manager only
//! consumes an availability signal to drive the update prompt and the
//! update-restart shutdown. A background checker polls a version manifest
//! and announces newer versions on a watch channel.

use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::Result;

/// Interval between manifest polls.
const CHECK_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Shared update-availability state.
pub struct UpdateNotifier {
    tx: watch::Sender<Option<String>>,
}

impl UpdateNotifier {
    /// Create the notifier and its receiver half.
    #[must_use]
    pub fn new() -> (Self, watch::Receiver<Option<String>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }

    /// Announce an available version.
    pub fn announce(&self, version: impl Into<String>) {
        let version = version.into();
        self.tx.send_if_modified(|current| {
            if current.as_deref() == Some(version.as_str()) {
                false
            } else {
                *current = Some(version);
                true
            }
        });
    }

    /// The most recently announced version, if any.
    #[must_use]
    pub fn latest(&self) -> Option<String> {
        self.tx.borrow().clone()
    }
}

/// Fetch the latest published version from a JSON manifest (`{"version": …}`).
///
/// # Errors
///
/// Returns `AppError::Platform` on network or decode failure.
pub async fn fetch_latest_version(manifest_url: &str) -> Result<String> {
    #[derive(serde::Deserialize)]
    struct Manifest {
        version: String,
    }

    let manifest: Manifest = reqwest::get(manifest_url)
        .await
        .map_err(|err| crate::AppError::Platform(format!("version check failed: {err}")))?
        .json()
        .await
        .map_err(|err| crate::AppError::Platform(format!("bad version manifest: {err}")))?;
    Ok(manifest.version)
}

/// Spawn the background version checker.
///
/// Announces through `notifier` whenever the manifest reports a version
/// different from `current`. Silent on network failure.
pub fn spawn_checker(
    notifier: UpdateNotifier,
    manifest_url: String,
    current: String,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match fetch_latest_version(&manifest_url).await {
                Ok(latest) if latest != current => {
                    debug!(latest, current, "update available");
                    notifier.announce(latest);
                }
                Ok(_) => {}
                Err(err) => warn!(%err, "update check failed"),
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(CHECK_INTERVAL) => {}
            }
        }
    })
}
