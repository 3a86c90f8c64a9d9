//! Durable session snapshot on local disk.
//!
//! All writes are serialized through the store and performed as
//! write-temp-then-rename so a crash can never leave a torn file.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::persistence::Snapshot;
use crate::{AppError, Result};

/// Snapshot store bound to one file path.
pub struct SessionStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SessionStore {
    /// Create a store for the given path. The parent directory is created
    /// on the first save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// The snapshot file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot. A missing file yields an empty snapshot.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` when the file exists but cannot be read
    /// or parsed.
    pub fn load(&self) -> Result<Snapshot> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => {
                let snapshot = serde_json::from_str(&raw)
                    .map_err(|err| AppError::Store(format!("corrupt snapshot: {err}")))?;
                Ok(snapshot)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no snapshot file, starting empty");
                Ok(Snapshot::default())
            }
            Err(err) => Err(AppError::Store(format!("failed to read snapshot: {err}"))),
        }
    }

    /// Write the snapshot atomically (temp file + rename).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` on serialization or file-system failure.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let parent = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&parent)
            .map_err(|err| AppError::Store(format!("failed to create state dir: {err}")))?;

        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|err| AppError::Store(format!("failed to serialize snapshot: {err}")))?;

        // The temp file must live in the same directory as the target so
        // the final rename stays on one filesystem.
        let tmp = tempfile::NamedTempFile::new_in(&parent)
            .map_err(|err| AppError::Store(format!("failed to create temp file: {err}")))?;
        std::fs::write(tmp.path(), json.as_bytes())
            .map_err(|err| AppError::Store(format!("failed to write snapshot: {err}")))?;
        tmp.persist(&self.path)
            .map_err(|err| AppError::Store(format!("failed to rename snapshot: {err}")))?;

        info!(
            path = %self.path.display(),
            sessions = snapshot.sessions.len(),
            "session snapshot written"
        );
        Ok(())
    }
}
