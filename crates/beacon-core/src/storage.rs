//! Durable storage for monitoring state.
//!
//! The monitored-region table is snapshotted to a single JSON file so a
//! process killed by the OS can resume without re-announcing regions it never
//! left. Writes happen on a background task; the dispatch path only enqueues.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{BeaconError, Result};
use crate::monitoring::MonitoringState;
use crate::region::Region;

/// File name of the monitoring snapshot inside the data directory.
pub const STATUS_FILE_NAME: &str = "monitoring_status.json";

/// Snapshots older than this are ignored when restoring.
pub const MAX_SNAPSHOT_AGE_SECS: i64 = 15 * 60;

/// Returns the default data directory.
///
/// On Linux: `/var/lib/beacon-scan`
/// Elsewhere: the platform data directory for `beacon-scan`.
///
/// # Errors
///
/// Returns an error if the platform data directory cannot be determined.
pub fn default_data_dir() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        Ok(PathBuf::from("/var/lib/beacon-scan"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let dirs = directories::ProjectDirs::from("", "", "beacon-scan").ok_or_else(|| {
            BeaconError::PersistenceError("Cannot determine data directory".into())
        })?;
        Ok(dirs.data_dir().to_path_buf())
    }
}

/// One monitored region as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRegion {
    /// The monitored region.
    pub region: Region,
    /// Its membership state and callback.
    pub state: MonitoringState,
}

/// Point-in-time copy of the monitored-region table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// When the snapshot was taken.
    pub saved_at: DateTime<Utc>,
    /// Every monitored region.
    pub regions: Vec<PersistedRegion>,
}

impl StatusSnapshot {
    /// Returns `true` if the snapshot is too old to trust at `now`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.saved_at) > Duration::seconds(MAX_SNAPSHOT_AGE_SECS)
    }
}

/// File-backed store for [`StatusSnapshot`]s.
#[derive(Debug, Clone)]
pub struct StatusStore {
    data_dir: PathBuf,
}

impl StatusStore {
    /// Create a store rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Create a store in the default data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be determined.
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(default_data_dir()?))
    }

    /// Path of the snapshot file.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.data_dir.join(STATUS_FILE_NAME)
    }

    /// Load the last snapshot, if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<Option<StatusSnapshot>> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let snapshot: StatusSnapshot = serde_json::from_str(&content)?;
        Ok(Some(snapshot))
    }

    /// Write a snapshot, replacing the previous one atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&self, snapshot: &StatusSnapshot) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        let content = serde_json::to_string_pretty(snapshot)?;
        let tmp = self.data_dir.join(format!("{STATUS_FILE_NAME}.tmp"));
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, self.path())?;
        Ok(())
    }

    /// Delete the snapshot. Succeeds if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(self.path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// The directory snapshots are written to.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

#[derive(Debug)]
enum PersistOp {
    Save(StatusSnapshot),
    Clear,
    Flush(oneshot::Sender<()>),
}

/// Fire-and-forget writer for monitoring snapshots.
///
/// Operations are queued to a background task and applied in order; callers
/// never wait on disk. Write failures are logged and otherwise ignored.
#[derive(Debug, Clone)]
pub struct StatusPersister {
    tx: mpsc::UnboundedSender<PersistOp>,
}

impl StatusPersister {
    /// Spawn the writer task on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::RuntimeUnavailable`] when called outside a
    /// runtime.
    pub fn spawn(store: StatusStore) -> Result<Self> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| BeaconError::RuntimeUnavailable(e.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        handle.spawn(writer_loop(store, rx));
        Ok(Self { tx })
    }

    /// Queue a snapshot write.
    pub fn save(&self, snapshot: StatusSnapshot) {
        self.enqueue(PersistOp::Save(snapshot));
    }

    /// Queue deletion of the snapshot.
    pub fn clear(&self) {
        self.enqueue(PersistOp::Clear);
    }

    /// Wait until every operation queued so far has been applied.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.enqueue(PersistOp::Flush(done_tx));
        let _ = done_rx.await;
    }

    fn enqueue(&self, op: PersistOp) {
        if self.tx.send(op).is_err() {
            warn!("Monitoring status writer has stopped; dropping persistence request");
        }
    }
}

async fn writer_loop(store: StatusStore, mut rx: mpsc::UnboundedReceiver<PersistOp>) {
    while let Some(op) = rx.recv().await {
        let store = store.clone();
        let result = match op {
            PersistOp::Save(snapshot) => {
                let count = snapshot.regions.len();
                tokio::task::spawn_blocking(move || store.save(&snapshot))
                    .await
                    .map(|r| r.map(|()| debug!(regions = count, "Saved monitoring status")))
            }
            PersistOp::Clear => tokio::task::spawn_blocking(move || store.clear()).await,
            PersistOp::Flush(done) => {
                let _ = done.send(());
                continue;
            }
        };

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to persist monitoring status"),
            Err(e) => warn!(error = %e, "Monitoring status write task failed"),
        }
    }
    debug!("Monitoring status writer stopped");
}
