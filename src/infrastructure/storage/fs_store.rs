use crate::domain::storage::{CommitOutcome, SnapshotWriter, Storage, StorageKeys};
use crate::domain::{
    CollectorState, GameRecord, JoinedGame, ReviewRecord, SnapshotKey, SnapshotReport,
};
use crate::error::{HarvestError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_STALE_LOCK_AFTER: Duration = Duration::from_secs(6 * 60 * 60);
/// A lock without readable owner data may still be mid-write.
const UNREADABLE_LOCK_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct FileSystemStore {
    data_dir: PathBuf,
    stale_lock_after: Duration,
}

/// Contents of a `<key>.lock` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LockOwner {
    pid: u32,
    acquired_at: DateTime<Utc>,
}

impl LockOwner {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }

    fn read(path: &Path) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// A lock is stale once its process is gone or it is older than
    /// `max_age`.
    fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        let expired = (now - self.acquired_at)
            .to_std()
            .is_ok_and(|age| age >= max_age);
        expired || !process_alive(self.pid)
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

impl FileSystemStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            stale_lock_after: DEFAULT_STALE_LOCK_AFTER,
        }
    }

    pub fn with_stale_lock_after(mut self, stale_lock_after: Duration) -> Self {
        self.stale_lock_after = stale_lock_after;
        self
    }

    fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join(StorageKeys::SNAPSHOTS_DIR)
    }

    fn snapshot_dir(&self, key: &SnapshotKey) -> PathBuf {
        self.snapshots_dir().join(key.as_str())
    }

    fn ensure_dir(dir: &Path) -> Result<()> {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Creates the lock file for `key`. A lock left behind by a crashed or
    /// killed run is reclaimed once; a live one yields `SnapshotLocked`.
    fn acquire_lock(&self, key: &SnapshotKey, lock_path: &Path) -> Result<LockOwner> {
        let owner = LockOwner::current();
        let mut reclaimed = false;

        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(lock_path)
            {
                Ok(mut file) => {
                    file.write_all(serde_json::to_string(&owner)?.as_bytes())?;
                    return Ok(owner);
                }
                Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                    if reclaimed || !self.lock_is_stale(lock_path) {
                        return Err(HarvestError::SnapshotLocked(key.to_string()));
                    }
                    warn!(snapshot = %key, "Reclaiming stale snapshot lock");
                    match fs::remove_file(lock_path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == IoErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                    reclaimed = true;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn lock_is_stale(&self, lock_path: &Path) -> bool {
        match LockOwner::read(lock_path) {
            Some(holder) => holder.is_stale(Utc::now(), self.stale_lock_after),
            None => fs::metadata(lock_path)
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .is_some_and(|age| age >= UNREADABLE_LOCK_GRACE),
        }
    }
}

fn json_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}.json", key))
}

fn write_json_file<T: serde::Serialize + ?Sized>(dir: &Path, key: &str, data: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(data)?;
    fs::write(json_path(dir, key), content)?;
    Ok(())
}

fn read_json_file<T: serde::de::DeserializeOwned>(dir: &Path, key: &str) -> Result<Option<T>> {
    let path = json_path(dir, key);
    if path.exists() {
        let content = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    } else {
        Ok(None)
    }
}

impl Storage for FileSystemStore {
    fn open_snapshot(&self, key: &SnapshotKey) -> Result<Box<dyn SnapshotWriter>> {
        let snapshots_dir = self.snapshots_dir();
        Self::ensure_dir(&snapshots_dir)?;

        let lock_path = snapshots_dir.join(format!("{}.lock", key));
        let owner = self.acquire_lock(key, &lock_path)?;

        // From here on the writer owns the lock and cleans it up on drop.
        let writer = FsSnapshotWriter {
            key: key.clone(),
            staging_dir: snapshots_dir.join(format!(".{}.staging", key)),
            final_dir: self.snapshot_dir(key),
            lock_path,
            owner,
            finished: false,
        };

        if writer.staging_dir.exists() {
            warn!(snapshot = %key, "Removing stale staging data from an earlier run");
            fs::remove_dir_all(&writer.staging_dir)?;
        }
        fs::create_dir_all(&writer.staging_dir)?;

        debug!(snapshot = %key, "Opened snapshot for writing");
        Ok(Box::new(writer))
    }

    fn is_committed(&self, key: &SnapshotKey) -> bool {
        self.snapshot_dir(key).is_dir()
    }

    fn list_snapshots(&self) -> Result<Vec<SnapshotKey>> {
        let dir = self.snapshots_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            match SnapshotKey::parse(&name) {
                Ok(key) => keys.push(key),
                Err(_) => warn!(entry = %name, "Ignoring unrecognised entry in snapshots dir"),
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn load_report(&self, key: &SnapshotKey) -> Result<Option<SnapshotReport>> {
        read_json_file(&self.snapshot_dir(key), StorageKeys::REPORT)
    }

    fn load_joined(&self, key: &SnapshotKey) -> Result<Option<Vec<JoinedGame>>> {
        read_json_file(&self.snapshot_dir(key), StorageKeys::JOINED)
    }

    fn remove_snapshot(&self, key: &SnapshotKey) -> Result<()> {
        let dir = self.snapshot_dir(key);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    fn load_state(&self) -> Result<Option<CollectorState>> {
        read_json_file(&self.data_dir, StorageKeys::STATE)
    }

    fn save_state(&self, state: &CollectorState) -> Result<()> {
        Self::ensure_dir(&self.data_dir)?;
        write_json_file(&self.data_dir, StorageKeys::STATE, state)
    }
}

struct FsSnapshotWriter {
    key: SnapshotKey,
    staging_dir: PathBuf,
    final_dir: PathBuf,
    lock_path: PathBuf,
    owner: LockOwner,
    finished: bool,
}

impl FsSnapshotWriter {
    fn staged_matches_committed(&self) -> bool {
        StorageKeys::DATA_FILES.iter().all(|name| {
            let staged = fs::read(json_path(&self.staging_dir, name)).ok();
            let committed = fs::read(json_path(&self.final_dir, name)).ok();
            staged == committed
        })
    }
}

impl SnapshotWriter for FsSnapshotWriter {
    fn key(&self) -> &SnapshotKey {
        &self.key
    }

    fn write_games(&mut self, games: &[GameRecord]) -> Result<()> {
        write_json_file(&self.staging_dir, StorageKeys::GAMES, games)
    }

    fn write_reviews(&mut self, reviews: &[ReviewRecord]) -> Result<()> {
        write_json_file(&self.staging_dir, StorageKeys::REVIEWS, reviews)
    }

    fn write_joined(&mut self, rows: &[JoinedGame]) -> Result<()> {
        let mut ids: Vec<u64> = rows.iter().map(|row| row.game.appid).collect();
        ids.sort_unstable();
        if let Some(pair) = ids.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(HarvestError::Permanent(format!(
                "duplicate row for app {} in snapshot {}",
                pair[0], self.key
            )));
        }
        write_json_file(&self.staging_dir, StorageKeys::JOINED, rows)
    }

    fn write_quarantined(&mut self, reviews: &[ReviewRecord]) -> Result<()> {
        write_json_file(&self.staging_dir, StorageKeys::QUARANTINE, reviews)
    }

    fn write_report(&mut self, report: &SnapshotReport) -> Result<()> {
        write_json_file(&self.staging_dir, StorageKeys::REPORT, report)
    }

    fn commit(mut self: Box<Self>) -> Result<CommitOutcome> {
        if self.final_dir.exists() {
            if self.staged_matches_committed() {
                info!(snapshot = %self.key, "Snapshot already committed with identical data");
                fs::remove_dir_all(&self.staging_dir)?;
                self.finished = true;
                return Ok(CommitOutcome::Unchanged);
            }
            return Err(HarvestError::SnapshotConflict(self.key.to_string()));
        }

        fs::rename(&self.staging_dir, &self.final_dir)?;
        self.finished = true;
        info!(snapshot = %self.key, path = %self.final_dir.display(), "Committed snapshot");
        Ok(CommitOutcome::Committed)
    }
}

impl Drop for FsSnapshotWriter {
    fn drop(&mut self) {
        if !self.finished && self.staging_dir.exists() {
            warn!(snapshot = %self.key, "Discarding uncommitted snapshot data");
            if let Err(e) = fs::remove_dir_all(&self.staging_dir) {
                warn!(snapshot = %self.key, error = %e, "Failed to remove staging dir");
            }
        }
        if LockOwner::read(&self.lock_path).as_ref() != Some(&self.owner) {
            warn!(snapshot = %self.key, "Snapshot lock was taken over, leaving it in place");
            return;
        }
        if let Err(e) = fs::remove_file(&self.lock_path) {
            warn!(snapshot = %self.key, error = %e, "Failed to release snapshot lock");
        }
    }
}
