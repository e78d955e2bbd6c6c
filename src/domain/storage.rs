use super::{CollectorState, GameRecord, JoinedGame, ReviewRecord, SnapshotKey, SnapshotReport};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The key was already committed with byte-identical data.
    Unchanged,
}

/// Scoped write access to one snapshot. Holding the writer holds the
/// snapshot's lock; dropping it without `commit` discards everything written
/// and releases the lock.
pub trait SnapshotWriter: Send {
    fn key(&self) -> &SnapshotKey;
    fn write_games(&mut self, games: &[GameRecord]) -> Result<()>;
    fn write_reviews(&mut self, reviews: &[ReviewRecord]) -> Result<()>;
    fn write_joined(&mut self, rows: &[JoinedGame]) -> Result<()>;
    fn write_quarantined(&mut self, reviews: &[ReviewRecord]) -> Result<()>;
    fn write_report(&mut self, report: &SnapshotReport) -> Result<()>;
    fn commit(self: Box<Self>) -> Result<CommitOutcome>;
}

pub trait Storage: Send + Sync {
    fn open_snapshot(&self, key: &SnapshotKey) -> Result<Box<dyn SnapshotWriter>>;
    fn is_committed(&self, key: &SnapshotKey) -> bool;
    fn list_snapshots(&self) -> Result<Vec<SnapshotKey>>;
    fn load_report(&self, key: &SnapshotKey) -> Result<Option<SnapshotReport>>;
    fn load_joined(&self, key: &SnapshotKey) -> Result<Option<Vec<JoinedGame>>>;
    fn remove_snapshot(&self, key: &SnapshotKey) -> Result<()>;
    fn load_state(&self) -> Result<Option<CollectorState>>;
    fn save_state(&self, state: &CollectorState) -> Result<()>;
}

pub struct StorageKeys;

impl StorageKeys {
    pub const SNAPSHOTS_DIR: &'static str = "snapshots";

    pub const GAMES: &'static str = "games";
    pub const REVIEWS: &'static str = "reviews";
    pub const JOINED: &'static str = "joined";
    pub const QUARANTINE: &'static str = "quarantine";
    pub const REPORT: &'static str = "report";
    pub const STATE: &'static str = "state";

    /// Files compared when a committed snapshot is written again.
    pub const DATA_FILES: [&'static str; 4] =
        [Self::GAMES, Self::REVIEWS, Self::JOINED, Self::QUARANTINE];
}
