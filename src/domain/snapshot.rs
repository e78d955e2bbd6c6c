use super::GameRecord;
use crate::error::{ErrorKind, HarvestError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const KEY_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Identifies one collection cycle. Fixed-width UTC timestamp, so lexical
/// order is chronological order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SnapshotKey(String);

impl SnapshotKey {
    pub fn at(time: DateTime<Utc>) -> Self {
        Self(time.format(KEY_FORMAT).to_string())
    }

    pub fn parse(raw: &str) -> Result<Self> {
        NaiveDateTime::parse_from_str(raw, KEY_FORMAT)
            .map(|naive| Self::at(naive.and_utc()))
            .map_err(|e| HarvestError::Config(format!("invalid snapshot key {raw:?}: {e}")))
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        // Keys are only ever built through `at`/`parse`.
        NaiveDateTime::parse_from_str(&self.0, KEY_FORMAT)
            .map(|naive| naive.and_utc())
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SnapshotKey {
    type Error = HarvestError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<SnapshotKey> for String {
    fn from(key: SnapshotKey) -> Self {
        key.0
    }
}

/// One output row: a game plus the aggregate of its reviews.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedGame {
    pub game: GameRecord,
    pub review_count: u64,
    /// Mean over reviews with a known score, `None` when there are none.
    pub mean_sentiment: Option<f64>,
    pub positive_count: u64,
    pub helpful_votes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    FetchGames,
    NormalizeGames,
    ReleaseDates,
    FetchReviews,
    NormalizeReviews,
    Join,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: ErrorKind,
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appid: Option<u64>,
    pub message: String,
}

impl Issue {
    pub fn new(kind: ErrorKind, stage: Stage, appid: Option<u64>, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            appid,
            message: message.into(),
        }
    }

    pub fn from_error(stage: Stage, appid: Option<u64>, error: &HarvestError) -> Self {
        Self::new(error.kind(), stage, appid, error.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageCounts {
    pub games_requested: usize,
    pub games_fetched: usize,
    pub games_normalized: usize,
    pub reviews_fetched: usize,
    pub reviews_normalized: usize,
    pub reviews_joined: usize,
    pub reviews_quarantined: usize,
    pub unknown_fields: usize,
    pub rows_written: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotReport {
    pub snapshot: SnapshotKey,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub counts: StageCounts,
    pub issues: Vec<Issue>,
    pub version: String,
}

impl SnapshotReport {
    pub fn new(snapshot: SnapshotKey, started_at: DateTime<Utc>) -> Self {
        Self {
            snapshot,
            started_at,
            finished_at: started_at,
            counts: StageCounts::default(),
            issues: Vec::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn issues_of(&self, kind: ErrorKind) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(move |issue| issue.kind == kind)
    }
}

/// Persisted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorState {
    pub last_update: DateTime<Utc>,
    pub last_snapshot: SnapshotKey,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn key_round_trips_through_timestamp() {
        let time = Utc.with_ymd_and_hms(2024, 3, 9, 17, 5, 1).unwrap();
        let key = SnapshotKey::at(time);
        assert_eq!(key.as_str(), "20240309T170501Z");
        assert_eq!(key.timestamp(), time);
        assert_eq!(SnapshotKey::parse("20240309T170501Z").unwrap(), key);
    }

    #[test]
    fn keys_order_chronologically() {
        let older = SnapshotKey::parse("20231231T235959Z").unwrap();
        let newer = SnapshotKey::parse("20240101T000000Z").unwrap();
        assert!(older < newer);
    }

    #[test]
    fn rejects_garbage_keys() {
        assert!(SnapshotKey::parse("steam_games_2024").is_err());
        assert!(serde_json::from_str::<SnapshotKey>("\"nope\"").is_err());
    }
}
