use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Retryable: rate limits, timeouts, upstream 5xx.
    Transient,
    /// Not retried: auth failures, malformed requests, schema mismatches.
    Permanent,
    /// Bad or unresolvable data. Quarantined, never fatal for the run.
    DataQuality,
}

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Transient error: {0}")]
    Transient(String),
    #[error("Permanent error: {0}")]
    Permanent(String),
    #[error("Data quality error: {0}")]
    DataQuality(String),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Snapshot {0} is locked by another writer")]
    SnapshotLocked(String),
    #[error("Snapshot {0} is already committed with different content")]
    SnapshotConflict(String),
}

impl HarvestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HarvestError::Transient(_) => ErrorKind::Transient,
            HarvestError::DataQuality(_) => ErrorKind::DataQuality,
            HarvestError::Network(e) if e.is_timeout() || e.is_connect() => ErrorKind::Transient,
            HarvestError::Network(e) if e.is_decode() => ErrorKind::Permanent,
            HarvestError::Network(e) => match e.status() {
                Some(status) if status.as_u16() == 429 || status.is_server_error() => {
                    ErrorKind::Transient
                }
                Some(_) => ErrorKind::Permanent,
                None => ErrorKind::Transient,
            },
            HarvestError::SnapshotLocked(_) => ErrorKind::Transient,
            HarvestError::Permanent(_)
            | HarvestError::Io(_)
            | HarvestError::Serialization(_)
            | HarvestError::Config(_)
            | HarvestError::SnapshotConflict(_) => ErrorKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;
