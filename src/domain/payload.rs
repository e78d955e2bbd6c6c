use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    SteamSpy,
    SteamReviews,
    SteamStore,
}

/// One JSON document as returned by an upstream API, together with the
/// context the normalizer needs. The fetch time travels with the payload so
/// normalization never reads the clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPayload {
    pub source: Source,
    pub fetched_at: DateTime<Utc>,
    /// App id the request was made for, when the request was per game.
    pub appid: Option<u64>,
    pub body: Value,
}

impl RawPayload {
    pub fn new(source: Source, appid: Option<u64>, body: Value) -> Self {
        Self {
            source,
            fetched_at: Utc::now(),
            appid,
            body,
        }
    }
}
