mod game;
mod observed;
mod payload;
mod review;
mod snapshot;
pub(crate) mod storage;

pub use game::{GameRecord, OwnersRange, Price};
pub use observed::Observed;
pub use payload::{RawPayload, Source};
pub use review::{
    ReviewRecord, Sentiment, SentimentLabel, SentimentScorer, VoteWeightedScorer,
};
pub use snapshot::{CollectorState, Issue, JoinedGame, SnapshotKey, SnapshotReport, Stage};
