use super::Observed;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Unknown,
}

/// Review positivity. Scores live in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    pub label: SentimentLabel,
    pub score: Observed<f64>,
}

impl Sentiment {
    pub fn unknown() -> Self {
        Self {
            label: SentimentLabel::Unknown,
            score: Observed::Unknown,
        }
    }

    fn scored(label: SentimentLabel, score: f64) -> Self {
        Self {
            label,
            score: Observed::Known(score.clamp(0.0, 1.0)),
        }
    }
}

/// Maps a normalized review onto a sentiment label and a score in `[0, 1]`.
pub trait SentimentScorer: Send + Sync {
    fn score(&self, review: &ReviewRecord) -> Sentiment;
}

/// Uses the thumbs up or down as polarity and the weighted vote score as
/// confidence: `0.5 + 0.5 * w` for an up vote, `0.5 - 0.5 * w` for a down
/// vote. Without a weighted score the polarity alone decides (1.0 or 0.0).
#[derive(Debug, Clone, Copy, Default)]
pub struct VoteWeightedScorer;

impl SentimentScorer for VoteWeightedScorer {
    fn score(&self, review: &ReviewRecord) -> Sentiment {
        let confidence = review
            .helpfulness
            .weighted_vote_score
            .known()
            .map(|w| w.clamp(0.0, 1.0))
            .unwrap_or(1.0);

        match review.voted_up {
            Observed::Known(true) => {
                Sentiment::scored(SentimentLabel::Positive, 0.5 + 0.5 * confidence)
            }
            Observed::Known(false) => {
                Sentiment::scored(SentimentLabel::Negative, 0.5 - 0.5 * confidence)
            }
            Observed::Unknown => Sentiment::unknown(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Helpfulness {
    pub votes_up: Observed<u64>,
    pub votes_funny: Observed<u64>,
    pub weighted_vote_score: Observed<f64>,
}

/// Minutes, as reported by the reviews API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorPlaytime {
    pub at_review: Observed<u64>,
    pub forever: Observed<u64>,
    pub last_two_weeks: Observed<u64>,
    pub last_played: Observed<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub recommendation_id: String,
    pub appid: u64,
    pub author_steamid: Observed<String>,
    pub text: Observed<String>,
    pub language: Observed<String>,
    pub voted_up: Observed<bool>,
    pub sentiment: Sentiment,
    pub created_at: Observed<DateTime<Utc>>,
    pub updated_at: Observed<DateTime<Utc>>,
    pub helpfulness: Helpfulness,
    pub playtime: AuthorPlaytime,
    pub steam_purchase: Observed<bool>,
    pub received_for_free: Observed<bool>,
    pub written_during_early_access: Observed<bool>,
    pub fetched_at: DateTime<Utc>,
}

impl ReviewRecord {
    pub fn new(recommendation_id: String, appid: u64, fetched_at: DateTime<Utc>) -> Self {
        Self {
            recommendation_id,
            appid,
            author_steamid: Observed::Unknown,
            text: Observed::Unknown,
            language: Observed::Unknown,
            voted_up: Observed::Unknown,
            sentiment: Sentiment::unknown(),
            created_at: Observed::Unknown,
            updated_at: Observed::Unknown,
            helpfulness: Helpfulness::default(),
            playtime: AuthorPlaytime::default(),
            steam_purchase: Observed::Unknown,
            received_for_free: Observed::Unknown,
            written_during_early_access: Observed::Unknown,
            fetched_at,
        }
    }

    pub fn unknown_fields(&self) -> Vec<&'static str> {
        let checks = [
            ("author_steamid", self.author_steamid.is_unknown()),
            ("text", self.text.is_unknown()),
            ("voted_up", self.voted_up.is_unknown()),
            ("created_at", self.created_at.is_unknown()),
            ("updated_at", self.updated_at.is_unknown()),
            ("votes_up", self.helpfulness.votes_up.is_unknown()),
            ("votes_funny", self.helpfulness.votes_funny.is_unknown()),
            (
                "weighted_vote_score",
                self.helpfulness.weighted_vote_score.is_unknown(),
            ),
        ];
        checks
            .into_iter()
            .filter(|(_, unknown)| *unknown)
            .map(|(name, _)| name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn review(voted_up: Observed<bool>, weighted: Observed<f64>) -> ReviewRecord {
        let mut review = ReviewRecord::new(
            "1".to_string(),
            10,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        );
        review.voted_up = voted_up;
        review.helpfulness.weighted_vote_score = weighted;
        review
    }

    #[test]
    fn weighted_score_sets_confidence() {
        let scorer = VoteWeightedScorer;
        let weak = scorer.score(&review(Observed::Known(true), Observed::Known(0.10)));
        let strong = scorer.score(&review(Observed::Known(true), Observed::Known(0.95)));

        assert_eq!(weak.label, SentimentLabel::Positive);
        assert_eq!(strong.label, SentimentLabel::Positive);
        assert_ne!(weak.score, strong.score);
        assert!((weak.score.known().unwrap() - 0.55).abs() < 1e-9);
        assert!((strong.score.known().unwrap() - 0.975).abs() < 1e-9);

        let down = scorer.score(&review(Observed::Known(false), Observed::Known(0.8)));
        assert_eq!(down.label, SentimentLabel::Negative);
        assert!((down.score.known().unwrap() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn polarity_alone_without_weighted_score() {
        let scorer = VoteWeightedScorer;
        let up = scorer.score(&review(Observed::Known(true), Observed::Unknown));
        let down = scorer.score(&review(Observed::Known(false), Observed::Unknown));
        assert_eq!(up.score, Observed::Known(1.0));
        assert_eq!(down.score, Observed::Known(0.0));

        // Out of range scores are clamped.
        let odd = scorer.score(&review(Observed::Known(true), Observed::Known(3.0)));
        assert_eq!(odd.score, Observed::Known(1.0));

        let unknown = scorer.score(&review(Observed::Unknown, Observed::Known(0.9)));
        assert_eq!(unknown, Sentiment::unknown());
    }
}
