use crate::domain::{GameRecord, Issue, JoinedGame, ReviewRecord, SentimentLabel, Stage};
use crate::error::ErrorKind;
use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct JoinOutput {
    /// One row per game, ordered by appid.
    pub rows: Vec<JoinedGame>,
    /// The winning game vintages, ordered by appid.
    pub games: Vec<GameRecord>,
    /// Reviews that resolved to a game, ordered by (appid, recommendation id).
    pub reviews: Vec<ReviewRecord>,
    /// Reviews whose game is not part of the snapshot.
    pub quarantined: Vec<ReviewRecord>,
    pub issues: Vec<Issue>,
}

#[derive(Default)]
struct ReviewAggregate {
    count: u64,
    score_sum: f64,
    scored: u64,
    positive: u64,
    helpful_votes: u64,
}

impl ReviewAggregate {
    fn add(&mut self, review: &ReviewRecord) {
        self.count += 1;
        if let Some(score) = review.sentiment.score.known() {
            self.score_sum += score;
            self.scored += 1;
        }
        if review.sentiment.label == SentimentLabel::Positive {
            self.positive += 1;
        }
        self.helpful_votes += review.helpfulness.votes_up.known().copied().unwrap_or(0);
    }

    fn mean_sentiment(&self) -> Option<f64> {
        (self.scored > 0).then(|| self.score_sum / self.scored as f64)
    }
}

#[derive(Default)]
pub struct JoiningService;

impl JoiningService {
    pub fn new() -> Self {
        info!("Created new Joining Service");
        Self
    }

    /// Joins every game and review of one snapshot. Duplicates of the same
    /// game (or review) keep the most recently fetched vintage; on equal
    /// fetch times the later input wins.
    pub fn join(&self, games: Vec<GameRecord>, reviews: Vec<ReviewRecord>) -> JoinOutput {
        let games = latest_by_key(games, |g| g.appid, |g| g.fetched_at);
        let reviews = latest_by_key(
            reviews,
            |r| (r.appid, r.recommendation_id.clone()),
            |r| r.fetched_at,
        );

        let mut aggregates: FxHashMap<u64, ReviewAggregate> = games
            .iter()
            .map(|g| (g.appid, ReviewAggregate::default()))
            .collect();

        let mut output = JoinOutput::default();
        let mut orphans: FxHashMap<u64, usize> = FxHashMap::default();

        for review in reviews {
            match aggregates.get_mut(&review.appid) {
                Some(aggregate) => {
                    aggregate.add(&review);
                    output.reviews.push(review);
                }
                None => {
                    *orphans.entry(review.appid).or_default() += 1;
                    output.quarantined.push(review);
                }
            }
        }

        let mut orphan_ids: Vec<_> = orphans.into_iter().collect();
        orphan_ids.sort_unstable();
        for (appid, count) in orphan_ids {
            warn!(appid, count, "Quarantining reviews without a matching game");
            output.issues.push(Issue::new(
                ErrorKind::DataQuality,
                Stage::Join,
                Some(appid),
                format!("{count} reviews reference a game missing from the snapshot"),
            ));
        }

        output.rows = games
            .iter()
            .map(|game| {
                let aggregate = aggregates.remove(&game.appid).unwrap_or_default();
                JoinedGame {
                    game: game.clone(),
                    review_count: aggregate.count,
                    mean_sentiment: aggregate.mean_sentiment(),
                    positive_count: aggregate.positive,
                    helpful_votes: aggregate.helpful_votes,
                }
            })
            .collect();
        output.games = games;

        info!(
            rows = output.rows.len(),
            reviews = output.reviews.len(),
            quarantined = output.quarantined.len(),
            "Join completed"
        );
        output
    }
}

/// Keeps one item per key, preferring the newest vintage, and returns them
/// sorted by key.
fn latest_by_key<T, K, V>(
    items: Vec<T>,
    key: impl Fn(&T) -> K,
    vintage: impl Fn(&T) -> V,
) -> Vec<T>
where
    K: std::hash::Hash + Eq + Ord,
    V: PartialOrd,
{
    let mut latest: FxHashMap<K, T> = FxHashMap::default();
    for item in items {
        match latest.entry(key(&item)) {
            Entry::Occupied(mut slot) => {
                if vintage(&item) >= vintage(slot.get()) {
                    slot.insert(item);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(item);
            }
        }
    }
    let mut kept: Vec<(K, T)> = latest.into_iter().collect();
    kept.sort_by(|a, b| a.0.cmp(&b.0));
    kept.into_iter().map(|(_, item)| item).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Observed, OwnersRange, Sentiment};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn game(appid: u64, fetched: DateTime<Utc>) -> GameRecord {
        GameRecord::new(appid, fetched)
    }

    fn review(id: &str, appid: u64, score: Option<f64>) -> ReviewRecord {
        let mut review = ReviewRecord::new(id.to_string(), appid, at(0));
        review.sentiment = match score {
            Some(score) => Sentiment {
                label: if score >= 0.5 {
                    SentimentLabel::Positive
                } else {
                    SentimentLabel::Negative
                },
                score: Observed::Known(score),
            },
            None => Sentiment::unknown(),
        };
        review
    }

    #[test]
    fn aggregates_reviews_per_game() {
        let mut g = game(10, at(0));
        g.owners = Observed::Known(OwnersRange {
            min: 100_000,
            max: 100_000,
        });
        let reviews = vec![
            review("a", 10, Some(0.8)),
            review("b", 10, Some(0.6)),
            review("c", 10, Some(0.9)),
        ];

        let output = JoiningService::new().join(vec![g], reviews);

        assert_eq!(output.rows.len(), 1);
        let row = &output.rows[0];
        assert_eq!(row.game.owners_estimate(), Some(100_000));
        assert_eq!(row.review_count, 3);
        let mean = row.mean_sentiment.unwrap();
        assert!((mean - 0.766_666_7).abs() < 1e-6, "mean was {mean}");
        assert_eq!(row.positive_count, 3);
    }

    #[test]
    fn orphan_reviews_are_quarantined() {
        let output = JoiningService::new().join(
            vec![game(10, at(0))],
            vec![review("a", 10, Some(1.0)), review("x", 99, Some(0.0))],
        );

        assert_eq!(output.reviews.len(), 1);
        assert_eq!(output.quarantined.len(), 1);
        assert_eq!(output.quarantined[0].appid, 99);
        assert_eq!(output.issues.len(), 1);
        assert_eq!(output.issues[0].kind, ErrorKind::DataQuality);
        assert_eq!(output.issues[0].appid, Some(99));

        let game_ids: Vec<u64> = output.games.iter().map(|g| g.appid).collect();
        assert!(output.reviews.iter().all(|r| game_ids.contains(&r.appid)));
        assert_eq!(output.rows[0].review_count, 1);
    }

    #[test]
    fn most_recent_vintage_wins() {
        let mut old = game(10, at(0));
        old.name = Observed::Known("Old Name".to_string());
        let mut new = game(10, at(30));
        new.name = Observed::Known("New Name".to_string());

        let output = JoiningService::new().join(vec![new, old], Vec::new());

        assert_eq!(output.rows.len(), 1);
        assert_eq!(output.rows[0].game.name, Observed::Known("New Name".to_string()));
    }

    #[test]
    fn duplicate_reviews_count_once() {
        let output = JoiningService::new().join(
            vec![game(10, at(0))],
            vec![review("a", 10, Some(1.0)), review("a", 10, Some(1.0))],
        );
        assert_eq!(output.rows[0].review_count, 1);
    }

    #[test]
    fn games_without_reviews_have_no_mean() {
        let output = JoiningService::new().join(
            vec![game(20, at(0)), game(10, at(0))],
            vec![review("u", 20, None)],
        );

        let ids: Vec<u64> = output.rows.iter().map(|r| r.game.appid).collect();
        assert_eq!(ids, vec![10, 20]);
        assert_eq!(output.rows[0].review_count, 0);
        assert_eq!(output.rows[0].mean_sentiment, None);
        assert_eq!(output.rows[1].review_count, 1);
        assert_eq!(output.rows[1].mean_sentiment, None);
    }
}
