use crate::config::CollectorSettings;
use crate::domain::storage::Storage;
use crate::domain::{
    CollectorState, GameRecord, Issue, Observed, RawPayload, ReviewRecord, SentimentScorer,
    SnapshotKey, SnapshotReport, Stage, VoteWeightedScorer,
};
use crate::error::{ErrorKind, HarvestError, Result};
use crate::infrastructure::{
    split_catalogue_page, ReviewQuery, ReviewWindow, SteamClient, SteamSpyClient,
};
use crate::services::joining::JoiningService;
use crate::services::normalize::{
    normalize_game, normalize_games, normalize_reviews, release_date_from_store, Normalized,
};
use chrono::{DateTime, Duration, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Apps(Vec<u64>),
    /// The N games with the most concurrent users.
    Top(usize),
    /// Every game in the SteamSpy catalogue.
    All,
}

#[derive(Debug, Clone)]
pub struct CollectRequest {
    pub selection: Selection,
    pub snapshot: Option<SnapshotKey>,
    /// 0 means no lower bound on review age.
    pub years_back: u32,
    pub since_last_update: bool,
    pub language: String,
}

/// Everything gathered for one game's reviews, returned from a fetch task.
#[derive(Debug, Default)]
struct ReviewHarvest {
    reviews: Vec<ReviewRecord>,
    fetched: usize,
    unknown_fields: usize,
    issues: Vec<Issue>,
}

pub struct CollectionService {
    store: Arc<dyn Storage>,
    steamspy: SteamSpyClient,
    steam: Arc<SteamClient>,
    joining: JoiningService,
    scorer: Arc<dyn SentimentScorer>,
    settings: CollectorSettings,
}

impl CollectionService {
    pub fn new(
        store: Arc<dyn Storage + 'static>,
        steamspy: SteamSpyClient,
        steam: SteamClient,
        settings: CollectorSettings,
    ) -> Self {
        Self {
            store,
            steamspy,
            steam: Arc::new(steam),
            joining: JoiningService::new(),
            scorer: Arc::new(VoteWeightedScorer),
            settings,
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn SentimentScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Runs fetch, normalize, join and load for one snapshot.
    ///
    /// The snapshot is opened before anything is fetched, so a second run on
    /// the same key fails fast, and any early return releases it again
    /// without leaving partial data behind. Per-game failures end up in the
    /// report instead of aborting the run.
    pub async fn collect(&self, request: CollectRequest) -> Result<SnapshotReport> {
        let started_at = Utc::now();
        let key = request
            .snapshot
            .clone()
            .unwrap_or_else(|| SnapshotKey::at(started_at));

        if self.store.is_committed(&key) {
            info!(snapshot = %key, "Snapshot already committed, nothing to do");
            return self.store.load_report(&key)?.ok_or_else(|| {
                HarvestError::Permanent(format!("snapshot {key} is committed without a report"))
            });
        }

        let previous = self.store.load_state()?;
        match &previous {
            Some(state) => info!(
                last_update = %state.last_update.to_rfc3339(),
                last_snapshot = %state.last_snapshot,
                "Previous update found"
            ),
            None => info!("No previous update recorded"),
        }

        let mut sink = self.store.open_snapshot(&key)?;
        let mut report = SnapshotReport::new(key.clone(), started_at);
        info!(snapshot = %sink.key(), "Starting collection");

        let payloads = self.fetch_games(&request.selection, &mut report).await?;
        report.counts.games_fetched = payloads.len();

        let mut games = self.normalize_games(&payloads, &mut report);
        info!(games = games.len(), "Game normalization completed");

        if self.settings.fill_release_dates && request.selection != Selection::All {
            self.fill_release_dates(&mut games, &mut report).await;
        }

        let window = review_window(&request, previous.as_ref(), started_at);
        let reviews = self
            .collect_reviews(&games, &request.language, window, &mut report)
            .await;
        info!(reviews = reviews.len(), "Review collection completed");

        let joined = self.joining.join(games, reviews);
        report.counts.reviews_joined = joined.reviews.len();
        report.counts.reviews_quarantined = joined.quarantined.len();
        report.counts.rows_written = joined.rows.len();
        report.issues.extend(joined.issues);
        report.finished_at = Utc::now();

        sink.write_games(&joined.games)?;
        sink.write_reviews(&joined.reviews)?;
        sink.write_joined(&joined.rows)?;
        sink.write_quarantined(&joined.quarantined)?;
        sink.write_report(&report)?;
        sink.commit()?;

        self.store.save_state(&CollectorState {
            last_update: started_at,
            last_snapshot: key,
        })?;

        info!(
            rows = report.counts.rows_written,
            transient = report.issues_of(ErrorKind::Transient).count(),
            permanent = report.issues_of(ErrorKind::Permanent).count(),
            data_quality = report.issues_of(ErrorKind::DataQuality).count(),
            "Collection completed"
        );
        Ok(report)
    }

    /// Fetches and normalizes one game, outside of any snapshot.
    pub async fn fetch_game(&self, appid: u64) -> Result<GameRecord> {
        let payload = self.steamspy.fetch_app(appid).await?;
        let mut game = match normalize_game(&payload) {
            Normalized::Record(game) => game,
            Normalized::Skipped => {
                return Err(HarvestError::DataQuality(format!(
                    "app {appid} is a hidden SteamSpy entry"
                )))
            }
            Normalized::Rejected(issue) => return Err(HarvestError::DataQuality(issue.message)),
        };

        if self.settings.fill_release_dates && game.release_date.is_unknown() {
            let payload = self.steam.fetch_store_details(appid).await?;
            game.release_date = release_date_from_store(&payload);
        }
        Ok(game)
    }

    /// Fetches and normalizes the reviews of one game, outside of any
    /// snapshot.
    pub async fn fetch_reviews(
        &self,
        appid: u64,
        window: ReviewWindow,
        language: &str,
    ) -> Result<Vec<ReviewRecord>> {
        let query = self.review_query(language, window);
        let harvest = harvest_reviews(&self.steam, self.scorer.as_ref(), appid, &query).await;

        for issue in &harvest.issues {
            warn!(appid, kind = ?issue.kind, "{}", issue.message);
        }
        if harvest.reviews.is_empty() {
            if let Some(issue) = harvest
                .issues
                .iter()
                .find(|issue| issue.stage == Stage::FetchReviews)
            {
                return Err(match issue.kind {
                    ErrorKind::Transient => HarvestError::Transient(issue.message.clone()),
                    _ => HarvestError::Permanent(issue.message.clone()),
                });
            }
        }
        Ok(harvest.reviews)
    }

    async fn fetch_games(
        &self,
        selection: &Selection,
        report: &mut SnapshotReport,
    ) -> Result<Vec<RawPayload>> {
        let appids = match selection {
            Selection::Apps(appids) => appids.clone(),
            Selection::Top(n) => {
                info!(n, "Selecting top games by concurrent users");
                self.steamspy.top_by_ccu(*n).await?
            }
            Selection::All => return self.fetch_catalogue(report).await,
        };
        report.counts.games_requested = appids.len();

        let mut payloads = Vec::with_capacity(appids.len());
        for (i, appid) in appids.iter().enumerate() {
            info!(appid, "Fetching game data ({}/{})", i + 1, appids.len());
            match self.steamspy.fetch_app(*appid).await {
                Ok(payload) => payloads.push(payload),
                Err(e) => {
                    error!(appid, error = %e, "Failed to fetch game data");
                    report
                        .issues
                        .push(Issue::from_error(Stage::FetchGames, Some(*appid), &e));
                }
            }
        }
        Ok(payloads)
    }

    async fn fetch_catalogue(&self, report: &mut SnapshotReport) -> Result<Vec<RawPayload>> {
        info!("Fetching the whole catalogue, this takes a while");
        let mut pager = self.steamspy.catalogue();
        let mut payloads = Vec::new();
        let mut pages = 0;

        loop {
            match pager.next_page().await {
                Ok(Some(page)) => {
                    pages += 1;
                    payloads.extend(split_catalogue_page(&page));
                    info!(pages, games = payloads.len(), "Fetched catalogue page");
                }
                Ok(None) => break,
                Err(e) if pages == 0 => return Err(e),
                Err(e) => {
                    error!(pages, error = %e, "Catalogue fetch stopped early");
                    report
                        .issues
                        .push(Issue::from_error(Stage::FetchGames, None, &e));
                    break;
                }
            }
        }

        report.counts.games_requested = payloads.len();
        Ok(payloads)
    }

    fn normalize_games(
        &self,
        payloads: &[RawPayload],
        report: &mut SnapshotReport,
    ) -> Vec<GameRecord> {
        let mut games = Vec::with_capacity(payloads.len());
        for outcome in normalize_games(payloads) {
            match outcome {
                Normalized::Record(game) => {
                    report.counts.unknown_fields += game.unknown_fields().len();
                    games.push(game);
                }
                Normalized::Rejected(issue) => {
                    warn!(appid = ?issue.appid, "{}", issue.message);
                    report.issues.push(issue);
                }
                Normalized::Skipped => {}
            }
        }
        report.counts.games_normalized = games.len();
        games
    }

    async fn fill_release_dates(&self, games: &mut [GameRecord], report: &mut SnapshotReport) {
        for game in games.iter_mut().filter(|g| g.release_date.is_unknown()) {
            match self.steam.fetch_store_details(game.appid).await {
                Ok(payload) => {
                    game.release_date = release_date_from_store(&payload);
                    if game.release_date.is_known() {
                        report.counts.unknown_fields = report.counts.unknown_fields.saturating_sub(1);
                    }
                }
                Err(e) => {
                    warn!(appid = game.appid, error = %e, "Could not look up release date");
                    report
                        .issues
                        .push(Issue::from_error(Stage::ReleaseDates, Some(game.appid), &e));
                }
            }
        }
    }

    async fn collect_reviews(
        &self,
        games: &[GameRecord],
        language: &str,
        window: ReviewWindow,
        report: &mut SnapshotReport,
    ) -> Vec<ReviewRecord> {
        info!(games = games.len(), "Starting review updates");
        let query = self.review_query(language, window);
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency));

        let progress = ProgressBar::new(games.len() as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let mut tasks = JoinSet::new();
        let mut task_apps = FxHashMap::default();
        for game in games {
            let steam = Arc::clone(&self.steam);
            let scorer = Arc::clone(&self.scorer);
            let semaphore = Arc::clone(&semaphore);
            let query = query.clone();
            let appid = game.appid;
            let name = game.display_name();

            let handle = tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (name, ReviewHarvest::default());
                };
                info!(appid, name = %name, "Updating reviews");
                (name, harvest_reviews(&steam, scorer.as_ref(), appid, &query).await)
            });
            task_apps.insert(handle.id(), appid);
        }

        let mut reviews = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, harvest)) => {
                    progress.set_message(name);
                    report.counts.reviews_fetched += harvest.fetched;
                    report.counts.reviews_normalized += harvest.reviews.len();
                    report.counts.unknown_fields += harvest.unknown_fields;
                    report.issues.extend(harvest.issues);
                    reviews.extend(harvest.reviews);
                }
                Err(e) => {
                    let appid = task_apps.get(&e.id()).copied();
                    error!(appid = ?appid, error = %e, "Review task failed");
                    report.issues.push(Issue::new(
                        ErrorKind::Permanent,
                        Stage::FetchReviews,
                        appid,
                        format!("review task failed: {e}"),
                    ));
                }
            }
            progress.inc(1);
        }
        progress.finish_with_message("Done collecting reviews");

        // Task completion order is arbitrary.
        report
            .issues
            .sort_by(|a, b| (a.stage as u8, a.appid).cmp(&(b.stage as u8, b.appid)));
        reviews
    }

    fn review_query(&self, language: &str, window: ReviewWindow) -> ReviewQuery {
        ReviewQuery {
            language: language.to_string(),
            window,
            max_pages: self.settings.max_review_pages,
            per_page: self.settings.reviews_per_page,
        }
    }
}

async fn harvest_reviews(
    steam: &SteamClient,
    scorer: &dyn SentimentScorer,
    appid: u64,
    query: &ReviewQuery,
) -> ReviewHarvest {
    let mut harvest = ReviewHarvest::default();
    let mut pager = steam.reviews(appid, query);

    loop {
        match pager.next_page().await {
            Ok(Some(page)) => {
                harvest.fetched += page
                    .body
                    .get("reviews")
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                for outcome in normalize_reviews(&page, scorer) {
                    match outcome {
                        Normalized::Record(review) => {
                            harvest.unknown_fields += review.unknown_fields().len();
                            harvest.reviews.push(review);
                        }
                        Normalized::Rejected(issue) => harvest.issues.push(issue),
                        Normalized::Skipped => {}
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!(appid, pages = pager.pages_fetched(), error = %e, "Error updating reviews");
                harvest
                    .issues
                    .push(Issue::from_error(Stage::FetchReviews, Some(appid), &e));
                break;
            }
        }
    }

    info!(
        appid,
        reviews = harvest.reviews.len(),
        pages = pager.pages_fetched(),
        "Collected reviews"
    );
    harvest
}

/// Reviews are kept from the window start up to the snapshot time. The start
/// is the previous update when asked for and known, otherwise `years_back`
/// years ago; `years_back == 0` lifts the bound.
fn review_window(
    request: &CollectRequest,
    previous: Option<&CollectorState>,
    now: DateTime<Utc>,
) -> ReviewWindow {
    let since_last = previous
        .filter(|_| request.since_last_update)
        .map(|state| state.last_update);
    let start = since_last.or_else(|| {
        (request.years_back > 0)
            .then(|| now - Duration::days(365 * i64::from(request.years_back)))
    });

    ReviewWindow {
        start,
        end: Some(now),
    }
}

/// Sentinel-aware helper for callers that print games.
pub fn describe(game: &GameRecord) -> String {
    let owners = match game.owners_estimate() {
        Some(owners) => owners.to_string(),
        None => "unknown".to_string(),
    };
    let revenue = match game.revenue_estimate() {
        Some(revenue) => format!("${revenue:.0}"),
        None => "unknown".to_string(),
    };
    let release = match &game.release_date {
        Observed::Known(date) => date.to_string(),
        Observed::Unknown => "unknown".to_string(),
    };
    format!(
        "{} ({}): owners ~{}, revenue ~{}, released {}",
        game.display_name(),
        game.appid,
        owners,
        revenue,
        release
    )
}
