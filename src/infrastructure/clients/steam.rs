use super::http::HttpFetcher;
use crate::domain::{RawPayload, Source};
use crate::error::{HarvestError, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{debug, info};

const FIRST_CURSOR: &str = "*";

/// Inclusive bounds on `timestamp_created`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReviewWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ReviewQuery {
    pub language: String,
    pub window: ReviewWindow,
    pub max_pages: usize,
    pub per_page: u32,
}

pub struct SteamClient {
    fetcher: HttpFetcher,
    store_base: String,
}

impl SteamClient {
    pub fn new(fetcher: HttpFetcher, store_base: String) -> Self {
        info!("Created new Steam client");
        Self {
            fetcher,
            store_base: store_base.trim_end_matches('/').to_string(),
        }
    }

    /// Lazily pages through the reviews of one game, newest first.
    pub fn reviews(&self, appid: u64, query: &ReviewQuery) -> ReviewPager<'_> {
        ReviewPager {
            client: self,
            appid,
            url: format!("{}/appreviews/{}", self.store_base, appid),
            language: query.language.clone(),
            per_page: query.per_page,
            cursor: ReviewCursor::new(query.window, query.max_pages),
        }
    }

    pub async fn fetch_store_details(&self, appid: u64) -> Result<RawPayload> {
        let url = format!("{}/api/appdetails", self.store_base);
        let body = self
            .fetcher
            .get_json(&url, &[("appids", appid.to_string())])
            .await?;
        Ok(RawPayload::new(Source::SteamStore, Some(appid), body))
    }
}

pub struct ReviewPager<'a> {
    client: &'a SteamClient,
    appid: u64,
    url: String,
    language: String,
    per_page: u32,
    cursor: ReviewCursor,
}

impl ReviewPager<'_> {
    pub fn pages_fetched(&self) -> usize {
        self.cursor.pages
    }

    /// Next batch of raw reviews inside the window, or `None` once the
    /// stream is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<RawPayload>> {
        let Some(cursor) = self.cursor.current() else {
            return Ok(None);
        };

        let body = self
            .client
            .fetcher
            .get_json(
                &self.url,
                &[
                    ("json", "1".to_string()),
                    ("language", self.language.clone()),
                    ("cursor", cursor.to_string()),
                    ("num_per_page", self.per_page.to_string()),
                    ("filter", "recent".to_string()),
                ],
            )
            .await?;

        let kept = self.cursor.advance(&body)?;
        debug!(
            appid = self.appid,
            page = self.cursor.pages,
            kept = kept.len(),
            "Fetched review page"
        );

        if kept.is_empty() && self.cursor.is_finished() {
            return Ok(None);
        }
        Ok(Some(RawPayload::new(
            Source::SteamReviews,
            Some(self.appid),
            json!({ "reviews": kept }),
        )))
    }
}

/// Pagination and time-window state for the reviews endpoint, kept apart
/// from I/O. Reviews arrive newest first, so the first review older than the
/// window start ends the stream.
#[derive(Debug)]
pub struct ReviewCursor {
    cursor: String,
    seen: HashSet<String>,
    window: ReviewWindow,
    pages: usize,
    max_pages: usize,
    finished: bool,
}

impl ReviewCursor {
    pub fn new(window: ReviewWindow, max_pages: usize) -> Self {
        Self {
            cursor: FIRST_CURSOR.to_string(),
            seen: HashSet::from([FIRST_CURSOR.to_string()]),
            window,
            pages: 0,
            max_pages,
            finished: max_pages == 0,
        }
    }

    pub fn current(&self) -> Option<&str> {
        if self.finished {
            None
        } else {
            Some(&self.cursor)
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn advance(&mut self, page: &Value) -> Result<Vec<Value>> {
        self.pages += 1;

        if page.get("success").and_then(Value::as_i64) != Some(1) {
            self.finished = true;
            return Err(HarvestError::Permanent(
                "reviews API reported an unsuccessful query".to_string(),
            ));
        }

        let num_reviews = page
            .pointer("/query_summary/num_reviews")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let reviews = match page.get("reviews").and_then(Value::as_array) {
            Some(reviews) if num_reviews > 0 && !reviews.is_empty() => reviews,
            _ => {
                self.finished = true;
                return Ok(Vec::new());
            }
        };

        let start = self.window.start.map(|t| t.timestamp());
        let end = self.window.end.map(|t| t.timestamp());
        let mut kept = Vec::with_capacity(reviews.len());

        for review in reviews {
            let created = review.get("timestamp_created").and_then(Value::as_i64);
            if let (Some(end), Some(created)) = (end, created) {
                if created > end {
                    continue;
                }
            }
            if let (Some(start), Some(created)) = (start, created) {
                if created < start {
                    debug!("Reached reviews older than the window start");
                    self.finished = true;
                    break;
                }
            }
            kept.push(review.clone());
        }

        if !self.finished {
            let next = page.get("cursor").and_then(Value::as_str).unwrap_or("");
            if next.is_empty() || !self.seen.insert(next.to_string()) {
                self.finished = true;
            } else {
                self.cursor = next.to_string();
            }
        }
        if self.pages >= self.max_pages {
            self.finished = true;
        }

        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clients::http::{RateLimiter, RetryPolicy};
    use crate::test_support::FakeApi;
    use chrono::TimeZone;
    use reqwest::Client;
    use std::sync::Arc;
    use std::time::Duration;

    fn page(cursor: &str, created: &[i64]) -> Value {
        json!({
            "success": 1,
            "query_summary": {"num_reviews": created.len()},
            "cursor": cursor,
            "reviews": created
                .iter()
                .map(|ts| json!({"recommendationid": ts.to_string(), "timestamp_created": ts}))
                .collect::<Vec<_>>()
        })
    }

    #[test]
    fn follows_cursor_until_it_repeats() {
        let mut cursor = ReviewCursor::new(ReviewWindow::default(), 20);
        assert_eq!(cursor.current(), Some("*"));

        assert_eq!(cursor.advance(&page("AoJ1", &[300, 200])).unwrap().len(), 2);
        assert_eq!(cursor.current(), Some("AoJ1"));

        assert_eq!(cursor.advance(&page("AoJ1", &[100])).unwrap().len(), 1);
        assert!(cursor.is_finished());
    }

    #[test]
    fn stops_at_page_cap() {
        let mut cursor = ReviewCursor::new(ReviewWindow::default(), 2);
        cursor.advance(&page("a", &[3])).unwrap();
        cursor.advance(&page("b", &[2])).unwrap();
        assert!(cursor.current().is_none());
    }

    #[test]
    fn empty_page_ends_stream() {
        let mut cursor = ReviewCursor::new(ReviewWindow::default(), 20);
        assert!(cursor.advance(&page("a", &[])).unwrap().is_empty());
        assert!(cursor.is_finished());
    }

    #[test]
    fn failed_query_is_permanent() {
        let mut cursor = ReviewCursor::new(ReviewWindow::default(), 20);
        let err = cursor.advance(&json!({"success": 2})).unwrap_err();
        assert!(matches!(err, HarvestError::Permanent(_)));
        assert!(cursor.is_finished());
    }

    #[test]
    fn window_skips_newer_and_stops_at_older() {
        let window = ReviewWindow {
            start: Some(Utc.timestamp_opt(100, 0).unwrap()),
            end: Some(Utc.timestamp_opt(250, 0).unwrap()),
        };
        let mut cursor = ReviewCursor::new(window, 20);

        let kept = cursor.advance(&page("a", &[400, 250, 180, 99, 50])).unwrap();
        let kept: Vec<i64> = kept
            .iter()
            .map(|r| r["timestamp_created"].as_i64().unwrap())
            .collect();

        assert_eq!(kept, vec![250, 180]);
        assert!(cursor.is_finished());
    }

    #[tokio::test]
    async fn pager_walks_pages_with_cursor() {
        let api = FakeApi::start().await;
        api.respond_json("/appreviews/10", page("next==", &[30, 20]));
        api.respond_json("/appreviews/10", page("*", &[]));

        let fetcher = HttpFetcher::new(
            Client::new(),
            Arc::new(RateLimiter::new(Duration::ZERO)),
            RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
        );
        let steam = SteamClient::new(fetcher, api.base().to_string());
        let query = ReviewQuery {
            language: "english".to_string(),
            window: ReviewWindow::default(),
            max_pages: 20,
            per_page: 100,
        };

        let mut pager = steam.reviews(10, &query);
        let first = pager.next_page().await.unwrap().unwrap();
        assert_eq!(first.appid, Some(10));
        assert_eq!(first.body["reviews"].as_array().unwrap().len(), 2);
        assert!(pager.next_page().await.unwrap().is_none());
        assert!(pager.next_page().await.unwrap().is_none());

        let requests = api.requests("/appreviews/10");
        assert_eq!(requests.len(), 2);
        assert!(requests[0].contains("cursor=*") || requests[0].contains("cursor=%2A"));
        assert!(requests[1].contains("cursor=next%3D%3D"));
        assert!(requests[0].contains("filter=recent"));
    }
}
