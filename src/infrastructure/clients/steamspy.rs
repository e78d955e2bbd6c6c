use super::http::HttpFetcher;
use crate::domain::{RawPayload, Source};
use crate::error::Result;
use serde_json::Value;
use tracing::{debug, info};

/// SteamSpy lists a placeholder entry under this id in catalogue pages.
pub const HIDDEN_APPID: u64 = 999_999;

pub struct SteamSpyClient {
    fetcher: HttpFetcher,
    endpoint: String,
    max_catalogue_pages: usize,
}

impl SteamSpyClient {
    pub fn new(fetcher: HttpFetcher, endpoint: String, max_catalogue_pages: usize) -> Self {
        info!("Created new SteamSpy client");
        Self {
            fetcher,
            endpoint,
            max_catalogue_pages,
        }
    }

    pub async fn fetch_app(&self, appid: u64) -> Result<RawPayload> {
        let body = self
            .fetcher
            .get_json(
                &self.endpoint,
                &[
                    ("request", "appdetails".to_string()),
                    ("appid", appid.to_string()),
                ],
            )
            .await?;
        Ok(RawPayload::new(Source::SteamSpy, Some(appid), body))
    }

    /// Lazily walks `request=all`, one page per call to `next_page`.
    pub fn catalogue(&self) -> CataloguePager<'_> {
        CataloguePager {
            client: self,
            page: 0,
            done: false,
        }
    }

    /// The `n` catalogue entries with the most concurrent users, taken from
    /// the first catalogue page, highest first.
    pub async fn top_by_ccu(&self, n: usize) -> Result<Vec<u64>> {
        let Some(page) = self.catalogue().next_page().await? else {
            return Ok(Vec::new());
        };

        let mut ranked: Vec<(u64, u64)> = split_catalogue_page(&page)
            .into_iter()
            .filter_map(|entry| {
                let appid = entry.appid?;
                let ccu = entry.body.get("ccu").and_then(numeric).unwrap_or(0);
                Some((appid, ccu))
            })
            .filter(|(appid, _)| *appid != HIDDEN_APPID)
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        Ok(ranked.into_iter().take(n).map(|(appid, _)| appid).collect())
    }
}

pub struct CataloguePager<'a> {
    client: &'a SteamSpyClient,
    page: usize,
    done: bool,
}

impl CataloguePager<'_> {
    pub async fn next_page(&mut self) -> Result<Option<RawPayload>> {
        if self.done {
            return Ok(None);
        }
        if self.page >= self.client.max_catalogue_pages {
            info!(pages = self.page, "Catalogue page cap reached");
            self.done = true;
            return Ok(None);
        }

        let body = self
            .client
            .fetcher
            .get_json(
                &self.client.endpoint,
                &[
                    ("request", "all".to_string()),
                    ("page", self.page.to_string()),
                ],
            )
            .await?;

        let empty = body.as_object().map_or(true, |entries| entries.is_empty());
        if empty {
            debug!(page = self.page, "Empty catalogue page, stopping");
            self.done = true;
            return Ok(None);
        }

        self.page += 1;
        Ok(Some(RawPayload::new(Source::SteamSpy, None, body)))
    }
}

/// Breaks one catalogue page (`{appid: details}`) into per-game payloads
/// sharing the page's fetch time. Keys that are not numeric keep `appid`
/// empty so the normalizer can report them.
pub fn split_catalogue_page(page: &RawPayload) -> Vec<RawPayload> {
    let Some(entries) = page.body.as_object() else {
        return Vec::new();
    };

    entries
        .iter()
        .map(|(key, details)| RawPayload {
            source: page.source,
            fetched_at: page.fetched_at,
            appid: key.trim().parse().ok(),
            body: details.clone(),
        })
        .collect()
}

/// SteamSpy mixes JSON numbers and numeric strings for the same field.
pub fn numeric(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
