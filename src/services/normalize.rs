use crate::domain::{
    GameRecord, Issue, Observed, OwnersRange, Price, RawPayload, ReviewRecord, SentimentScorer,
    Stage,
};
use crate::error::ErrorKind;
use crate::infrastructure::{numeric, HIDDEN_APPID};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use unicode_normalization::UnicodeNormalization;

/// What a single raw payload turned into.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized<T> {
    Record(T),
    /// Intentionally ignored input, e.g. SteamSpy's hidden placeholder.
    Skipped,
    /// No usable identifier; reported, never silently dropped.
    Rejected(Issue),
}

impl<T> Normalized<T> {
    pub fn into_record(self) -> Option<T> {
        match self {
            Normalized::Record(record) => Some(record),
            _ => None,
        }
    }
}

static OWNERS_RANGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([\d,]+)\s*\.\.\s*([\d,]+)\s*$").unwrap());

/// Parses SteamSpy's `"1,000,000 .. 2,000,000"` owner buckets.
pub fn parse_owners(raw: &str) -> Option<OwnersRange> {
    let caps = OWNERS_RANGE.captures(raw)?;
    let parse = |m: regex::Match<'_>| m.as_str().replace(',', "").parse::<u64>().ok();
    let min = parse(caps.get(1)?)?;
    let max = parse(caps.get(2)?)?;
    (min <= max).then_some(OwnersRange { min, max })
}

/// Store dates come in several shapes depending on region and precision.
pub fn parse_store_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    ["%d %b, %Y", "%b %d, %Y", "%d %B, %Y", "%B %d, %Y", "%Y-%m-%d"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
}

fn text(value: Option<&Value>) -> Observed<String> {
    value
        .and_then(Value::as_str)
        .map(|s| s.nfc().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
        .into()
}

fn count(value: Option<&Value>) -> Observed<u64> {
    value.and_then(numeric).into()
}

fn flag(value: Option<&Value>) -> Observed<bool> {
    value.and_then(Value::as_bool).into()
}

fn timestamp(value: Option<&Value>) -> Observed<DateTime<Utc>> {
    value
        .and_then(|v| v.as_i64().or_else(|| v.as_str()?.trim().parse().ok()))
        .filter(|ts| *ts > 0)
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .into()
}

fn decimal(value: Option<&Value>) -> Observed<f64> {
    value
        .and_then(|v| v.as_f64().or_else(|| v.as_str()?.trim().parse().ok()))
        .filter(|f: &f64| f.is_finite())
        .into()
}

fn list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_str)
        .map(|s| {
            s.split(',')
                .map(|part| part.nfc().collect::<String>().trim().to_string())
                .filter(|part| !part.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Tags arrive as `{name: votes}`, or as `[]` when a game has none.
fn tags(value: Option<&Value>) -> BTreeMap<String, u64> {
    match value {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(name, votes)| {
                (
                    name.nfc().collect::<String>().trim().to_string(),
                    numeric(votes).unwrap_or(0),
                )
            })
            .filter(|(name, _)| !name.is_empty())
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn payload_appid(payload: &RawPayload) -> Option<u64> {
    payload
        .appid
        .or_else(|| payload.body.get("appid").and_then(numeric))
}

/// Maps one SteamSpy payload onto a game record. Pure: the same payload
/// always yields the same output.
pub fn normalize_game(payload: &RawPayload) -> Normalized<GameRecord> {
    let Some(appid) = payload_appid(payload) else {
        return Normalized::Rejected(Issue::new(
            ErrorKind::DataQuality,
            Stage::NormalizeGames,
            None,
            "game payload has no usable appid",
        ));
    };
    if appid == HIDDEN_APPID {
        return Normalized::Skipped;
    }

    let body = &payload.body;
    if !body.is_object() {
        return Normalized::Rejected(Issue::new(
            ErrorKind::DataQuality,
            Stage::NormalizeGames,
            Some(appid),
            "game payload is not a JSON object",
        ));
    }

    let mut game = GameRecord::new(appid, payload.fetched_at);
    game.name = text(body.get("name"));
    game.developer = text(body.get("developer"));
    game.publisher = text(body.get("publisher"));
    game.owners = body
        .get("owners")
        .and_then(Value::as_str)
        .and_then(parse_owners)
        .into();
    game.price = count(body.get("price")).map(|cents| Price { cents });
    game.initial_price = count(body.get("initialprice")).map(|cents| Price { cents });
    game.discount_percent = count(body.get("discount"));
    game.release_date = body
        .get("release_date")
        .and_then(Value::as_str)
        .and_then(parse_store_date)
        .into();
    game.tags = tags(body.get("tags"));
    game.genres = list(body.get("genre"));
    game.languages = list(body.get("languages"));
    game.ccu = count(body.get("ccu"));
    game.playtime.average_forever = count(body.get("average_forever"));
    game.playtime.average_2weeks = count(body.get("average_2weeks"));
    game.playtime.median_forever = count(body.get("median_forever"));
    game.playtime.median_2weeks = count(body.get("median_2weeks"));
    game.positive_reviews = count(body.get("positive"));
    game.negative_reviews = count(body.get("negative"));

    Normalized::Record(game)
}

/// Catalogue pages can hold tens of thousands of entries; normalize them on
/// the rayon pool. Input order is preserved.
pub fn normalize_games(payloads: &[RawPayload]) -> Vec<Normalized<GameRecord>> {
    payloads.par_iter().map(normalize_game).collect()
}

/// Maps one page of raw reviews onto review records, one output per input
/// element. Sentiment is assigned by `scorer` once every field is parsed.
pub fn normalize_reviews(
    payload: &RawPayload,
    scorer: &dyn SentimentScorer,
) -> Vec<Normalized<ReviewRecord>> {
    let Some(reviews) = payload.body.get("reviews").and_then(Value::as_array) else {
        return Vec::new();
    };
    let Some(appid) = payload.appid else {
        return vec![Normalized::Rejected(Issue::new(
            ErrorKind::DataQuality,
            Stage::NormalizeReviews,
            None,
            format!("{} reviews arrived without a game id", reviews.len()),
        ))];
    };

    reviews
        .iter()
        .map(|raw| normalize_review(appid, payload.fetched_at, raw, scorer))
        .collect()
}

fn normalize_review(
    appid: u64,
    fetched_at: DateTime<Utc>,
    raw: &Value,
    scorer: &dyn SentimentScorer,
) -> Normalized<ReviewRecord> {
    let id = raw.get("recommendationid").and_then(|v| match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    let Some(id) = id else {
        return Normalized::Rejected(Issue::new(
            ErrorKind::DataQuality,
            Stage::NormalizeReviews,
            Some(appid),
            "review without recommendationid",
        ));
    };

    let author = raw.get("author");
    let mut review = ReviewRecord::new(id, appid, fetched_at);
    review.author_steamid = text(author.and_then(|a| a.get("steamid")));
    review.text = text(raw.get("review"));
    review.language = text(raw.get("language"));
    review.voted_up = flag(raw.get("voted_up"));
    review.created_at = timestamp(raw.get("timestamp_created"));
    review.updated_at = timestamp(raw.get("timestamp_updated"));
    review.helpfulness.votes_up = count(raw.get("votes_up"));
    review.helpfulness.votes_funny = count(raw.get("votes_funny"));
    review.helpfulness.weighted_vote_score = decimal(raw.get("weighted_vote_score"));
    review.playtime.at_review = count(author.and_then(|a| a.get("playtime_at_review")));
    review.playtime.forever = count(author.and_then(|a| a.get("playtime_forever")));
    review.playtime.last_two_weeks = count(author.and_then(|a| a.get("playtime_last_two_weeks")));
    review.playtime.last_played = timestamp(author.and_then(|a| a.get("last_played")));
    review.steam_purchase = flag(raw.get("steam_purchase"));
    review.received_for_free = flag(raw.get("received_for_free"));
    review.written_during_early_access = flag(raw.get("written_during_early_access"));
    review.sentiment = scorer.score(&review);

    Normalized::Record(review)
}

/// Release date from a store appdetails payload (`{appid: {success, data}}`).
pub fn release_date_from_store(payload: &RawPayload) -> Observed<NaiveDate> {
    let Some(appid) = payload.appid else {
        return Observed::Unknown;
    };
    let entry = payload.body.get(appid.to_string());
    let success = entry
        .and_then(|e| e.get("success"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !success {
        return Observed::Unknown;
    }
    entry
        .and_then(|e| e.pointer("/data/release_date/date"))
        .and_then(Value::as_str)
        .and_then(parse_store_date)
        .into()
}
