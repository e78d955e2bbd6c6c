use super::Observed;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// SteamSpy owner estimates come as a bucket, e.g. `1,000,000 .. 2,000,000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnersRange {
    pub min: u64,
    pub max: u64,
}

impl OwnersRange {
    pub fn midpoint(&self) -> u64 {
        self.min + (self.max - self.min) / 2
    }
}

/// Price in US cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Price {
    pub cents: u64,
}

impl Price {
    pub fn dollars(&self) -> f64 {
        self.cents as f64 / 100.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Playtime {
    pub average_forever: Observed<u64>,
    pub average_2weeks: Observed<u64>,
    pub median_forever: Observed<u64>,
    pub median_2weeks: Observed<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    pub appid: u64,
    pub name: Observed<String>,
    pub developer: Observed<String>,
    pub publisher: Observed<String>,
    pub owners: Observed<OwnersRange>,
    pub price: Observed<Price>,
    pub initial_price: Observed<Price>,
    pub discount_percent: Observed<u64>,
    pub release_date: Observed<NaiveDate>,
    /// Tag name to number of user votes for it.
    pub tags: BTreeMap<String, u64>,
    pub genres: Vec<String>,
    pub languages: Vec<String>,
    pub ccu: Observed<u64>,
    pub playtime: Playtime,
    pub positive_reviews: Observed<u64>,
    pub negative_reviews: Observed<u64>,
    pub fetched_at: DateTime<Utc>,
}

impl GameRecord {
    pub fn new(appid: u64, fetched_at: DateTime<Utc>) -> Self {
        Self {
            appid,
            name: Observed::Unknown,
            developer: Observed::Unknown,
            publisher: Observed::Unknown,
            owners: Observed::Unknown,
            price: Observed::Unknown,
            initial_price: Observed::Unknown,
            discount_percent: Observed::Unknown,
            release_date: Observed::Unknown,
            tags: BTreeMap::new(),
            genres: Vec::new(),
            languages: Vec::new(),
            ccu: Observed::Unknown,
            playtime: Playtime::default(),
            positive_reviews: Observed::Unknown,
            negative_reviews: Observed::Unknown,
            fetched_at,
        }
    }

    pub fn display_name(&self) -> String {
        match &self.name {
            Observed::Known(name) => name.clone(),
            Observed::Unknown => format!("App{}", self.appid),
        }
    }

    pub fn owners_estimate(&self) -> Option<u64> {
        self.owners.known().map(OwnersRange::midpoint)
    }

    /// Owners midpoint times current price, in dollars.
    pub fn revenue_estimate(&self) -> Option<f64> {
        let owners = self.owners_estimate()?;
        let price = self.price.known()?;
        Some(owners as f64 * price.dollars())
    }

    /// Returns the names of fields that ended up `Unknown`.
    pub fn unknown_fields(&self) -> Vec<&'static str> {
        let checks = [
            ("name", self.name.is_unknown()),
            ("developer", self.developer.is_unknown()),
            ("publisher", self.publisher.is_unknown()),
            ("owners", self.owners.is_unknown()),
            ("price", self.price.is_unknown()),
            ("initial_price", self.initial_price.is_unknown()),
            ("discount_percent", self.discount_percent.is_unknown()),
            ("release_date", self.release_date.is_unknown()),
            ("ccu", self.ccu.is_unknown()),
            ("positive_reviews", self.positive_reviews.is_unknown()),
            ("negative_reviews", self.negative_reviews.is_unknown()),
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

    #[test]
    fn revenue_uses_owner_midpoint() {
        let mut game = GameRecord::new(10, Utc::now());
        game.owners = Observed::Known(OwnersRange {
            min: 10_000_000,
            max: 20_000_000,
        });
        game.price = Observed::Known(Price { cents: 999 });

        assert_eq!(game.owners_estimate(), Some(15_000_000));
        let revenue = game.revenue_estimate().unwrap();
        assert!((revenue - 149_850_000.0).abs() < 1e-6);
    }

    #[test]
    fn revenue_is_none_without_price() {
        let mut game = GameRecord::new(10, Utc::now());
        game.owners = Observed::Known(OwnersRange { min: 0, max: 20_000 });
        assert_eq!(game.revenue_estimate(), None);
        assert_eq!(game.display_name(), "App10");
    }
}
