use crate::config::cli::Args;
use crate::error::{HarvestError, Result};
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub(crate) mod cli;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub steamspy: String,
    pub steam_store: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            steamspy: "https://steamspy.com/api.php".to_string(),
            steam_store: "https://store.steampowered.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorSettings {
    pub endpoints: Endpoints,
    pub retry: RetrySettings,
    /// Minimum gap between two request starts, shared by every client.
    pub min_request_interval_ms: u64,
    pub request_timeout_secs: u64,
    /// Number of games whose reviews are fetched at the same time.
    pub concurrency: usize,
    pub max_review_pages: usize,
    pub reviews_per_page: u32,
    pub max_catalogue_pages: usize,
    /// Look up missing release dates on the Steam store.
    pub fill_release_dates: bool,
    /// Snapshot locks older than this are treated as abandoned.
    pub stale_lock_secs: u64,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            retry: RetrySettings::default(),
            min_request_interval_ms: 1000,
            request_timeout_secs: 30,
            concurrency: 4,
            max_review_pages: 20,
            reviews_per_page: 100,
            max_catalogue_pages: 100,
            fill_release_dates: true,
            stale_lock_secs: 6 * 60 * 60,
        }
    }
}

impl CollectorSettings {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }
        let settings: Self = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(HarvestError::Config("concurrency must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(HarvestError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.reviews_per_page == 0 || self.reviews_per_page > 100 {
            return Err(HarvestError::Config(
                "reviews_per_page must be between 1 and 100".into(),
            ));
        }
        Ok(())
    }
}

pub struct Config {
    pub args: Args,
    pub settings: CollectorSettings,
    pub http_client: Client,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self> {
        let settings = CollectorSettings::load(&args.config_file)?;

        let http_client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .user_agent(concat!("steamharvest/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            args,
            settings,
            http_client,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        if !self.args.data_dir.exists() {
            std::fs::create_dir_all(&self.args.data_dir)?;
        }

        info!("Data dir exists");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = CollectorSettings::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.max_review_pages, 20);
        assert_eq!(settings.endpoints.steamspy, "https://steamspy.com/api.php");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"concurrency": 8, "retry": {{"max_attempts": 2}}}}"#).unwrap();

        let settings = CollectorSettings::load(file.path()).unwrap();
        assert_eq!(settings.concurrency, 8);
        assert_eq!(settings.retry.max_attempts, 2);
        assert_eq!(settings.retry.base_delay_ms, 500);
        assert_eq!(settings.reviews_per_page, 100);
    }

    #[test]
    fn rejects_zero_concurrency() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"concurrency": 0}}"#).unwrap();

        let err = CollectorSettings::load(file.path()).unwrap_err();
        assert!(matches!(err, HarvestError::Config(_)));
    }
}
