use crate::config::cli::{Args, CollectArgs, Command};
use crate::config::Config;
use crate::domain::storage::Storage;
use crate::domain::SnapshotKey;
use crate::error::{HarvestError, Result};
use crate::infrastructure::{
    FileSystemStore, HttpFetcher, ReviewWindow, SteamClient, SteamSpyClient,
};
use crate::services::collection::{describe, CollectRequest, CollectionService, Selection};
use crate::services::retention::RetentionService;
use chrono::{NaiveDate, NaiveTime, Utc};
use clap::Parser;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

mod config;
mod domain;
mod error;
mod infrastructure;
mod services;
#[cfg(test)]
mod test_support;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_args(args)?;
    config.ensure_directories()?;

    let store: Arc<dyn Storage> = Arc::new(
        FileSystemStore::new(&config.args.data_dir)
            .with_stale_lock_after(Duration::from_secs(config.settings.stale_lock_secs)),
    );
    let fetcher = HttpFetcher::from_settings(config.http_client.clone(), &config.settings);
    let steamspy = SteamSpyClient::new(
        fetcher.clone(),
        config.settings.endpoints.steamspy.clone(),
        config.settings.max_catalogue_pages,
    );
    let steam = SteamClient::new(fetcher, config.settings.endpoints.steam_store.clone());
    let service = CollectionService::new(
        Arc::clone(&store),
        steamspy,
        steam,
        config.settings.clone(),
    );

    match &config.args.command {
        Command::Collect(collect) => {
            let request = collect_request(collect)?;
            // Dropping the pipeline on Ctrl-C discards staging and frees the lock.
            let report = tokio::select! {
                result = service.collect(request) => result?,
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted, uncommitted snapshot discarded");
                    return Err(HarvestError::Transient("collection interrupted".into()));
                }
            };
            info!(snapshot = %report.snapshot, "Snapshot committed");
            print_json(&report)?;
        }
        Command::Game { appid } => {
            let game = service.fetch_game(*appid).await?;
            info!("{}", describe(&game));
            print_json(&game)?;
        }
        Command::Reviews {
            appid,
            since,
            until,
            language,
        } => {
            let window = ReviewWindow {
                start: since.map(start_of_day),
                end: until.map(end_of_day),
            };
            let reviews = service.fetch_reviews(*appid, window, language).await?;
            info!(appid, reviews = reviews.len(), "Fetched reviews");
            print_json(&reviews)?;
        }
        Command::Cleanup { years } => {
            let removed = RetentionService::new(store).cleanup(Utc::now(), *years)?;
            print_json(&removed)?;
        }
        Command::Show { snapshot } => {
            let key = SnapshotKey::parse(snapshot)?;
            let report = store
                .load_report(&key)?
                .ok_or_else(|| HarvestError::Permanent(format!("no committed snapshot {key}")))?;
            print_json(&report)?;
        }
    }

    Ok(())
}

fn collect_request(args: &CollectArgs) -> Result<CollectRequest> {
    let selection = if args.all {
        Selection::All
    } else if !args.app.is_empty() {
        Selection::Apps(args.app.clone())
    } else {
        Selection::Top(args.top)
    };
    let snapshot = args.snapshot.as_deref().map(SnapshotKey::parse).transpose()?;

    Ok(CollectRequest {
        selection,
        snapshot,
        years_back: args.years_back,
        since_last_update: args.since_last_update,
        language: args.language.clone(),
    })
}

fn start_of_day(date: NaiveDate) -> chrono::DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn end_of_day(date: NaiveDate) -> chrono::DateTime<Utc> {
    start_of_day(date) + chrono::Duration::seconds(86_399)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
