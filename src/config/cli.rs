use chrono::NaiveDate;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    /// Path to collector settings file (optional, defaults apply if missing)
    #[arg(long, default_value = "collector_config.json", env = "STEAMHARVEST_CONFIG")]
    pub config_file: PathBuf,

    /// Directory to store snapshots and state
    #[arg(long, default_value = "steam_data", env = "STEAMHARVEST_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: Level,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the full pipeline and commit one snapshot
    Collect(CollectArgs),
    /// Fetch and normalize metadata for a single game
    Game {
        appid: u64,
    },
    /// Fetch and normalize reviews for a single game
    Reviews {
        appid: u64,
        /// Only keep reviews created on or after this date (YYYY-MM-DD)
        #[arg(long)]
        since: Option<NaiveDate>,
        /// Only keep reviews created on or before this date (YYYY-MM-DD)
        #[arg(long)]
        until: Option<NaiveDate>,
        #[arg(long, default_value = "english")]
        language: String,
    },
    /// Remove snapshots older than the retention window
    Cleanup {
        #[arg(long, default_value_t = 5)]
        years: u32,
    },
    /// Print the report of a committed snapshot
    Show {
        snapshot: String,
    },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct CollectArgs {
    /// Collect the N games with the most concurrent users
    #[arg(long, default_value_t = 100, conflicts_with_all = ["all", "app"])]
    pub top: usize,

    /// Collect the whole SteamSpy catalogue (slow)
    #[arg(long)]
    pub all: bool,

    /// Collect these app ids only
    #[arg(long = "app", num_args = 1..)]
    pub app: Vec<u64>,

    /// Only keep reviews from the last Y years
    #[arg(long, default_value_t = 5)]
    pub years_back: u32,

    /// Start the review window at the previous successful update instead
    #[arg(long)]
    pub since_last_update: bool,

    #[arg(long, default_value = "english")]
    pub language: String,

    /// Explicit snapshot key (YYYYMMDDTHHMMSSZ), e.g. to resume a failed load
    #[arg(long)]
    pub snapshot: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_collect_with_apps() {
        let args = Args::parse_from([
            "steamharvest",
            "--data-dir",
            "/tmp/out",
            "collect",
            "--app",
            "10",
            "570",
            "--years-back",
            "2",
        ]);
        assert_eq!(args.data_dir, PathBuf::from("/tmp/out"));
        match args.command {
            Command::Collect(collect) => {
                assert_eq!(collect.app, vec![10, 570]);
                assert_eq!(collect.years_back, 2);
                assert!(!collect.all);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_review_window() {
        let args = Args::parse_from([
            "steamharvest",
            "reviews",
            "730",
            "--since",
            "2023-01-01",
            "--until",
            "2024-01-31",
        ]);
        match args.command {
            Command::Reviews {
                appid,
                since,
                until,
                language,
            } => {
                assert_eq!(appid, 730);
                assert_eq!(since, NaiveDate::from_ymd_opt(2023, 1, 1));
                assert_eq!(until, NaiveDate::from_ymd_opt(2024, 1, 31));
                assert_eq!(language, "english");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn log_level_must_be_known() {
        let args = Args::parse_from(["steamharvest", "--log-level", "debug", "show", "x"]);
        assert_eq!(args.log_level, Level::DEBUG);

        let err = Args::try_parse_from(["steamharvest", "--log-level", "loud", "show", "x"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
