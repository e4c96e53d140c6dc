use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hf_hub_stats::oracle::{CachedOracle, HubConfigEstimator, SizeOracle};
use hf_hub_stats::query::{RankEngine, TopQuery, TrendQuery};
use hf_hub_stats::report;
use hf_hub_stats::storage::hub::{model_ids, query_hub};
use hf_hub_stats::storage::settings::{get_settings_path, load_settings, save_settings};
use hf_hub_stats::storage::{DownloadHistory, SizeStore, UpdateOptions};
use hf_hub_stats::types::config::StatsConfig;
use hf_hub_stats::types::download::parse_date;
use hf_hub_stats::types::size::SizeRange;

/// Track download and size statistics of Hugging Face Hub models
#[derive(Parser)]
#[command(name = "hf-hub-stats")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Position window over the model list
#[derive(Args)]
struct RangeArgs {
    /// Start with the top-n th model
    #[arg(long, default_value_t = 0)]
    start: usize,
    /// Stop before the top-n th model
    #[arg(long)]
    end: Option<usize>,
}

#[derive(Args)]
struct SizeFilterArgs {
    /// The minimum model size in billions
    #[arg(long, default_value_t = 0.0)]
    min_size: f64,
    /// The maximum model size in billions
    #[arg(long, default_value_t = f64::INFINITY)]
    max_size: f64,
}

#[derive(Subcommand)]
enum Command {
    /// Estimate sizes of hub models missing from the size database
    UpdateSizeDb {
        #[arg(long)]
        size_db: Option<PathBuf>,
        #[command(flatten)]
        range: RangeArgs,
        /// Concurrent estimations per batch
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Record today's download counts
    UpdateDownloadDb {
        #[arg(long)]
        download_db: Option<PathBuf>,
        #[command(flatten)]
        range: RangeArgs,
        /// Keep only the N most recent dates afterwards (settings value when N is omitted)
        #[arg(long, value_name = "N")]
        prune: Option<Option<usize>>,
    },
    /// Query top downloaded models
    QueryTop {
        #[arg(long)]
        download_db: Option<PathBuf>,
        #[arg(long)]
        size_db: Option<PathBuf>,
        /// Date to rank (MM-DD-YY), latest when omitted
        #[arg(long)]
        date: Option<String>,
        /// The maximum number of returned models
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[command(flatten)]
        size: SizeFilterArgs,
        /// Keep models whose size cannot be estimated
        #[arg(long)]
        include_unsupported: bool,
        #[command(flatten)]
        range: RangeArgs,
    },
    /// Show how the current top models ranked over time
    RankTrend {
        #[arg(long)]
        download_db: Option<PathBuf>,
        #[arg(long)]
        size_db: Option<PathBuf>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[command(flatten)]
        size: SizeFilterArgs,
        /// Number of most recent dates, 0 for all
        #[arg(long, default_value_t = 0)]
        max_history: usize,
    },
    /// Show the size spread of the top models over time
    SizeTrend {
        #[arg(long)]
        download_db: Option<PathBuf>,
        #[arg(long)]
        size_db: Option<PathBuf>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[command(flatten)]
        size: SizeFilterArgs,
        #[arg(long, default_value_t = 0)]
        max_history: usize,
    },
    /// Print the size database
    SizeTable {
        #[arg(long)]
        size_db: Option<PathBuf>,
        /// Truncate notes to this many characters
        #[arg(long, default_value_t = 80)]
        max_note_len: usize,
    },
    /// Drop failed estimates so they are retried
    CleanSizeDb {
        #[arg(long)]
        size_db: Option<PathBuf>,
    },
    /// Write settings.json with the given database paths
    InitSettings {
        #[arg(long)]
        size_db: Option<PathBuf>,
        #[arg(long)]
        download_db: Option<PathBuf>,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Path from the command line, else from settings
fn required(
    path: Option<PathBuf>,
    fallback: &Option<PathBuf>,
    flag: &str,
) -> Result<PathBuf, BoxError> {
    match path.or_else(|| fallback.clone()) {
        Some(path) => Ok(path),
        None => Err(format!("{} is required (flag or settings.json)", flag).into()),
    }
}

/// Open the size database if one is configured
fn open_sizes(path: Option<PathBuf>, config: &StatsConfig) -> Result<SizeStore, BoxError> {
    match path.or_else(|| config.size_db.clone()) {
        Some(path) => Ok(SizeStore::open(path)?),
        None => Ok(SizeStore::in_memory()),
    }
}

fn parse_query_date(date: Option<String>) -> Result<Option<chrono::NaiveDate>, BoxError> {
    match date {
        Some(key) => match parse_date(&key) {
            Some(date) => Ok(Some(date)),
            None => Err(format!("Invalid date: {}", key).into()),
        },
        None => Ok(None),
    }
}

async fn run(cli: Cli, config: StatsConfig) -> Result<(), BoxError> {
    match cli.command {
        Command::UpdateSizeDb {
            size_db,
            range,
            batch_size,
        } => {
            let path = required(size_db, &config.size_db, "--size-db")?;
            let mut store = SizeStore::open(path)?;
            let models = query_hub(&config).await?;
            let oracle = Arc::new(HubConfigEstimator::new()?);
            let options = UpdateOptions {
                batch_size: batch_size.unwrap_or(config.batch_size),
                oracle_timeout: config.oracle_timeout(),
            };
            let summary = store
                .update(
                    &model_ids(&models),
                    oracle,
                    range.start,
                    range.end.unwrap_or(usize::MAX),
                    &options,
                )
                .await?;
            tracing::info!(
                "Size database updated: {} estimated ({} failed), {} cached",
                summary.estimated,
                summary.failed,
                summary.cached
            );
        }
        Command::UpdateDownloadDb {
            download_db,
            range,
            prune,
        } => {
            let path = required(download_db, &config.download_db, "--download-db")?;
            let mut history = DownloadHistory::open(path)?;
            let models = query_hub(&config).await?;
            let recorded =
                history.update(&models, range.start, range.end.unwrap_or(usize::MAX))?;
            tracing::info!("Recorded downloads of {} models", recorded);
            if let Some(max_records) = prune {
                let removed = history.prune(max_records.unwrap_or(config.max_records))?;
                tracing::info!("Pruned {} dates", removed.len());
            }
        }
        Command::QueryTop {
            download_db,
            size_db,
            date,
            limit,
            size,
            include_unsupported,
            range,
        } => {
            let history =
                DownloadHistory::open(required(download_db, &config.download_db, "--download-db")?)?;
            let sizes = open_sizes(size_db, &config)?;
            let oracle = CachedOracle::new(HubConfigEstimator::new()?);
            let engine = RankEngine::new(&history, &sizes).with_oracle(&oracle as &dyn SizeOracle);
            let query = TopQuery {
                date: parse_query_date(date)?,
                limit,
                range: SizeRange::new(size.min_size, size.max_size),
                include_unsupported,
                start: range.start,
                end: range.end.unwrap_or(usize::MAX),
            };
            let models = engine.top_models(&query).await?;
            println!("{}", report::top_models_markdown(&models));
        }
        Command::RankTrend {
            download_db,
            size_db,
            limit,
            size,
            max_history,
        } => {
            let history =
                DownloadHistory::open(required(download_db, &config.download_db, "--download-db")?)?;
            let sizes = open_sizes(size_db, &config)?;
            let oracle = CachedOracle::new(HubConfigEstimator::new()?);
            let engine = RankEngine::new(&history, &sizes).with_oracle(&oracle as &dyn SizeOracle);
            let query = TrendQuery {
                limit,
                range: SizeRange::new(size.min_size, size.max_size),
                window: max_history,
            };
            let trend = engine.rank_trend(&query).await?;
            println!("{}", report::rank_trend_markdown(&trend));
        }
        Command::SizeTrend {
            download_db,
            size_db,
            limit,
            size,
            max_history,
        } => {
            let history =
                DownloadHistory::open(required(download_db, &config.download_db, "--download-db")?)?;
            let sizes = open_sizes(size_db, &config)?;
            let oracle = CachedOracle::new(HubConfigEstimator::new()?);
            let engine = RankEngine::new(&history, &sizes).with_oracle(&oracle as &dyn SizeOracle);
            let query = TrendQuery {
                limit,
                range: SizeRange::new(size.min_size, size.max_size),
                window: max_history,
            };
            let trend = engine.size_trend(&query).await?;
            println!("{}", report::size_trend_markdown(&trend));
        }
        Command::SizeTable {
            size_db,
            max_note_len,
        } => {
            let store = SizeStore::open(required(size_db, &config.size_db, "--size-db")?)?;
            println!("{}", report::size_table_markdown(&store, max_note_len));
        }
        Command::CleanSizeDb { size_db } => {
            let mut store = SizeStore::open(required(size_db, &config.size_db, "--size-db")?)?;
            let removed = store.remove_errors();
            store.persist()?;
            tracing::info!("Removed {} failed estimates", removed);
        }
        Command::InitSettings {
            size_db,
            download_db,
        } => {
            let settings = config.with_paths(size_db, download_db);
            save_settings(&settings)?;
            tracing::info!("Settings written to {}", get_settings_path()?.display());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();
    let config = load_settings();

    if let Err(e) = run(cli, config).await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}
