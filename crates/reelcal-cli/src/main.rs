use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use reelcal_core::{Config, QueryCache, YearMonth, build_fetcher, config_file, group_by_date};

mod output;

use output::ColorMode;

/// Movie release calendar - list a month's theatrical releases from TMDB
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// TMDB API key (overrides TMDB_API_KEY and the config file)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Path to the SQLite cache file
    #[arg(long, global = true)]
    cache_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch and print the releases for a month
    Fetch {
        /// Year (defaults to the current year)
        #[arg(long)]
        year: Option<i32>,

        /// Month, 1-12 (defaults to the current month)
        #[arg(long)]
        month: Option<u32>,

        /// Print JSON instead of a listing
        #[arg(long)]
        json: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Inspect or maintain the release cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum CacheAction {
    /// Delete expired entries
    Prune,
    /// Delete every entry
    Clear,
    /// Show entry counts
    Stats,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    // Resolve configuration: CLI flags > env vars > config file > defaults
    let mut config = config_file::resolve();
    if let Some(key) = cli.api_key {
        config.tmdb_api_key = Some(key);
    }
    if let Some(path) = cli.cache_path {
        config.cache_path = Some(path);
    }
    tracing::debug!(?config, "resolved configuration");

    let mut stdout = std::io::stdout();
    match cli.command {
        Command::Fetch {
            year,
            month,
            json,
            no_color,
        } => {
            let target = target_month(year, month, chrono::Local::now().date_naive())?;
            fetch(&config, target, json, ColorMode(!no_color), &mut stdout).await
        }
        Command::Cache { action } => {
            let path = config
                .cache_path
                .clone()
                .context("no cache location: set --cache-path, REELCAL_CACHE_PATH or CACHE_DIR")?;
            run_cache(action, &path, &mut stdout)
        }
    }
}

/// Validate the requested month, filling gaps from `today`.
fn target_month(
    year: Option<i32>,
    month: Option<u32>,
    today: chrono::NaiveDate,
) -> anyhow::Result<YearMonth> {
    let current = YearMonth::of(today);
    let year = year.unwrap_or(current.year());
    let month = month.unwrap_or(current.month());
    YearMonth::new(year, month).with_context(|| {
        format!(
            "invalid month {year}-{month}: month must be 1-12 and year {}-{}",
            reelcal_core::month::MIN_YEAR,
            reelcal_core::month::MAX_YEAR
        )
    })
}

async fn fetch(
    config: &Config,
    month: YearMonth,
    json: bool,
    color: ColorMode,
    w: &mut dyn Write,
) -> anyhow::Result<()> {
    let fetcher = build_fetcher(config);
    let releases = fetcher
        .fetch_month(month)
        .await
        .with_context(|| format!("failed to load releases for {month}"))?;
    let by_date = group_by_date(&releases);

    if json {
        let body = serde_json::json!({
            "title": month.title(),
            "year": month.year(),
            "month": month.month(),
            "movies": &*releases,
            "by_date": by_date,
        });
        writeln!(w, "{}", serde_json::to_string_pretty(&body)?)?;
        return Ok(());
    }

    if !config.has_api_key() {
        output::print_missing_key(w, color)?;
    }
    output::print_month(w, &month.title(), &by_date, color)?;
    Ok(())
}

fn run_cache(action: CacheAction, path: &Path, w: &mut dyn Write) -> anyhow::Result<()> {
    if !path.exists() {
        writeln!(w, "No cache at {}", path.display())?;
        return Ok(());
    }
    let cache = QueryCache::open(path)
        .with_context(|| format!("failed to open cache at {}", path.display()))?;

    match action {
        CacheAction::Prune => {
            // Opening already dropped whatever had expired by then.
            let removed = cache.pruned_on_open() + cache.prune()?;
            writeln!(w, "Pruned {removed} expired entries")?;
        }
        CacheAction::Clear => {
            cache.clear()?;
            writeln!(w, "Cleared cache at {}", path.display())?;
        }
        CacheAction::Stats => output::print_cache_stats(w, path, cache.disk_len()?)?,
    }
    Ok(())
}
