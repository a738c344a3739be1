use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use release_tracker::config::Config;
use release_tracker::feed::{
    build_client, parse_page, sort_by_last_updated, FeedFetcher, FetchOptions, ResponseCache, Status,
};
use release_tracker::refresh::{refresh, RefreshOptions};
use release_tracker::storage::{Database, DatabaseError};
use release_tracker::util::ellipsize;

/// Get the config directory path (~/.config/release-tracker/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("release-tracker"))
}

#[derive(Parser, Debug)]
#[command(
    name = "release-tracker",
    about = "Track changes in the Microsoft release plans feed"
)]
struct Args {
    /// Config file (default: ~/.config/release-tracker/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file (default: ~/.config/release-tracker/tracker.db)
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch the feed and record changes since the last run
    Refresh {
        /// Keep refreshing every `refresh_interval_minutes`
        #[arg(long)]
        watch: bool,
    },
    /// Parse a saved feed payload and summarize it
    Parse {
        file: PathBuf,
        /// Reference date for status derivation (YYYY-MM-DD)
        #[arg(long)]
        today: Option<NaiveDate>,
        /// List every record
        #[arg(long)]
        list: bool,
    },
    /// Show logged changes
    Changes {
        #[arg(long, default_value_t = 30)]
        days: i64,
        #[arg(long, default_value_t = 200)]
        limit: i64,
        /// History of a single release plan id
        #[arg(long)]
        id: Option<String>,
    },
    /// Show recent refresh runs
    Runs {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    match args.command {
        Command::Parse { file, today, list } => {
            parse_file(&file, today.unwrap_or_else(|| Utc::now().date_naive()), list)
        }
        Command::Refresh { watch } => {
            let db = open_db(args.db.as_deref(), &config_dir).await?;
            run_refresh(&config, &db, &config_dir, watch).await
        }
        Command::Changes { days, limit, id } => {
            let db = open_db(args.db.as_deref(), &config_dir).await?;
            show_changes(&db, days, limit, id.as_deref()).await
        }
        Command::Runs { limit } => {
            let db = open_db(args.db.as_deref(), &config_dir).await?;
            show_runs(&db, limit).await
        }
    }
}

async fn open_db(path: Option<&Path>, config_dir: &Path) -> Result<Database> {
    let db_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config_dir.join("tracker.db"));
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;

    match Database::open(db_path_str).await {
        Ok(db) => Ok(db),
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: {}", DatabaseError::InstanceLocked);
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database: {}", e)),
    }
}

async fn run_refresh(config: &Config, db: &Database, config_dir: &Path, watch: bool) -> Result<()> {
    let client = build_client(&config.user_agent).context("Failed to build HTTP client")?;
    let fetcher = FeedFetcher::new(client, FetchOptions::from_config(config));
    let cache = ResponseCache::default();

    let mut options = RefreshOptions::new(config.fallback_path_in(config_dir));
    options.max_value_len = config.value_truncate_len;
    if config.cache_ttl_minutes > 0 {
        options.cache = Some(&cache);
    }

    if !watch {
        let summary = refresh(&fetcher, db, &options).await?;
        print_summary(&summary);
        return Ok(());
    }

    if config.refresh_interval_minutes == 0 {
        anyhow::bail!("--watch needs refresh_interval_minutes > 0 in the config file");
    }
    let mut ticker =
        tokio::time::interval(Duration::from_secs(config.refresh_interval_minutes * 60));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match refresh(&fetcher, db, &options).await {
                    Ok(summary) => print_summary(&summary),
                    // A failed run is already in the run log; keep watching
                    Err(e) => eprintln!("Refresh failed: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping watch");
                return Ok(());
            }
        }
    }
}

fn print_summary(summary: &release_tracker::refresh::RefreshSummary) {
    println!(
        "{} features from {} source: {} new, {} changed, {} unchanged",
        summary.total,
        summary.source,
        summary.new_count(),
        summary.changed_count(),
        summary.report.unchanged_count
    );
    if let Some(reason) = &summary.live_error {
        println!("  live feed unavailable: {reason}");
    }
    if summary.report.conflicts > 0 {
        println!("  {} feature(s) updated by a concurrent run", summary.report.conflicts);
    }
    for failure in &summary.report.failures {
        println!("  failed {}: {}", failure.release_plan_id, failure.message);
    }
}

fn parse_file(path: &Path, today: NaiveDate, list: bool) -> Result<()> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mut page = parse_page(&String::from_utf8_lossy(&bytes));

    println!(
        "{} records ({:?} parse, {} skipped, more records: {})",
        page.records.len(),
        page.tier,
        page.skipped,
        page.more_records
    );
    if let Some(total) = page.declared_total {
        println!("Feed declares {total} records in total");
    }

    let mut by_status: BTreeMap<&str, usize> = Status::ALL.iter().map(|s| (s.label(), 0)).collect();
    for record in &page.records {
        *by_status.entry(record.status(today).label()).or_default() += 1;
    }
    for (label, count) in &by_status {
        println!("  {label:<20} {count}");
    }

    if list {
        sort_by_last_updated(&mut page.records);
        for record in &page.records {
            let days = record
                .days_to_ga(today)
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string());
            let updated = record
                .last_updated_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:<38} {:<10} {:<20} {:<30} {:<60} {:<22} {:>6}",
                record.id,
                updated,
                record.status(today).label(),
                ellipsize(&record.product_name, 30),
                ellipsize(&record.feature_name, 60),
                record.release_wave(),
                days
            );
        }
    }
    Ok(())
}

async fn show_changes(db: &Database, days: i64, limit: i64, id: Option<&str>) -> Result<()> {
    let changes = match id {
        Some(id) => db.changes_for_feature(id).await,
        None => {
            db.recent_changes(Utc::now() - ChronoDuration::days(days), limit)
                .await
        }
    }
    .context("Failed to load changes")?;

    if changes.is_empty() {
        println!("No changes recorded");
        return Ok(());
    }

    for change in &changes {
        let event = &change.event;
        print!(
            "{}  {:<20} {}  {}",
            event.detected_at.format("%Y-%m-%d %H:%M"),
            event.change_type.label(),
            ellipsize(&event.product_name, 30),
            ellipsize(&event.feature_name, 60)
        );
        match event.field_changed {
            Some(field) => println!(
                "\n    {}: {} -> {}",
                field,
                ellipsize(event.old_value.as_deref().unwrap_or(""), 80),
                ellipsize(event.new_value.as_deref().unwrap_or(""), 80)
            ),
            None => println!(),
        }
    }
    Ok(())
}

async fn show_runs(db: &Database, limit: i64) -> Result<()> {
    let runs = db.recent_runs(limit).await.context("Failed to load runs")?;
    if runs.is_empty() {
        println!("No refresh runs recorded");
        return Ok(());
    }
    for run in &runs {
        println!(
            "#{:<5} {}  {:<22} {:<9} total {:>5}  new {:>4}  changed {:>4}{}",
            run.id,
            run.started_at.format("%Y-%m-%d %H:%M"),
            run.status.as_str(),
            run.source.map(|s| s.as_str()).unwrap_or("-"),
            run.total_features,
            run.new_features,
            run.changed_features,
            run.error_message
                .as_deref()
                .map(|e| format!("  ({})", ellipsize(e, 80)))
                .unwrap_or_default()
        );
    }
    Ok(())
}
