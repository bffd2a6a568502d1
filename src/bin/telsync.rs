use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;
use time::macros::format_description;
use time::Date;

use telsync::{SyncConfig, SyncDriver};

#[derive(Parser)]
#[command(name = "telsync")]
#[command(about = "Build incremental sync units from an append-only telemetry archive")]
struct Cli {
    /// Root directory for sync output files
    #[arg(long, default_value = ".")]
    sync_root: PathBuf,

    /// Root directory of the archive input tree
    #[arg(long)]
    archive_root: PathBuf,

    /// Content group to process, substring match (repeatable; default all)
    #[arg(long)]
    content: Vec<String>,

    /// Max days of archive entries per batch
    #[arg(long, default_value_t = 1.5)]
    max_days: f64,

    /// Max days to look back from --date-stop when resuming
    #[arg(long, default_value_t = 30.0)]
    max_lookback: f64,

    /// Start date for initial index creation (YYYY-MM-DD or tick)
    #[arg(long)]
    date_start: Option<String>,

    /// Stop date (YYYY-MM-DD or tick, default now)
    #[arg(long)]
    date_stop: Option<String>,

    /// Logging filter (overrides RUST_LOG, e.g. debug)
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder = env_logger::Builder::from_default_env();
    if let Some(level) = &cli.log_level {
        builder.parse_filters(level);
    }
    builder.init();

    let mut config = SyncConfig::new(cli.sync_root, cli.archive_root);
    config.content = cli.content;
    config.max_days = cli.max_days;
    config.max_lookback = cli.max_lookback;
    config.date_start = cli.date_start.as_deref().map(parse_tick).transpose()?;
    config.date_stop = cli.date_stop.as_deref().map(parse_tick).transpose()?;

    let driver = SyncDriver::new(config);
    let stats = driver.run_once()?;
    log::info!(
        "done: {} content group(s) processed, {} failed, {} batch(es) published",
        stats.contents_processed,
        stats.contents_failed,
        stats.batches_published
    );
    if stats.contents_failed > 0 {
        return Err(anyhow!("{} content group(s) failed", stats.contents_failed));
    }
    Ok(())
}

/// Accepts either a raw timeline tick or a calendar date at midnight UTC.
fn parse_tick(value: &str) -> Result<i64> {
    if let Ok(tick) = value.parse::<i64>() {
        return Ok(tick);
    }
    let format = format_description!("[year]-[month]-[day]");
    let date = Date::parse(value, &format)
        .map_err(|err| anyhow!("bad date {value:?} (expected YYYY-MM-DD or tick): {err}"))?;
    Ok(date.midnight().assume_utc().unix_timestamp())
}
