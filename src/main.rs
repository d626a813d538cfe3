use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

use catalog_sync::catalog::memory::MemoryCatalog;
use catalog_sync::config::SyncConfig;
use catalog_sync::models::LibraryExport;
use catalog_sync::progress::{create_spinner, set_log_only};
use catalog_sync::store::{ledger::FailureLedger, reports::ReportStore, Database};
use catalog_sync::{transfer_library, SyncContext};

#[derive(Parser, Debug)]
#[command(name = "catalog-sync")]
#[command(about = "Reconcile source playlists and favorites into a target music catalog")]
struct Cli {
    /// Path to the config TOML file (defaults are used when omitted)
    #[arg(short, long, env = "CATALOG_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite file holding the failure ledger and transfer reports
    #[arg(long, env = "CATALOG_SYNC_DB")]
    database: Option<PathBuf>,

    /// Log progress lines instead of drawing progress bars
    #[arg(long)]
    log_only: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Transfer a library export into a catalog snapshot
    Sync(SyncArgs),

    /// Inspect or clear failure ledger entries
    Failures {
        #[command(subcommand)]
        command: FailuresCommand,
    },

    /// Inspect transfer reports and success rates
    Report {
        #[command(subcommand)]
        command: ReportCommand,
    },
}

#[derive(Parser, Debug)]
struct SyncArgs {
    /// Library export JSON (playlists, liked tracks, albums)
    #[arg(long)]
    library: PathBuf,

    /// Catalog snapshot JSON standing in for the target service
    #[arg(long)]
    catalog: PathBuf,

    /// Write the updated catalog snapshot back to --catalog
    #[arg(long)]
    write_back: bool,

    /// Tracks searched concurrently per batch
    #[arg(long, env = "CATALOG_SYNC_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Pause between search batches in milliseconds
    #[arg(long)]
    search_delay_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum FailuresCommand {
    /// Failure statistics over the last N days
    Stats {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// Show the ledger entry for one source track id
    Show { id: String },
    /// Drop the ledger entry for one source track id
    Clear { id: String },
}

#[derive(Subcommand, Debug)]
enum ReportCommand {
    /// Show one transfer report
    Show { id: String },
    /// Delete reports older than N days (default: report_retention_days)
    Cleanup {
        #[arg(long)]
        days: Option<u32>,
    },
    /// Aggregated success rates
    Rates {
        #[arg(long)]
        platform: Option<String>,
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
}

fn load_config(cli: &Cli) -> Result<SyncConfig> {
    let mut config = match &cli.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    if let Some(database) = &cli.database {
        config.database = database.clone();
    }
    if let Command::Sync(args) = &cli.command {
        if let Some(batch_size) = args.batch_size {
            config.search_batch_size = batch_size;
        }
        if let Some(delay) = args.search_delay_ms {
            config.search_delay_ms = delay;
        }
    }
    config.validate()?;
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_export(path: &Path) -> Result<LibraryExport> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read library export {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse library export {}", path.display()))
}

fn run_sync(args: &SyncArgs, config: SyncConfig, db: Database) -> Result<()> {
    let export = read_export(&args.library)?;
    println!(
        "Loaded {} playlists, {} liked tracks, {} albums from {:?}",
        export.playlists.len(),
        export.tracks.len(),
        export.albums.len(),
        args.library
    );

    let spinner = create_spinner("Loading catalog snapshot");
    let catalog = MemoryCatalog::load(&args.catalog)?;
    spinner.finish_with_message("Catalog snapshot loaded");

    let reports = ReportStore::new(db.clone());
    let mut ctx = SyncContext::new(config, FailureLedger::new(db));
    let mut on_progress = |p: &catalog_sync::transfer::TransferProgress| {
        log::info!(
            "[{}%] {} ({}/{} playlists)",
            p.progress_percent,
            p.current_step,
            p.completed_playlists,
            p.total_playlists
        );
    };
    let result = transfer_library(&catalog, &export, &mut ctx, &reports, &mut on_progress);

    // Whatever was written before a failure is kept
    if args.write_back {
        catalog.save(&args.catalog)?;
        println!("Catalog snapshot written to {:?}", args.catalog);
    }

    let summary = result.context("Transfer failed")?;
    summary.print();
    print_json(&ctx.summary(ctx.config.report_retention_days)?)?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    set_log_only(cli.log_only);
    let config = load_config(&cli)?;

    let db = Database::open(&config.database)
        .with_context(|| format!("Failed to open database {:?}", config.database))?;

    match &cli.command {
        Command::Sync(args) => run_sync(args, config, db)?,
        Command::Failures { command } => {
            let ledger = FailureLedger::new(db);
            match command {
                FailuresCommand::Stats { days } => print_json(&ledger.statistics(*days)?)?,
                FailuresCommand::Show { id } => match ledger.failure_info(id)? {
                    Some(record) => print_json(&record)?,
                    None => println!("No failure recorded for {}", id),
                },
                FailuresCommand::Clear { id } => {
                    if ledger.remove_failure(id)? {
                        println!("Cleared failure for {}", id);
                    } else {
                        println!("No failure recorded for {}", id);
                    }
                }
            }
        }
        Command::Report { command } => {
            let reports = ReportStore::new(db);
            match command {
                ReportCommand::Show { id } => match reports.get(id)? {
                    Some(report) => print_json(&report)?,
                    None => println!("No report with id {}", id),
                },
                ReportCommand::Cleanup { days } => {
                    let days = days.unwrap_or(config.report_retention_days);
                    let removed = reports.cleanup_old_reports(days)?;
                    println!("Removed {} reports older than {} days", removed, days);
                }
                ReportCommand::Rates { platform, days } => {
                    match reports.success_rates(platform.as_deref(), *days)? {
                        Some(rates) => print_json(&rates)?,
                        None => println!("No transfer statistics in the last {} days", days),
                    }
                }
            }
        }
    }

    Ok(())
}
