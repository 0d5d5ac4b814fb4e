//! `vms` - ingest one Velib snapshot (live or replayed) into the history.
//!
//! Meant to be run periodically by a scheduler. Exit status:
//! - 0: success
//! - 75: transient upstream failure, try again next interval
//! - 1: anything else

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use tracing::{info, warn};

use vms_service::{IngestError, Result};
use vms_service::config::{Config, DEFAULT_CONFIG_PATH};
use vms_service::ingest::velib::VelibClient;
use vms_service::logging::{self, log_run_failure};
use vms_service::pipeline::{Ingestor, RunReport};
use vms_service::store::{Database, MemoryDatabase, PgDatabase};

const EX_TEMPFAIL: u8 = 75;

#[derive(Parser, Debug)]
#[command(name = "vms")]
#[command(about = "Record Velib Metropole station changes", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Console log level, overrides the configuration and RUST_LOG
    #[arg(short, long, value_parser = ["trace", "debug", "info", "warn", "warning", "error"])]
    log_level: Option<String>,

    /// Replay one captured reply instead of polling the feed
    #[arg(short, long, conflicts_with = "dir")]
    file: Option<PathBuf>,

    /// Replay every captured reply of a directory, in file name order
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Skip a capture whose content cannot be ingested instead of stopping
    #[arg(long, requires = "dir")]
    skip_file_on_error: bool,

    /// Run the whole pipeline against an empty in-memory history
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    /// Polling the feed rather than replaying captures.
    fn is_live(&self) -> bool {
        self.file.is_none() && self.dir.is_none()
    }
}

fn main() -> ExitCode {
    let started = Instant::now();
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let _guard = match logging::init(&config.logging, cli.log_level.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("Loaded configuration from {}", cli.config.display());

    let status = match run(&cli, &config) {
        Ok(()) => 0,
        Err(e) => {
            log_run_failure("Ingestion", &e);
            exit_status(&e, cli.is_live())
        }
    };

    if status == 0 {
        info!("Exiting with status {}", status);
    } else {
        warn!("Exiting with status {}", status);
    }
    info!("Ran for {:.3}s", started.elapsed().as_secs_f64());

    ExitCode::from(status)
}

/// Only a live poll can succeed on a later attempt; a capture that failed
/// once fails the same way every time.
fn exit_status(err: &IngestError, live: bool) -> u8 {
    if live && err.is_retryable() { EX_TEMPFAIL } else { 1 }
}

fn run(cli: &Cli, config: &Config) -> Result<()> {
    if cli.dry_run {
        info!("Dry run, nothing will be written to PostgreSQL");
        let report = execute(Ingestor::new(MemoryDatabase::default()), cli, config)?;
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => warn!("Could not render dry run report: {}", e),
        }
        return Ok(());
    }

    let db = PgDatabase::connect(&config.database.resolve_url()?)?;
    let report = execute(Ingestor::new(db), cli, config)?;
    info!("{} rows written", report.rows_written());
    Ok(())
}

/// Run the selected source through the ingestor.
fn execute<D: Database>(mut ingestor: Ingestor<D>, cli: &Cli, config: &Config) -> Result<RunReport> {
    ingestor.prepare()?;

    if let Some(file) = &cli.file {
        return Ok(RunReport::File(ingestor.run_file(file)?));
    }

    if let Some(dir) = &cli.dir {
        return Ok(RunReport::Directory(
            ingestor.run_directory(dir, cli.skip_file_on_error)?,
        ));
    }

    let feed = VelibClient::new(&config.feed)?;
    Ok(RunReport::Live(ingestor.run_live(&feed)?))
}
