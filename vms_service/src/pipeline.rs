//! One ingestion run, end to end.
//!
//! ```text
//! feed / capture ─► Snapshot ─► parse_batch ─► DuplicateResolver
//!                                                    │
//!                         one transaction ◄──────────┘
//!                   save_sample for every station
//! ```
//!
//! The storage handle is owned by the `Ingestor`; nothing here touches
//! global state.

use std::path::Path;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{IngestError, Result};
use crate::ingest::Snapshot;
use crate::ingest::parse::parse_batch;
use crate::ingest::velib::Feed;
use crate::logging::log_replay_summary;
use crate::reachability;
use crate::replay::{list_captures, load_capture};
use crate::resolve::DuplicateResolver;
use crate::store::{Database, save_sample};

/// What one snapshot did to the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub observed_at: DateTime<Utc>,
    /// Raw entries in the snapshot.
    pub entries: usize,
    /// Stations left after duplicate resolution.
    pub stations: usize,
    pub duplicates_dropped: usize,
    /// Info and record rows appended.
    pub rows_written: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryReport {
    pub files_processed: usize,
    pub files_skipped: usize,
    pub rows_written: usize,
}

/// Outcome of one invocation, printed as JSON by `--dry-run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum RunReport {
    Live(IngestReport),
    File(IngestReport),
    Directory(DirectoryReport),
}

impl RunReport {
    pub fn rows_written(&self) -> usize {
        match self {
            RunReport::Live(report) | RunReport::File(report) => report.rows_written,
            RunReport::Directory(report) => report.rows_written,
        }
    }
}

pub struct Ingestor<D: Database> {
    db: D,
    resolver: DuplicateResolver,
}

impl<D: Database> Ingestor<D> {
    pub fn new(db: D) -> Self {
        Self::with_resolver(db, DuplicateResolver::new())
    }

    pub fn with_resolver(db: D, resolver: DuplicateResolver) -> Self {
        Self { db, resolver }
    }

    pub fn database(&self) -> &D {
        &self.db
    }

    pub fn into_database(self) -> D {
        self.db
    }

    /// Create the history tables if needed.
    pub fn prepare(&mut self) -> Result<()> {
        self.db.ensure_schema()
    }

    // -----------------------------------------------------------------------
    // Sources
    // -----------------------------------------------------------------------

    /// Fetch a live snapshot stamped with `observed_at`, recording the
    /// outcome of the attempt in the reachability log.
    pub fn fetch_live_at(&mut self, feed: &dyn Feed, observed_at: DateTime<Utc>) -> Result<Snapshot> {
        let observed_at = observed_at.trunc_subsecs(0);
        info!("Fetching {}", feed.describe());

        match feed.fetch() {
            Ok(entries) => {
                reachability::record(&mut self.db, observed_at, true, None);
                Ok(Snapshot::new(observed_at, entries))
            }
            Err(e) => {
                reachability::record(&mut self.db, observed_at, false, Some(e.to_string()));
                Err(e)
            }
        }
    }

    pub fn fetch_live(&mut self, feed: &dyn Feed) -> Result<Snapshot> {
        self.fetch_live_at(feed, Utc::now())
    }

    // -----------------------------------------------------------------------
    // Ingestion
    // -----------------------------------------------------------------------

    /// Parse, resolve and coalesce one snapshot in a single transaction.
    pub fn ingest(&mut self, snapshot: &Snapshot) -> Result<IngestReport> {
        if snapshot.entries.is_empty() {
            return Err(IngestError::EmptyReply);
        }
        info!("{} records in incoming data", snapshot.entries.len());

        let samples = parse_batch(snapshot.observed_at, &snapshot.entries)?;
        let resolution = self.resolver.resolve(samples)?;
        debug!(
            "{} stations after duplicate resolution ({} dropped)",
            resolution.samples.len(),
            resolution.dropped
        );

        let samples = &resolution.samples;
        let rows_written = self.db.atomic(|store| {
            let mut written = 0;
            for sample in samples {
                written += save_sample(store, sample)?;
            }
            Ok(written)
        })?;
        info!("{} updates detected", rows_written);

        Ok(IngestReport {
            observed_at: snapshot.observed_at,
            entries: snapshot.entries.len(),
            stations: resolution.samples.len(),
            duplicates_dropped: resolution.dropped,
            rows_written,
        })
    }

    pub fn run_live(&mut self, feed: &dyn Feed) -> Result<IngestReport> {
        let snapshot = self.fetch_live(feed)?;
        self.ingest(&snapshot)
    }

    /// Replay one capture file. No reachability row is written.
    pub fn run_file(&mut self, path: &Path) -> Result<IngestReport> {
        let (observed_at, body) = load_capture(path)?;
        let snapshot = Snapshot::from_payload(observed_at, &body)?;
        self.ingest(&snapshot)
    }

    /// Replay every capture of a directory in file name order.
    ///
    /// With `skip_on_error`, a file whose content is bad is logged and
    /// skipped; file name, decompression and storage errors still abort.
    pub fn run_directory(&mut self, dir: &Path, skip_on_error: bool) -> Result<DirectoryReport> {
        let mut report = DirectoryReport::default();

        for path in list_captures(dir)? {
            match self.run_file(&path) {
                Ok(file_report) => {
                    report.files_processed += 1;
                    report.rows_written += file_report.rows_written;
                }
                Err(e) if skip_on_error && e.is_payload_error() => {
                    warn!("Skipping {}: {}", path.display(), e);
                    report.files_skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        log_replay_summary(report.files_processed, report.files_skipped, report.rows_written);
        Ok(report)
    }
}
