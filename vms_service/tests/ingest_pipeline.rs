//! End-to-end ingestion against the in-memory history backend.
//!
//! Covers the whole path from raw feed entries to coalesced history rows:
//! 1. Duplicate station entries resolved before storage
//! 2. Unchanged re-polls writing nothing
//! 3. Whole-snapshot rollback on conflicts and clock problems
//! 4. Reachability bookkeeping for live fetches
//! 5. Directory replays with and without skipping bad captures
//!
//! Run with: cargo test --test ingest_pipeline

mod common;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use vms_service::error::{IngestError, Result};
use vms_service::ingest::Snapshot;
use vms_service::ingest::velib::{Feed, parse_payload};
use vms_service::pipeline::Ingestor;
use vms_service::store::MemoryDatabase;

use common::{entry, write_capture};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2018, 1, 11, 18, 48, 1).unwrap()
}

fn ingestor() -> Ingestor<MemoryDatabase> {
    Ingestor::new(MemoryDatabase::default())
}

/// Feed answering with a fixed body, classified like the real client does.
struct CannedFeed(&'static str);

impl Feed for CannedFeed {
    fn fetch(&self) -> Result<Vec<Value>> {
        parse_payload(self.0)
    }

    fn describe(&self) -> String {
        "canned feed".to_string()
    }
}

// ---------------------------------------------------------------------------
// Coalescing through the pipeline
// ---------------------------------------------------------------------------

#[test]
fn test_operative_duplicate_wins_and_writes_two_rows() {
    let mut ingestor = ingestor();
    let snapshot = Snapshot::new(
        t0(),
        vec![entry("6008", "Operative", 7), entry("6008", "Work in progress", 0)],
    );

    let report = ingestor.ingest(&snapshot).expect("ingestion should succeed");
    assert_eq!(report.rows_written, 2, "one info and one record row for station 6008");
    assert_eq!(report.duplicates_dropped, 1);

    let db = ingestor.database();
    assert_eq!(db.infos()[0].operational_state, "Operative");
    assert_eq!(db.records()[0].bikes_available, 7, "the operative entry's counters are kept");
}

#[test]
fn test_unchanged_repoll_writes_nothing() {
    let mut ingestor = ingestor();
    let first = Snapshot::new(t0(), vec![entry("6008", "Operative", 7)]);
    let second = Snapshot::new(t0() + Duration::minutes(1), vec![entry("6008", "Operative", 7)]);

    assert_eq!(ingestor.ingest(&first).unwrap().rows_written, 2);
    assert_eq!(ingestor.ingest(&second).unwrap().rows_written, 0);
    assert_eq!(ingestor.database().history_len(), 2);
}

#[test]
fn test_counter_change_writes_only_record_row() {
    let mut ingestor = ingestor();
    ingestor
        .ingest(&Snapshot::new(t0(), vec![entry("6008", "Operative", 7)]))
        .unwrap();
    let report = ingestor
        .ingest(&Snapshot::new(t0() + Duration::minutes(1), vec![entry("6008", "Operative", 6)]))
        .unwrap();

    assert_eq!(report.rows_written, 1);
    assert_eq!(ingestor.database().infos().len(), 1);
    assert_eq!(ingestor.database().records().len(), 2);
}

// ---------------------------------------------------------------------------
// Atomicity
// ---------------------------------------------------------------------------

#[test]
fn test_data_conflict_rejects_whole_snapshot() {
    let mut ingestor = ingestor();
    let snapshot = Snapshot::new(
        t0(),
        vec![
            entry("10006", "Operative", 3),
            entry("6008", "Operative", 7),
            entry("6008", "Operative", 5),
        ],
    );

    let result = ingestor.ingest(&snapshot);
    assert!(
        matches!(result, Err(IngestError::DataConflict { station_id: 6008, .. })),
        "two operative entries cannot be resolved, got {:?}",
        result
    );
    assert_eq!(ingestor.database().history_len(), 0, "no station of the snapshot is stored");
}

#[test]
fn test_temporal_order_violation_rolls_back_batch() {
    let mut ingestor = ingestor();
    ingestor
        .ingest(&Snapshot::new(t0(), vec![entry("6008", "Operative", 7)]))
        .unwrap();

    // Station 1001 sorts first and is written, then 6008 goes back in time.
    let earlier = Snapshot::new(
        t0() - Duration::minutes(5),
        vec![entry("1001", "Operative", 3), entry("6008", "Operative", 1)],
    );
    let result = ingestor.ingest(&earlier);
    assert!(matches!(result, Err(IngestError::TemporalOrder { station_id: 6008, .. })));
    assert_eq!(
        ingestor.database().history_len(),
        2,
        "station 1001 must be rolled back with the batch"
    );
}

#[test]
fn test_malformed_entry_fails_batch_with_its_index() {
    let mut ingestor = ingestor();
    let mut bad = entry("10006", "Operative", 3);
    bad["station"]["type"] = Value::from("maybe");
    let snapshot = Snapshot::new(t0(), vec![entry("6008", "Operative", 7), bad]);

    match ingestor.ingest(&snapshot) {
        Err(IngestError::Validation { field, value, .. }) => {
            assert_eq!(field, "[1].station.type");
            assert!(value.contains("maybe"));
        }
        other => panic!("expected a validation error, got {:?}", other),
    }
    assert_eq!(ingestor.database().history_len(), 0);
}

// ---------------------------------------------------------------------------
// Live fetches
// ---------------------------------------------------------------------------

#[test]
fn test_api_error_reply_is_recorded_as_unreachable() {
    let mut ingestor = ingestor();
    let feed = CannedFeed(r#"{"error": {"code": 503, "message": "Service Unavailable"}}"#);

    let err = ingestor.fetch_live_at(&feed, t0()).expect_err("error object is not a snapshot");
    assert!(matches!(err, IngestError::Api { code: 503, .. }), "got {:?}", err);
    assert!(err.is_retryable());

    let stats = ingestor.database().reachability();
    assert_eq!(stats.len(), 1);
    assert!(!stats[0].succeeded);
    assert!(stats[0].detail.as_deref().unwrap_or("").contains("503"));
}

#[test]
fn test_empty_reply_is_recorded_and_retryable() {
    let mut ingestor = ingestor();
    let result = ingestor.fetch_live_at(&CannedFeed("[]"), t0());
    assert!(matches!(result, Err(IngestError::EmptyReply)));
    assert!(!ingestor.database().reachability()[0].succeeded);
}

// ---------------------------------------------------------------------------
// Directory replays
// ---------------------------------------------------------------------------

fn body(entries: &[Value]) -> String {
    Value::Array(entries.to_vec()).to_string()
}

#[test]
fn test_directory_replay_in_file_name_order() {
    let dir = tempfile::tempdir().unwrap();
    // Written out of order on purpose; the later capture has fewer bikes.
    write_capture(dir.path(), "2018-01-11_18-50-01_UTC.json.bz2", &body(&[entry("6008", "Operative", 5)]));
    write_capture(dir.path(), "2018-01-11_18-48-01_UTC.json.bz2", &body(&[entry("6008", "Operative", 7)]));

    let mut ingestor = ingestor();
    let report = ingestor.run_directory(dir.path(), false).expect("replay should succeed");
    assert_eq!(report.files_processed, 2);
    assert_eq!(report.rows_written, 3);

    let records = ingestor.database().records();
    assert_eq!(records[0].bikes_available, 7);
    assert_eq!(records[1].bikes_available, 5);
    assert!(ingestor.database().reachability().is_empty(), "replays are not fetch attempts");
}

#[test]
fn test_bad_capture_aborts_without_skip() {
    let dir = tempfile::tempdir().unwrap();
    write_capture(dir.path(), "2018-01-11_18-48-01_UTC.json.bz2", "[]");
    write_capture(dir.path(), "2018-01-11_18-50-01_UTC.json.bz2", &body(&[entry("6008", "Operative", 5)]));

    let mut ingestor = ingestor();
    let result = ingestor.run_directory(dir.path(), false);
    assert!(matches!(result, Err(IngestError::EmptyReply)));
    assert_eq!(ingestor.database().history_len(), 0);
}

#[test]
fn test_bad_capture_is_skipped_when_asked() {
    let dir = tempfile::tempdir().unwrap();
    write_capture(dir.path(), "2018-01-11_18-48-01_UTC.json.bz2", r#"{"error":{"code":500}}"#);
    write_capture(dir.path(), "2018-01-11_18-50-01_UTC.json.bz2", &body(&[entry("6008", "Operative", 5)]));

    let mut ingestor = ingestor();
    let report = ingestor.run_directory(dir.path(), true).expect("bad payload should be skipped");
    assert_eq!(report.files_skipped, 1);
    assert_eq!(report.files_processed, 1);
    assert_eq!(report.rows_written, 2);
}

#[test]
fn test_badly_named_capture_aborts_even_with_skip() {
    let dir = tempfile::tempdir().unwrap();
    write_capture(dir.path(), "stations.json.bz2", &body(&[entry("6008", "Operative", 5)]));

    let mut ingestor = ingestor();
    let result = ingestor.run_directory(dir.path(), true);
    assert!(
        matches!(result, Err(IngestError::Replay { .. })),
        "file naming problems are operator errors, got {:?}",
        result
    );
}
