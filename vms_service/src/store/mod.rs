//! Append-only station history and change coalescing.
//!
//! Two history tables hold `StationInfo` and `StationRecord` rows keyed by
//! `(observed_at, station_id)`; a third holds one `ReachabilityStat` per
//! fetch attempt. Rows are only ever inserted. A new observation is written
//! only when it differs from the latest stored one for its station, so the
//! tables read as a change log rather than a copy of every poll.
//!
//! Backends:
//! - `pg`: PostgreSQL, the production store.
//! - `memory`: same contract, no server; used for dry runs and tests.

pub mod memory;
pub mod pg;

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::model::{ReachabilityStat, StationInfo, StationRecord, StationSample};

pub use memory::MemoryDatabase;
pub use pg::PgDatabase;

// ---------------------------------------------------------------------------
// Storage traits
// ---------------------------------------------------------------------------

/// Row-level access to the history tables.
pub trait HistoryStore {
    /// Latest stored info row for a station, whatever its time.
    fn latest_info(&mut self, station_id: i64) -> Result<Option<StationInfo>>;
    fn append_info(&mut self, info: &StationInfo) -> Result<()>;

    /// Latest stored record row for a station, whatever its time.
    fn latest_record(&mut self, station_id: i64) -> Result<Option<StationRecord>>;
    fn append_record(&mut self, record: &StationRecord) -> Result<()>;

    fn append_reachability(&mut self, stat: &ReachabilityStat) -> Result<()>;
}

/// A storage handle able to run a unit of work atomically.
pub trait Database {
    /// Create the tables if they do not exist yet.
    fn ensure_schema(&mut self) -> Result<()>;

    /// Run `work` in one transaction: everything it wrote is committed if it
    /// returns `Ok`, nothing is if it returns `Err`.
    fn atomic<T, F>(&mut self, work: F) -> Result<T>
    where
        F: FnOnce(&mut dyn HistoryStore) -> Result<T>;
}

// ---------------------------------------------------------------------------
// Observations
// ---------------------------------------------------------------------------

/// A history row that takes part in change coalescing.
pub trait Observation: Debug + Sized {
    /// Table-ish name for logs.
    const KIND: &'static str;

    fn station_id(&self) -> i64;
    fn observed_at(&self) -> DateTime<Utc>;

    /// True when any field other than `observed_at` and `station_id`
    /// differs from `prior`. Comparison is exact, floats included.
    fn has_changed(&self, prior: &Self) -> bool;

    fn latest(store: &mut dyn HistoryStore, station_id: i64) -> Result<Option<Self>>;
    fn append(&self, store: &mut dyn HistoryStore) -> Result<()>;
}

impl Observation for StationInfo {
    const KIND: &'static str = "station info";

    fn station_id(&self) -> i64 {
        self.station_id
    }

    fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    fn has_changed(&self, prior: &Self) -> bool {
        self.operational_state != prior.operational_state
            || self.name != prior.name
            || self.is_electric_capable != prior.is_electric_capable
            || self.due_date != prior.due_date
            || self.location != prior.location
    }

    fn latest(store: &mut dyn HistoryStore, station_id: i64) -> Result<Option<Self>> {
        store.latest_info(station_id)
    }

    fn append(&self, store: &mut dyn HistoryStore) -> Result<()> {
        store.append_info(self)
    }
}

impl Observation for StationRecord {
    const KIND: &'static str = "station record";

    fn station_id(&self) -> i64 {
        self.station_id
    }

    fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    fn has_changed(&self, prior: &Self) -> bool {
        self.overflow_enabled != prior.overflow_enabled
            || self.max_overflow_bikes != prior.max_overflow_bikes
            || self.overflow_ebikes != prior.overflow_ebikes
            || self.kiosk_online != prior.kiosk_online
            || self.density_level != prior.density_level
            || self.ebikes_available != prior.ebikes_available
            || self.free_docks != prior.free_docks
            || self.total_docks != prior.total_docks
            || self.overflow_bikes != prior.overflow_bikes
            || self.electric_docks != prior.electric_docks
            || self.accepts_credit_card != prior.accepts_credit_card
            || self.bikes_available != prior.bikes_available
            || self.free_electric_docks != prior.free_electric_docks
            || self.overflow_activated != prior.overflow_activated
    }

    fn latest(store: &mut dyn HistoryStore, station_id: i64) -> Result<Option<Self>> {
        store.latest_record(station_id)
    }

    fn append(&self, store: &mut dyn HistoryStore) -> Result<()> {
        store.append_record(self)
    }
}

// ---------------------------------------------------------------------------
// Coalescing
// ---------------------------------------------------------------------------

/// Append `candidate` if it carries new information. Returns rows written.
///
/// | latest stored row            | outcome                      |
/// |------------------------------|------------------------------|
/// | none                         | append (1)                   |
/// | older, identical fields      | skip (0)                     |
/// | older, some field differs    | append (1)                   |
/// | same `observed_at`           | skip (0), never overwrite    |
/// | newer than `candidate`       | `TemporalOrder` error        |
pub fn save_if_changed<T: Observation>(store: &mut dyn HistoryStore, candidate: &T) -> Result<usize> {
    let station_id = candidate.station_id();
    let prior = T::latest(store, station_id)?;
    debug!("Latest {} for station {} is {:?}", T::KIND, station_id, prior);

    let Some(prior) = prior else {
        candidate.append(store)?;
        return Ok(1);
    };

    if candidate.observed_at() < prior.observed_at() {
        return Err(IngestError::TemporalOrder {
            station_id,
            stored: prior.observed_at(),
            incoming: candidate.observed_at(),
        });
    }

    if candidate.observed_at() == prior.observed_at() {
        debug!("Same-instant {} for station {} already stored, skipping", T::KIND, station_id);
        return Ok(0);
    }

    if candidate.has_changed(&prior) {
        candidate.append(store)?;
        Ok(1)
    } else {
        Ok(0)
    }
}

/// Coalesce both halves of a sample independently. Returns 0, 1 or 2.
pub fn save_sample(store: &mut dyn HistoryStore, sample: &StationSample) -> Result<usize> {
    let written = save_if_changed(store, sample.info())? + save_if_changed(store, sample.record())?;
    Ok(written)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GeoPoint;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 1, 11, 18, 48, 0).unwrap()
    }

    fn info_at(observed_at: DateTime<Utc>) -> StationInfo {
        StationInfo {
            observed_at,
            operational_state: "Operative".to_string(),
            name: "Assas - Luxembourg".to_string(),
            is_electric_capable: true,
            station_id: 6008,
            due_date: Utc.timestamp_opt(1514761200, 0).single(),
            location: GeoPoint::new(48.84373446877937, 2.333428381875887).unwrap(),
        }
    }

    fn record_at(observed_at: DateTime<Utc>, bikes: i32) -> StationRecord {
        StationRecord {
            observed_at,
            station_id: 6008,
            overflow_enabled: false,
            max_overflow_bikes: 0,
            overflow_ebikes: 0,
            kiosk_online: false,
            density_level: 0,
            ebikes_available: 2,
            free_docks: 0,
            total_docks: 0,
            overflow_bikes: 0,
            electric_docks: 35,
            accepts_credit_card: false,
            bikes_available: bikes,
            free_electric_docks: 25,
            overflow_activated: false,
        }
    }

    // --- First observation --------------------------------------------------

    #[test]
    fn test_first_observation_is_always_written() {
        let mut db = MemoryDatabase::default();
        let written = save_if_changed(&mut db, &info_at(t0())).unwrap();
        assert_eq!(written, 1);
        assert_eq!(db.infos().len(), 1);
    }

    // --- Re-observations ----------------------------------------------------

    #[test]
    fn test_same_record_twice_is_stored_once() {
        let mut db = MemoryDatabase::default();
        assert_eq!(save_if_changed(&mut db, &record_at(t0(), 7)).unwrap(), 1);
        assert_eq!(
            save_if_changed(&mut db, &record_at(t0(), 7)).unwrap(),
            0,
            "resubmitting the same record should not write"
        );
        assert_eq!(db.records().len(), 1);
    }

    #[test]
    fn test_same_instant_with_different_values_is_not_overwritten() {
        let mut db = MemoryDatabase::default();
        save_if_changed(&mut db, &record_at(t0(), 7)).unwrap();
        assert_eq!(save_if_changed(&mut db, &record_at(t0(), 3)).unwrap(), 0);
        assert_eq!(db.records()[0].bikes_available, 7, "stored row must stay untouched");
    }

    #[test]
    fn test_later_identical_observation_is_skipped() {
        let mut db = MemoryDatabase::default();
        save_if_changed(&mut db, &info_at(t0())).unwrap();
        let later = info_at(t0() + Duration::minutes(1));
        assert_eq!(save_if_changed(&mut db, &later).unwrap(), 0);
        assert_eq!(db.infos().len(), 1);
    }

    #[test]
    fn test_later_changed_observation_is_appended() {
        let mut db = MemoryDatabase::default();
        save_if_changed(&mut db, &record_at(t0(), 7)).unwrap();
        let later = record_at(t0() + Duration::minutes(1), 6);
        assert_eq!(save_if_changed(&mut db, &later).unwrap(), 1);
        assert_eq!(db.records().len(), 2);
    }

    #[test]
    fn test_coordinate_change_counts_as_change() {
        let mut db = MemoryDatabase::default();
        save_if_changed(&mut db, &info_at(t0())).unwrap();
        let mut moved = info_at(t0() + Duration::minutes(1));
        moved.location = GeoPoint::new(48.84373446877937, 2.3334283818758).unwrap();
        assert_eq!(save_if_changed(&mut db, &moved).unwrap(), 1);
    }

    #[test]
    fn test_due_date_cleared_counts_as_change() {
        let mut db = MemoryDatabase::default();
        save_if_changed(&mut db, &info_at(t0())).unwrap();
        let mut cleared = info_at(t0() + Duration::minutes(1));
        cleared.due_date = None;
        assert_eq!(save_if_changed(&mut db, &cleared).unwrap(), 1);
    }

    // --- Temporal order -----------------------------------------------------

    #[test]
    fn test_older_observation_is_a_temporal_order_violation() {
        let mut db = MemoryDatabase::default();
        save_if_changed(&mut db, &record_at(t0(), 7)).unwrap();

        let earlier = record_at(t0() - Duration::minutes(1), 1);
        let result = save_if_changed(&mut db, &earlier);
        match result {
            Err(IngestError::TemporalOrder { station_id, stored, incoming }) => {
                assert_eq!(station_id, 6008);
                assert_eq!(stored, t0());
                assert_eq!(incoming, t0() - Duration::minutes(1));
            }
            other => panic!("expected a temporal order violation, got {:?}", other),
        }
        assert_eq!(db.records().len(), 1, "nothing should be written");
    }

    // --- Samples ------------------------------------------------------------

    #[test]
    fn test_sample_halves_are_coalesced_independently() {
        let mut db = MemoryDatabase::default();
        let first = StationSample::new(info_at(t0()), record_at(t0(), 7)).unwrap();
        assert_eq!(save_sample(&mut db, &first).unwrap(), 2);

        // Only the counters moved.
        let later = t0() + Duration::minutes(1);
        let second = StationSample::new(info_at(later), record_at(later, 5)).unwrap();
        assert_eq!(save_sample(&mut db, &second).unwrap(), 1);
        assert_eq!(db.infos().len(), 1);
        assert_eq!(db.records().len(), 2);
    }
}
