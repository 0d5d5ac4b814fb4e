//! In-memory history backend.
//!
//! Honours the same contract as PostgreSQL: unique row keys and
//! all-or-nothing units of work. Backs `--dry-run` and the test suite.

use crate::error::{IngestError, Result};
use crate::model::{ReachabilityStat, StationInfo, StationRecord};
use crate::store::{Database, HistoryStore};

#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    infos: Vec<StationInfo>,
    records: Vec<StationRecord>,
    reachability: Vec<ReachabilityStat>,
}

impl MemoryDatabase {
    pub fn infos(&self) -> &[StationInfo] {
        &self.infos
    }

    pub fn records(&self) -> &[StationRecord] {
        &self.records
    }

    pub fn reachability(&self) -> &[ReachabilityStat] {
        &self.reachability
    }

    /// Total number of history rows (info + record).
    pub fn history_len(&self) -> usize {
        self.infos.len() + self.records.len()
    }
}

fn duplicate_key(table: &str, key: impl std::fmt::Display) -> IngestError {
    IngestError::Storage(format!("duplicate key {} in {}", key, table))
}

impl HistoryStore for MemoryDatabase {
    fn latest_info(&mut self, station_id: i64) -> Result<Option<StationInfo>> {
        Ok(self
            .infos
            .iter()
            .filter(|row| row.station_id == station_id)
            .max_by_key(|row| row.observed_at)
            .cloned())
    }

    fn append_info(&mut self, info: &StationInfo) -> Result<()> {
        if self
            .infos
            .iter()
            .any(|row| row.station_id == info.station_id && row.observed_at == info.observed_at)
        {
            return Err(duplicate_key("station_info", format!("({}, {})", info.observed_at, info.station_id)));
        }
        self.infos.push(info.clone());
        Ok(())
    }

    fn latest_record(&mut self, station_id: i64) -> Result<Option<StationRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|row| row.station_id == station_id)
            .max_by_key(|row| row.observed_at)
            .cloned())
    }

    fn append_record(&mut self, record: &StationRecord) -> Result<()> {
        if self
            .records
            .iter()
            .any(|row| row.station_id == record.station_id && row.observed_at == record.observed_at)
        {
            return Err(duplicate_key(
                "station_record",
                format!("({}, {})", record.observed_at, record.station_id),
            ));
        }
        self.records.push(record.clone());
        Ok(())
    }

    fn append_reachability(&mut self, stat: &ReachabilityStat) -> Result<()> {
        if self.reachability.iter().any(|row| row.observed_at == stat.observed_at) {
            return Err(duplicate_key("api_reachability_stat", stat.observed_at));
        }
        self.reachability.push(stat.clone());
        Ok(())
    }
}

impl Database for MemoryDatabase {
    fn ensure_schema(&mut self) -> Result<()> {
        Ok(())
    }

    fn atomic<T, F>(&mut self, work: F) -> Result<T>
    where
        F: FnOnce(&mut dyn HistoryStore) -> Result<T>,
    {
        let checkpoint = self.clone();
        let result = {
            let store: &mut dyn HistoryStore = &mut *self;
            work(store)
        };
        match result {
            Ok(output) => Ok(output),
            Err(err) => {
                *self = checkpoint;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn stat(succeeded: bool) -> ReachabilityStat {
        ReachabilityStat {
            observed_at: Utc.with_ymd_and_hms(2018, 1, 7, 10, 9, 0).unwrap(),
            succeeded,
            detail: None,
        }
    }

    #[test]
    fn test_atomic_commits_on_success() {
        let mut db = MemoryDatabase::default();
        db.atomic(|store| store.append_reachability(&stat(true))).unwrap();
        assert_eq!(db.reachability().len(), 1);
    }

    #[test]
    fn test_atomic_rolls_back_on_error() {
        let mut db = MemoryDatabase::default();
        let result: Result<()> = db.atomic(|store| {
            store.append_reachability(&stat(true))?;
            Err(IngestError::EmptyReply)
        });
        assert!(result.is_err());
        assert!(db.reachability().is_empty(), "failed unit of work must leave no rows");
    }

    #[test]
    fn test_duplicate_keys_are_rejected() {
        let mut db = MemoryDatabase::default();
        db.append_reachability(&stat(true)).unwrap();
        let result = db.append_reachability(&stat(false));
        assert!(matches!(result, Err(IngestError::Storage(_))), "got {:?}", result);
    }
}
