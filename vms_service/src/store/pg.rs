//! PostgreSQL history backend.
//!
//! Timestamps are `TIMESTAMPTZ` (via the `with-chrono-0_4` feature), station
//! codes `BIGINT`, counters `INTEGER`. Lookups for the latest row of a
//! station go through a `(station_id, observed_at DESC)` index.

use postgres::{Client, GenericClient, NoTls, Row};
use tracing::{debug, info};

use crate::error::Result;
use crate::model::{GeoPoint, ReachabilityStat, StationInfo, StationRecord};
use crate::store::{Database, HistoryStore};

/// Idempotent schema bootstrap, run at startup.
pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS station_info (
        observed_at          TIMESTAMPTZ      NOT NULL,
        station_id           BIGINT           NOT NULL,
        operational_state    TEXT             NOT NULL,
        name                 TEXT             NOT NULL,
        is_electric_capable  BOOLEAN          NOT NULL,
        due_date             TIMESTAMPTZ,
        latitude             DOUBLE PRECISION NOT NULL,
        longitude            DOUBLE PRECISION NOT NULL,
        PRIMARY KEY (observed_at, station_id)
    );
    CREATE INDEX IF NOT EXISTS station_info_latest_idx
        ON station_info (station_id, observed_at DESC);

    CREATE TABLE IF NOT EXISTS station_record (
        observed_at          TIMESTAMPTZ NOT NULL,
        station_id           BIGINT      NOT NULL,
        overflow_enabled     BOOLEAN     NOT NULL,
        max_overflow_bikes   INTEGER     NOT NULL,
        overflow_ebikes      INTEGER     NOT NULL,
        kiosk_online         BOOLEAN     NOT NULL,
        density_level        INTEGER     NOT NULL,
        ebikes_available     INTEGER     NOT NULL,
        free_docks           INTEGER     NOT NULL,
        total_docks          INTEGER     NOT NULL,
        overflow_bikes       INTEGER     NOT NULL,
        electric_docks       INTEGER     NOT NULL,
        accepts_credit_card  BOOLEAN     NOT NULL,
        bikes_available      INTEGER     NOT NULL,
        free_electric_docks  INTEGER     NOT NULL,
        overflow_activated   BOOLEAN     NOT NULL,
        PRIMARY KEY (observed_at, station_id)
    );
    CREATE INDEX IF NOT EXISTS station_record_latest_idx
        ON station_record (station_id, observed_at DESC);

    CREATE TABLE IF NOT EXISTS api_reachability_stat (
        observed_at  TIMESTAMPTZ PRIMARY KEY,
        succeeded    BOOLEAN     NOT NULL,
        detail       TEXT
    );
";

const LATEST_INFO: &str = "
    SELECT observed_at, station_id, operational_state, name, is_electric_capable,
           due_date, latitude, longitude
    FROM station_info
    WHERE station_id = $1
    ORDER BY observed_at DESC
    LIMIT 1
";

const INSERT_INFO: &str = "
    INSERT INTO station_info
        (observed_at, station_id, operational_state, name, is_electric_capable,
         due_date, latitude, longitude)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
";

const LATEST_RECORD: &str = "
    SELECT observed_at, station_id, overflow_enabled, max_overflow_bikes, overflow_ebikes,
           kiosk_online, density_level, ebikes_available, free_docks, total_docks,
           overflow_bikes, electric_docks, accepts_credit_card, bikes_available,
           free_electric_docks, overflow_activated
    FROM station_record
    WHERE station_id = $1
    ORDER BY observed_at DESC
    LIMIT 1
";

const INSERT_RECORD: &str = "
    INSERT INTO station_record
        (observed_at, station_id, overflow_enabled, max_overflow_bikes, overflow_ebikes,
         kiosk_online, density_level, ebikes_available, free_docks, total_docks,
         overflow_bikes, electric_docks, accepts_credit_card, bikes_available,
         free_electric_docks, overflow_activated)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
";

const INSERT_REACHABILITY: &str = "
    INSERT INTO api_reachability_stat (observed_at, succeeded, detail)
    VALUES ($1, $2, $3)
";

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn info_from_row(row: &Row) -> Result<StationInfo> {
    Ok(StationInfo {
        observed_at: row.try_get("observed_at")?,
        station_id: row.try_get("station_id")?,
        operational_state: row.try_get("operational_state")?,
        name: row.try_get("name")?,
        is_electric_capable: row.try_get("is_electric_capable")?,
        due_date: row.try_get("due_date")?,
        location: GeoPoint::new(row.try_get("latitude")?, row.try_get("longitude")?)?,
    })
}

fn record_from_row(row: &Row) -> Result<StationRecord> {
    Ok(StationRecord {
        observed_at: row.try_get("observed_at")?,
        station_id: row.try_get("station_id")?,
        overflow_enabled: row.try_get("overflow_enabled")?,
        max_overflow_bikes: row.try_get("max_overflow_bikes")?,
        overflow_ebikes: row.try_get("overflow_ebikes")?,
        kiosk_online: row.try_get("kiosk_online")?,
        density_level: row.try_get("density_level")?,
        ebikes_available: row.try_get("ebikes_available")?,
        free_docks: row.try_get("free_docks")?,
        total_docks: row.try_get("total_docks")?,
        overflow_bikes: row.try_get("overflow_bikes")?,
        electric_docks: row.try_get("electric_docks")?,
        accepts_credit_card: row.try_get("accepts_credit_card")?,
        bikes_available: row.try_get("bikes_available")?,
        free_electric_docks: row.try_get("free_electric_docks")?,
        overflow_activated: row.try_get("overflow_activated")?,
    })
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// History tables seen through a client or an open transaction.
pub struct PgTables<'a, C: GenericClient> {
    client: &'a mut C,
}

impl<'a, C: GenericClient> PgTables<'a, C> {
    pub fn new(client: &'a mut C) -> Self {
        Self { client }
    }
}

impl<C: GenericClient> HistoryStore for PgTables<'_, C> {
    fn latest_info(&mut self, station_id: i64) -> Result<Option<StationInfo>> {
        self.client
            .query_opt(LATEST_INFO, &[&station_id])?
            .as_ref()
            .map(info_from_row)
            .transpose()
    }

    fn append_info(&mut self, info: &StationInfo) -> Result<()> {
        self.client.execute(
            INSERT_INFO,
            &[
                &info.observed_at,
                &info.station_id,
                &info.operational_state,
                &info.name,
                &info.is_electric_capable,
                &info.due_date,
                &info.location.latitude,
                &info.location.longitude,
            ],
        )?;
        Ok(())
    }

    fn latest_record(&mut self, station_id: i64) -> Result<Option<StationRecord>> {
        self.client
            .query_opt(LATEST_RECORD, &[&station_id])?
            .as_ref()
            .map(record_from_row)
            .transpose()
    }

    fn append_record(&mut self, record: &StationRecord) -> Result<()> {
        self.client.execute(
            INSERT_RECORD,
            &[
                &record.observed_at,
                &record.station_id,
                &record.overflow_enabled,
                &record.max_overflow_bikes,
                &record.overflow_ebikes,
                &record.kiosk_online,
                &record.density_level,
                &record.ebikes_available,
                &record.free_docks,
                &record.total_docks,
                &record.overflow_bikes,
                &record.electric_docks,
                &record.accepts_credit_card,
                &record.bikes_available,
                &record.free_electric_docks,
                &record.overflow_activated,
            ],
        )?;
        Ok(())
    }

    fn append_reachability(&mut self, stat: &ReachabilityStat) -> Result<()> {
        self.client.execute(
            INSERT_REACHABILITY,
            &[&stat.observed_at, &stat.succeeded, &stat.detail],
        )?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Database handle
// ---------------------------------------------------------------------------

/// Owned PostgreSQL connection; every unit of work runs in a transaction.
pub struct PgDatabase {
    client: Client,
}

impl PgDatabase {
    /// Connect without TLS, e.g. `postgres://vms@localhost/vms`.
    pub fn connect(url: &str) -> Result<Self> {
        let client = Client::connect(url, NoTls)?;
        info!("Connected to PostgreSQL");
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&mut self) -> &mut Client {
        &mut self.client
    }
}

impl Database for PgDatabase {
    fn ensure_schema(&mut self) -> Result<()> {
        debug!("Ensuring history tables exist");
        self.client.batch_execute(SCHEMA)?;
        Ok(())
    }

    fn atomic<T, F>(&mut self, work: F) -> Result<T>
    where
        F: FnOnce(&mut dyn HistoryStore) -> Result<T>,
    {
        let mut transaction = self.client.transaction()?;
        // Dropping an uncommitted transaction rolls it back.
        let output = {
            let mut tables = PgTables::new(&mut transaction);
            let store: &mut dyn HistoryStore = &mut tables;
            work(store)?
        };
        transaction.commit()?;
        Ok(output)
    }
}
