//! Core data types for the Velib station history service.
//!
//! This module defines the shared domain model imported by all other modules.
//! Apart from coordinate validation it contains no logic and no I/O: parsing
//! lives in `ingest::parse`, change detection in `store`.

use chrono::{DateTime, Utc};

use crate::error::{IngestError, Result};

/// Operational state reported by stations that are open to the public.
pub const STATE_OPERATIVE: &str = "Operative";

// ---------------------------------------------------------------------------
// Coordinates
// ---------------------------------------------------------------------------

/// A WGS84 point. Both coordinates are always finite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Builds a point, rejecting NaN and infinite coordinates.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !latitude.is_finite() {
            return Err(IngestError::validation("latitude", latitude, "not a finite number"));
        }
        if !longitude.is_finite() {
            return Err(IngestError::validation("longitude", longitude, "not a finite number"));
        }
        Ok(Self { latitude, longitude })
    }

    /// True when both coordinates are strictly smaller than `other`'s.
    ///
    /// Only used to check that a bounding box is not degenerate or inverted.
    pub fn is_south_west_of(&self, other: &GeoPoint) -> bool {
        self.latitude < other.latitude && self.longitude < other.longitude
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.latitude, self.longitude)
    }
}

// ---------------------------------------------------------------------------
// Station history rows
// ---------------------------------------------------------------------------

/// Slow-changing station attributes at one observation time.
///
/// Row key: `(observed_at, station_id)`.
#[derive(Debug, Clone, PartialEq)]
pub struct StationInfo {
    pub observed_at: DateTime<Utc>,
    pub operational_state: String, // "Operative", "Work in progress", ...
    pub name: String,
    pub is_electric_capable: bool,
    pub station_id: i64,
    pub due_date: Option<DateTime<Utc>>,
    pub location: GeoPoint,
}

/// Live counts and flags of a station at one observation time.
///
/// Row key: `(observed_at, station_id)`.
#[derive(Debug, Clone, PartialEq)]
pub struct StationRecord {
    pub observed_at: DateTime<Utc>,
    pub station_id: i64,
    pub overflow_enabled: bool,
    pub max_overflow_bikes: i32,
    pub overflow_ebikes: i32,
    pub kiosk_online: bool,
    pub density_level: i32,
    pub ebikes_available: i32,
    pub free_docks: i32,
    pub total_docks: i32,
    pub overflow_bikes: i32,
    pub electric_docks: i32,
    pub accepts_credit_card: bool,
    pub bikes_available: i32,
    pub free_electric_docks: i32,
    pub overflow_activated: bool,
}

/// Everything one feed entry says about one station.
///
/// Both halves always share `observed_at` and `station_id`; the fields are
/// private so that invariant cannot be broken after parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct StationSample {
    info: StationInfo,
    record: StationRecord,
}

impl StationSample {
    /// Pairs an info and a record, checking they describe the same row key.
    pub fn new(info: StationInfo, record: StationRecord) -> Result<Self> {
        if info.station_id != record.station_id {
            return Err(IngestError::validation(
                "station.code",
                record.station_id,
                format!("record does not match station info {}", info.station_id),
            ));
        }
        if info.observed_at != record.observed_at {
            return Err(IngestError::validation(
                "observed_at",
                record.observed_at,
                format!("record does not match station info {}", info.observed_at),
            ));
        }
        Ok(Self { info, record })
    }

    pub fn station_id(&self) -> i64 {
        self.info.station_id
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.info.observed_at
    }

    pub fn info(&self) -> &StationInfo {
        &self.info
    }

    pub fn record(&self) -> &StationRecord {
        &self.record
    }
}

// ---------------------------------------------------------------------------
// Audit rows
// ---------------------------------------------------------------------------

/// Outcome of one upstream fetch attempt. Keyed by `observed_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReachabilityStat {
    pub observed_at: DateTime<Utc>,
    pub succeeded: bool,
    pub detail: Option<String>,
}
