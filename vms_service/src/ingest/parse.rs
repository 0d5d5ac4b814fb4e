//! Record parsers: raw Velib feed entries into validated station rows.
//!
//! One feed entry looks like this (extra keys are ignored):
//!
//! ```json
//! {
//!     "station": {
//!         "state": "Operative",
//!         "name": "Assas - Luxembourg",
//!         "type": "yes",
//!         "code": "6008",
//!         "dueDate": 1514761200.0,
//!         "gps": { "latitude": 48.84373446877937, "longitude": 2.333428381875887 }
//!     },
//!     "overflow": "no", "maxBikeOverflow": 0, "nbEBikeOverflow": 0,
//!     "kioskState": "no", "densityLevel": 0, "nbEbike": 2, "nbFreeDock": 0,
//!     "nbDock": 0, "nbBikeOverflow": 0, "nbEDock": 35, "creditCard": "no",
//!     "nbBike": 7, "nbFreeEDock": 25, "overflowActivation": "no"
//! }
//! ```
//!
//! Every failure names the offending field path and its raw value. Nothing
//! is coerced silently: a field is either converted exactly or rejected.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::warn;

use crate::error::{IngestError, Result};
use crate::model::{GeoPoint, StationInfo, StationRecord, StationSample};

// ============================================================================
// Field access
// ============================================================================

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

/// Looks up `key` in the object at `path`. Missing keys and JSON nulls are
/// both reported as missing.
fn required<'a>(object: &'a Value, path: &str, key: &str) -> Result<&'a Value> {
    let field = join(path, key);
    let map = object
        .as_object()
        .ok_or_else(|| IngestError::validation(path, object, "expected an object"))?;
    match map.get(key) {
        None | Some(Value::Null) => Err(IngestError::validation(field, "null", "missing required field")),
        Some(value) => Ok(value),
    }
}

fn optional<'a>(object: &'a Value, key: &str) -> Option<&'a Value> {
    object.get(key).filter(|value| !value.is_null())
}

fn string_field(object: &Value, path: &str, key: &str) -> Result<String> {
    let value = required(object, path, key)?;
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| IngestError::validation(join(path, key), value, "expected a string"))
}

/// Converts a JSON number or numeric string into a finite `f64`.
fn to_f64(value: &Value, field: &str) -> Result<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(number) if number.is_finite() => Ok(number),
        _ => Err(IngestError::validation(field, value, "expected a finite number")),
    }
}

/// Converts a JSON integer, an integral float, or an integer string.
fn to_i64(value: &Value, field: &str) -> Result<i64> {
    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| IngestError::validation(field, value, "expected an integer"))
}

fn count_field(object: &Value, path: &str, key: &str) -> Result<i32> {
    let field = join(path, key);
    let value = required(object, path, key)?;
    let wide = to_i64(value, &field)?;
    i32::try_from(wide).map_err(|_| IngestError::validation(field, value, "integer out of range"))
}

/// Converts the feed's "yes"/"no" flags. Anything else is rejected.
pub fn bool_from_yes_no(value: &Value, field: &str) -> Result<bool> {
    match value.as_str() {
        Some("yes") => Ok(true),
        Some("no") => Ok(false),
        _ => Err(IngestError::validation(field, value, "expected \"yes\" or \"no\"")),
    }
}

fn flag_field(object: &Value, path: &str, key: &str) -> Result<bool> {
    let value = required(object, path, key)?;
    bool_from_yes_no(value, &join(path, key))
}

/// Epoch seconds (fractional allowed) into a timestamp, millisecond precision.
fn epoch_to_timestamp(value: &Value, field: &str) -> Result<DateTime<Utc>> {
    let seconds = to_f64(value, field)?;
    DateTime::from_timestamp_millis((seconds * 1000.0).round() as i64)
        .ok_or_else(|| IngestError::validation(field, value, "epoch value out of range"))
}

// ============================================================================
// Parsers
// ============================================================================

/// Coordinate validator: `{"latitude": .., "longitude": ..}` into a point.
///
/// Numbers and numeric strings are accepted; anything that does not convert
/// to a finite real number is a validation error.
pub fn parse_geo_point(value: &Value, path: &str) -> Result<GeoPoint> {
    let latitude_field = join(path, "latitude");
    let longitude_field = join(path, "longitude");
    let latitude = to_f64(required(value, path, "latitude")?, &latitude_field)?;
    let longitude = to_f64(required(value, path, "longitude")?, &longitude_field)?;
    GeoPoint::new(latitude, longitude)
}

/// Parses the station identifier, a string-typed field in the feed.
pub fn parse_station_id(station: &Value, path: &str) -> Result<i64> {
    let field = join(path, "code");
    to_i64(required(station, path, "code")?, &field)
}

/// Parses the `station` object of a feed entry.
pub fn parse_station_info(observed_at: DateTime<Utc>, station: &Value) -> Result<StationInfo> {
    let path = "station";
    let due_date = match optional(station, "dueDate") {
        Some(value) => Some(epoch_to_timestamp(value, "station.dueDate")?),
        None => None,
    };

    Ok(StationInfo {
        observed_at,
        operational_state: string_field(station, path, "state")?,
        name: string_field(station, path, "name")?,
        is_electric_capable: flag_field(station, path, "type")?,
        station_id: parse_station_id(station, path)?,
        due_date,
        location: parse_geo_point(required(station, path, "gps")?, "station.gps")?,
    })
}

/// Parses the live counters of a feed entry.
pub fn parse_station_record(observed_at: DateTime<Utc>, entry: &Value) -> Result<StationRecord> {
    let station = required(entry, "", "station")?;

    Ok(StationRecord {
        observed_at,
        station_id: parse_station_id(station, "station")?,
        overflow_enabled: flag_field(entry, "", "overflow")?,
        max_overflow_bikes: count_field(entry, "", "maxBikeOverflow")?,
        overflow_ebikes: count_field(entry, "", "nbEBikeOverflow")?,
        kiosk_online: flag_field(entry, "", "kioskState")?,
        density_level: count_field(entry, "", "densityLevel")?,
        ebikes_available: count_field(entry, "", "nbEbike")?,
        free_docks: count_field(entry, "", "nbFreeDock")?,
        total_docks: count_field(entry, "", "nbDock")?,
        overflow_bikes: count_field(entry, "", "nbBikeOverflow")?,
        electric_docks: count_field(entry, "", "nbEDock")?,
        accepts_credit_card: flag_field(entry, "", "creditCard")?,
        bikes_available: count_field(entry, "", "nbBike")?,
        free_electric_docks: count_field(entry, "", "nbFreeEDock")?,
        overflow_activated: flag_field(entry, "", "overflowActivation")?,
    })
}

/// Parses one feed entry into its info and record halves.
pub fn parse_sample(observed_at: DateTime<Utc>, entry: &Value) -> Result<StationSample> {
    let station = required(entry, "", "station")?;
    let info = parse_station_info(observed_at, station)?;
    let record = parse_station_record(observed_at, entry)?;
    StationSample::new(info, record)
}

/// Parses a whole snapshot, stopping at the first malformed entry.
///
/// The failing entry is logged in full and its index is prefixed to the
/// field path of the returned error, e.g. `[12].station.type`.
pub fn parse_batch(observed_at: DateTime<Utc>, entries: &[Value]) -> Result<Vec<StationSample>> {
    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            parse_sample(observed_at, entry).map_err(|err| {
                warn!("Input station entry #{} rejected: {}", index, entry);
                match err {
                    IngestError::Validation { field, value, reason } => IngestError::Validation {
                        field: format!("[{}].{}", index, field),
                        value,
                        reason,
                    },
                    other => other,
                }
            })
        })
        .collect()
}

// ============================================================================
// Re-serialization
// ============================================================================

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

/// Renders a sample back into the feed's JSON shape.
///
/// Used to log duplicate groups the way the upstream sent them. `dueDate`
/// is rendered as fractional epoch seconds.
pub fn to_feed_value(sample: &StationSample) -> Value {
    let info = sample.info();
    let record = sample.record();
    let due_date = info
        .due_date
        .map(|due| Value::from(due.timestamp_millis() as f64 / 1000.0))
        .unwrap_or(Value::Null);

    json!({
        "station": {
            "state": info.operational_state,
            "name": info.name,
            "type": yes_no(info.is_electric_capable),
            "code": info.station_id.to_string(),
            "dueDate": due_date,
            "gps": {
                "latitude": info.location.latitude,
                "longitude": info.location.longitude,
            },
        },
        "overflow": yes_no(record.overflow_enabled),
        "maxBikeOverflow": record.max_overflow_bikes,
        "nbEBikeOverflow": record.overflow_ebikes,
        "kioskState": yes_no(record.kiosk_online),
        "densityLevel": record.density_level,
        "nbEbike": record.ebikes_available,
        "nbFreeDock": record.free_docks,
        "nbDock": record.total_docks,
        "nbBikeOverflow": record.overflow_bikes,
        "nbEDock": record.electric_docks,
        "creditCard": yes_no(record.accepts_credit_card),
        "nbBike": record.bikes_available,
        "nbFreeEDock": record.free_electric_docks,
        "overflowActivation": yes_no(record.overflow_activated),
    })
}

// ============================================================================
// Tests
// ============================================================================
