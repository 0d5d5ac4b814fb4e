//! Getting station entries out of the Velib feed.
//!
//! Submodules:
//! - `velib`: request building, fetch and payload classification.
//! - `parse`: entry validation into `StationSample`s.

pub mod parse;
pub mod velib;

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;

use crate::error::Result;

/// One batch of raw feed entries sharing a single observation time.
///
/// The timestamp is truncated to whole seconds on construction so live and
/// replayed snapshots key their rows the same way.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub observed_at: DateTime<Utc>,
    pub entries: Vec<Value>,
}

impl Snapshot {
    pub fn new(observed_at: DateTime<Utc>, entries: Vec<Value>) -> Self {
        Self {
            observed_at: observed_at.trunc_subsecs(0),
            entries,
        }
    }

    /// Classifies a raw body (see `velib::parse_payload`) into a snapshot.
    pub fn from_payload(observed_at: DateTime<Utc>, body: &str) -> Result<Self> {
        let entries = velib::parse_payload(body)?;
        Ok(Self::new(observed_at, entries))
    }
}
