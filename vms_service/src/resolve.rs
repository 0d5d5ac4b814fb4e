//! Duplicate station resolution within one snapshot.
//!
//! The feed occasionally lists the same station code twice in a single
//! reply, typically while a station moves between "Operative" and
//! "Work in progress":
//!
//! ```text
//! 10006  Operative         "Petites Ecuries - Faubourg Saint-Denis"  nbBike 8
//! 10006  Work in progress  "Petites Ecuries - Faub. Saint-Denis"     nbBike 0
//! ```
//!
//! History rows are keyed by `(observed_at, station_id)`, so at most one of
//! them can be kept. Which one is a policy decision, expressed by the
//! `TieBreak` trait; `PreferOperative` is the rule used by default.

use std::collections::BTreeMap;

use tracing::warn;

use crate::error::{IngestError, Result};
use crate::ingest::parse::to_feed_value;
use crate::model::{STATE_OPERATIVE, StationSample};

// ---------------------------------------------------------------------------
// Tie-break policies
// ---------------------------------------------------------------------------

/// Picks the sample to keep among several sharing one station code.
///
/// Returning `Ok(None)` drops the station from this snapshot altogether.
pub trait TieBreak {
    fn pick(&self, station_id: i64, candidates: Vec<StationSample>) -> Result<Option<StationSample>>;
}

/// Keep the single "Operative" entry.
///
/// More than one operative entry is ambiguous and fails the batch; no
/// operative entry at all drops the station for this snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferOperative;

impl TieBreak for PreferOperative {
    fn pick(&self, station_id: i64, candidates: Vec<StationSample>) -> Result<Option<StationSample>> {
        let mut operative: Vec<StationSample> = candidates
            .into_iter()
            .filter(|sample| sample.info().operational_state == STATE_OPERATIVE)
            .collect();

        match operative.len() {
            0 => {
                warn!("No operative entry among duplicates of station {}, dropping it", station_id);
                Ok(None)
            }
            1 => Ok(operative.pop()),
            _ => Err(IngestError::DataConflict {
                station_id,
                candidates: operative.iter().map(|s| to_feed_value(s).to_string()).collect(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Output of a resolution pass: one sample per station code at most.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Samples ordered by station code.
    pub samples: Vec<StationSample>,
    /// Entries discarded while resolving duplicate groups.
    pub dropped: usize,
}

pub struct DuplicateResolver {
    tie_break: Box<dyn TieBreak>,
}

impl Default for DuplicateResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DuplicateResolver {
    /// Resolver using the `PreferOperative` policy.
    pub fn new() -> Self {
        Self::with_tie_break(PreferOperative)
    }

    pub fn with_tie_break(tie_break: impl TieBreak + 'static) -> Self {
        Self {
            tie_break: Box::new(tie_break),
        }
    }

    /// Group samples by station code and reduce every group to one sample.
    ///
    /// Groups of one pass through untouched. Larger groups are logged in
    /// full at warning level before the tie-break runs.
    pub fn resolve(&self, samples: Vec<StationSample>) -> Result<Resolution> {
        let total = samples.len();
        let mut groups: BTreeMap<i64, Vec<StationSample>> = BTreeMap::new();
        for sample in samples {
            groups.entry(sample.station_id()).or_default().push(sample);
        }

        let mut resolved = Vec::with_capacity(groups.len());
        for (station_id, mut group) in groups {
            if group.len() == 1 {
                resolved.extend(group.pop());
                continue;
            }

            let rendered: Vec<String> = group.iter().map(|s| to_feed_value(s).to_string()).collect();
            warn!(
                "Duplicate samples found in input for station {}: [{}]",
                station_id,
                rendered.join(", ")
            );

            if let Some(kept) = self.tie_break.pick(station_id, group)? {
                resolved.push(kept);
            }
        }

        Ok(Resolution {
            dropped: total - resolved.len(),
            samples: resolved,
        })
    }
}
