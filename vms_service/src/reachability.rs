//! Upstream reachability audit log.
//!
//! One `api_reachability_stat` row per live fetch attempt, independent of
//! station content. Bookkeeping only: a failure to write the row is logged
//! and swallowed so it can never abort an otherwise good ingestion run.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::model::ReachabilityStat;
use crate::store::Database;

/// Append one audit row. Returns whether the row was written.
pub fn record<D: Database>(
    db: &mut D,
    observed_at: DateTime<Utc>,
    succeeded: bool,
    detail: Option<String>,
) -> bool {
    let stat = ReachabilityStat {
        observed_at,
        succeeded,
        detail,
    };
    debug!("Saving api stat: {} {:?}", stat.succeeded, stat.detail);

    match db.atomic(|store| store.append_reachability(&stat)) {
        Ok(()) => true,
        Err(e) => {
            warn!(
                "Could not save api statistics ({} {}) due to {}",
                stat.observed_at, stat.succeeded, e
            );
            false
        }
    }
}
