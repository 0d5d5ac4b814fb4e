//! Velib Metropole station history.
//!
//! Polls the Velib map feed (or replays captured replies), validates every
//! station entry, and appends to PostgreSQL only what changed since the
//! last stored observation of each station.

pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod reachability;
pub mod replay;
pub mod resolve;
pub mod store;

pub use error::{IngestError, Result};
