//! Error taxonomy for snapshot ingestion.
//!
//! Feed failures are kept distinct so the caller (and the scheduler that
//! runs `vms` periodically) can tell transient upstream trouble from bad
//! data or local bugs.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// A feed field is missing or cannot be converted.
    #[error("Validation error at '{field}' (value: {value}): {reason}")]
    Validation {
        field: String,
        value: String,
        reason: String,
    },

    /// Several entries of one snapshot claim the same station and the
    /// tie-break policy could not pick one.
    #[error("Unresolvable duplicate entries for station {station_id}: {candidates:?}")]
    DataConflict {
        station_id: i64,
        candidates: Vec<String>,
    },

    /// An observation older than the latest stored one for its station.
    #[error(
        "Temporal order violation for station {station_id}: incoming {incoming} is older than stored {stored}"
    )]
    TemporalOrder {
        station_id: i64,
        stored: DateTime<Utc>,
        incoming: DateTime<Utc>,
    },

    /// Transport, connection or timeout failure while talking to the feed.
    #[error("Network error: {0}")]
    Network(String),

    /// Non-2xx HTTP response from the feed.
    #[error("HTTP error: {0}")]
    Http(u16),

    /// The body could not be understood as a feed reply.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The feed answered with nothing to ingest.
    #[error("Empty reply received")]
    EmptyReply,

    /// The feed answered with a structured `{"error": {...}}` object.
    #[error("API returned error code {code}: {content}")]
    Api { code: i64, content: String },

    /// PostgreSQL failure.
    #[error("Database error: {0}")]
    Database(#[from] postgres::Error),

    /// Storage constraint failure outside PostgreSQL (in-memory backend).
    #[error("Storage error: {0}")]
    Storage(String),

    /// A captured payload file could not be loaded.
    #[error("Replay error for {path:?}: {message}")]
    Replay { path: PathBuf, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    /// Create a validation error for a feed field.
    pub fn validation(
        field: impl Into<String>,
        value: impl fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        Self::Validation {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a replay error for a payload file.
    pub fn replay(path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        Self::Replay {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Upstream conditions known to clear up by themselves: gateway errors,
    /// the API's own "Service Unavailable" and empty replies.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(code) => matches!(code, 502 | 503),
            Self::Api { code, .. } => *code == 503,
            Self::EmptyReply => true,
            _ => false,
        }
    }

    /// Errors caused by the content of one snapshot rather than by the
    /// local environment. A directory run may skip the offending file.
    pub fn is_payload_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::DataConflict { .. }
                | Self::MalformedResponse(_)
                | Self::EmptyReply
                | Self::Api { .. }
        )
    }
}
