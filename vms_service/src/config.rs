//! TOML configuration for the `vms` binary.
//!
//! ```toml
//! [database]
//! url = "postgres://vms@localhost/vms"
//!
//! [feed]
//! top_latitude = 49.1
//! top_longitude = 2.7
//! bottom_latitude = 48.6
//! bottom_longitude = 1.9
//!
//! [logging]
//! console_level = "warn"
//! directory = "logs"
//! ```
//!
//! Every section and field may be omitted. `DATABASE_URL` (from the
//! environment or a `.env` file) takes precedence over `database.url`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::ingest::velib::{
    BoundingBox, DEFAULT_BASE_URL, DEFAULT_BOTTOM, DEFAULT_TIMEOUT_SECS, DEFAULT_TOP,
    DEFAULT_ZOOM_LEVEL,
};
use crate::logging::{parse_level, parse_rotation};
use crate::model::GeoPoint;

pub const DEFAULT_CONFIG_PATH: &str = "vms.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: DatabaseConfig,
    pub feed: FeedConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeedConfig {
    pub base_url: String,
    pub top_latitude: f64,
    pub top_longitude: f64,
    pub bottom_latitude: f64,
    pub bottom_longitude: f64,
    pub zoom_level: u32,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            top_latitude: DEFAULT_TOP.0,
            top_longitude: DEFAULT_TOP.1,
            bottom_latitude: DEFAULT_BOTTOM.0,
            bottom_longitude: DEFAULT_BOTTOM.1,
            zoom_level: DEFAULT_ZOOM_LEVEL,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: format!("vms/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub console_level: String,
    /// Log file directory; console only when absent.
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
    /// minutely, hourly, daily or never
    pub rotation: String,
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            console_level: "warn".to_string(),
            directory: None,
            file_prefix: "vms".to_string(),
            rotation: "daily".to_string(),
            max_files: 7,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Read and validate a configuration file. A missing file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            IngestError::config(format!("Could not read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)
            .map_err(|e| IngestError::config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot: coordinates, levels, rotation names.
    pub fn validate(&self) -> Result<()> {
        self.feed
            .bounding_box()
            .map_err(|e| IngestError::config(format!("[feed] {}", e)))?;
        if self.feed.zoom_level == 0 {
            return Err(IngestError::config("[feed] zoom_level must be positive"));
        }
        if self.feed.timeout_secs == 0 {
            return Err(IngestError::config("[feed] timeout_secs must be positive"));
        }
        parse_level(&self.logging.console_level)?;
        parse_rotation(&self.logging.rotation)?;
        if self.logging.max_files == 0 {
            return Err(IngestError::config("[logging] max_files must be positive"));
        }
        Ok(())
    }
}

impl DatabaseConfig {
    /// Connection string: `DATABASE_URL` first, then `database.url`.
    pub fn resolve_url(&self) -> Result<String> {
        dotenv::dotenv().ok();
        if let Ok(url) = std::env::var("DATABASE_URL") {
            debug!("Using DATABASE_URL from the environment");
            return Ok(url);
        }
        self.url.clone().ok_or_else(|| {
            IngestError::config("no database configured: set DATABASE_URL or [database] url")
        })
    }
}

impl FeedConfig {
    pub fn bounding_box(&self) -> Result<BoundingBox> {
        BoundingBox::new(
            GeoPoint::new(self.top_latitude, self.top_longitude)?,
            GeoPoint::new(self.bottom_latitude, self.bottom_longitude)?,
        )
    }
}
