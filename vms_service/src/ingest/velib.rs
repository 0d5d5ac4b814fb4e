//! Velib Metropole feed client.
//!
//! Retrieves the station map of a bounding box from the public web API used
//! by the velib-metropole.fr map page, and classifies what comes back.
//!
//! Endpoint: https://www.velib-metropole.fr/webapi/map/details
//!
//! A healthy reply is a JSON list of station entries (see `parse`). When the
//! backend is struggling it answers `200 OK` with a body such as
//! `{"error":{"code":503,"message":"Service Unavailable"}}` instead.

use std::time::Duration;

use serde_json::Value;

use crate::config::FeedConfig;
use crate::error::{IngestError, Result};
use crate::model::GeoPoint;

pub const DEFAULT_BASE_URL: &str = "https://www.velib-metropole.fr/webapi/map/details";

/// Default top-right corner, covering Paris and the inner suburbs.
pub const DEFAULT_TOP: (f64, f64) = (49.1, 2.7);
/// Default bottom-left corner.
pub const DEFAULT_BOTTOM: (f64, f64) = (48.6, 1.9);
pub const DEFAULT_ZOOM_LEVEL: u32 = 15;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Request
// ============================================================================

/// Area queried from the feed. The bottom-left corner is strictly
/// south-west of the top-right corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    top_right: GeoPoint,
    bottom_left: GeoPoint,
}

impl BoundingBox {
    pub fn new(top_right: GeoPoint, bottom_left: GeoPoint) -> Result<Self> {
        if !bottom_left.is_south_west_of(&top_right) {
            return Err(IngestError::validation(
                "bounding_box",
                format!("{} / {}", bottom_left, top_right),
                "bottom-left corner must be strictly south-west of top-right corner",
            ));
        }
        Ok(Self {
            top_right,
            bottom_left,
        })
    }

    pub fn top_right(&self) -> GeoPoint {
        self.top_right
    }

    pub fn bottom_left(&self) -> GeoPoint {
        self.bottom_left
    }
}

/// Build the map details URL for a bounding box and zoom level.
pub fn build_details_url(base_url: &str, area: &BoundingBox, zoom_level: u32) -> String {
    format!(
        "{}?gpsTopLatitude={}&gpsTopLongitude={}&gpsBotLatitude={}&gpsBotLongitude={}&zoomLevel={}",
        base_url,
        area.top_right.latitude,
        area.top_right.longitude,
        area.bottom_left.latitude,
        area.bottom_left.longitude,
        zoom_level
    )
}

// ============================================================================
// Payload classification
// ============================================================================

fn error_code(error: &Value) -> Option<i64> {
    match error.get("code")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Classify a response body.
///
/// - blank body or empty list → `EmptyReply`
/// - not JSON → `MalformedResponse`
/// - `{"error": {"code": .., ...}}` → `Api` with the reported code
/// - an `error` object without a usable code, or an object without `error`
///   → `MalformedResponse`
/// - a non-empty list → the raw entries
pub fn parse_payload(body: &str) -> Result<Vec<Value>> {
    if body.trim().is_empty() {
        return Err(IngestError::EmptyReply);
    }

    let json: Value = serde_json::from_str(body).map_err(|e| {
        tracing::debug!("Invalid JSON: {}", body);
        IngestError::MalformedResponse(format!("Could not parse json data: {}", e))
    })?;

    let error = match json {
        Value::Array(entries) if entries.is_empty() => return Err(IngestError::EmptyReply),
        Value::Array(entries) => return Ok(entries),
        Value::Object(ref map) => map.get("error").cloned(),
        ref other => {
            return Err(IngestError::MalformedResponse(format!(
                "Expected a list of stations, got: {}",
                other
            )));
        }
    };

    match error {
        Some(error) => match error_code(&error) {
            Some(code) => Err(IngestError::Api {
                code,
                content: error.to_string(),
            }),
            None => Err(IngestError::MalformedResponse(format!(
                "API problem with incorrectly-structured error: {}",
                error
            ))),
        },
        None => Err(IngestError::MalformedResponse(format!(
            "API problem without error: {}",
            json
        ))),
    }
}

// ============================================================================
// Client
// ============================================================================

/// Anything that can produce the raw entries of one feed snapshot.
pub trait Feed {
    /// Fetch and classify one snapshot worth of entries.
    fn fetch(&self) -> Result<Vec<Value>>;

    /// Where the entries come from, for logs.
    fn describe(&self) -> String;
}

/// Blocking HTTP client for the map details endpoint.
pub struct VelibClient {
    http: reqwest::blocking::Client,
    url: String,
}

impl VelibClient {
    /// Create a client from the `[feed]` configuration section.
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let area = config.bounding_box()?;
        let url = build_details_url(&config.base_url, &area, config.zoom_level);

        let http = reqwest::blocking::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IngestError::config(format!("Could not build HTTP client: {}", e)))?;

        Ok(Self { http, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Perform the GET and return the body of a 2xx response.
    pub fn fetch_body(&self) -> Result<String> {
        let response = self
            .http
            .get(&self.url)
            .header("Accept", "application/json")
            .send()
            .map_err(|e| IngestError::Network(format!("Could not download API data: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Http(status.as_u16()));
        }

        response
            .text()
            .map_err(|e| IngestError::Network(format!("Could not read API reply: {}", e)))
    }
}

impl Feed for VelibClient {
    fn fetch(&self) -> Result<Vec<Value>> {
        let body = self.fetch_body()?;
        parse_payload(&body)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

// ============================================================================
// Tests
// ============================================================================
