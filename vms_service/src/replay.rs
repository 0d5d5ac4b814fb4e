//! Replay of captured feed payloads.
//!
//! When the live feed is unavailable, or to rebuild history, previously
//! captured replies can be ingested instead. Each capture is one bzip2
//! compressed JSON body whose file name starts with the capture time:
//!
//! ```text
//! 2018-01-11_19-48-01_+0100.json.bz2
//! 2018-01-11_18-48-01_UTC.json.bz2
//! ```
//!
//! The observation time comes from the name, never from the clock.

use std::fs::{DirEntry, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use bzip2::read::BzDecoder;
use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use regex::Regex;
use tracing::info;

use crate::error::{IngestError, Result};

/// Human readable form of the expected file name prefix.
pub const FILE_NAME_PATTERN: &str = "YYYY-MM-DD_HH-mm-ss_<UTC|Z|+HHMM|+HH:MM>";

static FILE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2}_\d{2}-\d{2}-\d{2})_(UTC|Z|[+-]\d{2}:?\d{2})")
        .expect("file name pattern is a valid regex")
});

/// Parse a `+HHMM`, `+HH:MM`, `UTC` or `Z` zone designator.
fn parse_zone(zone: &str) -> Option<FixedOffset> {
    if zone == "UTC" || zone == "Z" {
        return FixedOffset::east_opt(0);
    }
    let sign = if zone.starts_with('-') { -1 } else { 1 };
    let digits: String = zone[1..].chars().filter(|c| *c != ':').collect();
    let hours: i32 = digits.get(0..2)?.parse().ok()?;
    let minutes: i32 = digits.get(2..4)?.parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Extract the capture time from the start of a file name.
pub fn observed_at_from_file_name(file_name: &str) -> Option<DateTime<Utc>> {
    let captures = FILE_NAME_RE.captures(file_name)?;
    let local = NaiveDateTime::parse_from_str(&captures[1], "%Y-%m-%d_%H-%M-%S").ok()?;
    let offset = parse_zone(&captures[2])?;
    local
        .and_local_timezone(offset)
        .single()
        .map(|moment| moment.with_timezone(&Utc))
}

/// Load one capture: its observation time and its decompressed body.
pub fn load_capture(path: &Path) -> Result<(DateTime<Utc>, String)> {
    info!("Processing file {}", path.display());

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::replay(path, "file name is not valid UTF-8"))?;

    let observed_at = observed_at_from_file_name(file_name).ok_or_else(|| {
        IngestError::replay(
            path,
            format!("could not find pattern {} at start of file name", FILE_NAME_PATTERN),
        )
    })?;

    let file = File::open(path).map_err(|e| IngestError::replay(path, format!("could not open: {}", e)))?;
    let mut body = String::new();
    BzDecoder::new(file)
        .read_to_string(&mut body)
        .map_err(|e| IngestError::replay(path, format!("could not bunzip2: {}", e)))?;

    Ok((observed_at, body))
}

/// Regular files of a directory, sorted by file name.
pub fn list_captures(dir: &Path) -> Result<Vec<PathBuf>> {
    info!("Searching directory {}", dir.display());

    let entries = std::fs::read_dir(dir)
        .map_err(|e| IngestError::replay(dir, format!("could not list files: {}", e)))?;

    collect_files(dir, entries)
}

fn collect_files<I>(dir: &Path, entries: I) -> Result<Vec<PathBuf>>
where
    I: IntoIterator<Item = std::io::Result<DirEntry>>,
{
    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| IngestError::replay(dir, format!("could not read directory entry: {}", e)))?
            .path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}
