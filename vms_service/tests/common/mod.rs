//! Feed fixtures shared by the integration tests.

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};

use bzip2::Compression;
use bzip2::write::BzEncoder;
use serde_json::{Value, json};

/// A feed entry shaped like the live API's, with the given station code,
/// state and bike count.
pub fn entry(code: &str, state: &str, bikes: i64) -> Value {
    json!({
        "station": {
            "state": state,
            "name": "Assas - Luxembourg",
            "type": "yes",
            "code": code,
            "dueDate": 1514761200.0,
            "gps": {"latitude": 48.84373446877937, "longitude": 2.333428381875887}
        },
        "overflow": "no",
        "maxBikeOverflow": 0,
        "nbEBikeOverflow": 0,
        "kioskState": "no",
        "densityLevel": 0,
        "nbEbike": 2,
        "nbFreeDock": 0,
        "nbDock": 0,
        "nbBikeOverflow": 0,
        "nbEDock": 35,
        "creditCard": "no",
        "nbBike": bikes,
        "nbFreeEDock": 25,
        "overflowActivation": "no"
    })
}

/// Write `body` bzip2-compressed to `dir/name`.
pub fn write_capture(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    let file = std::fs::File::create(&path).expect("create capture file");
    let mut encoder = BzEncoder::new(file, Compression::default());
    encoder.write_all(body.as_bytes()).expect("compress capture");
    encoder.finish().expect("finish capture");
    path
}
