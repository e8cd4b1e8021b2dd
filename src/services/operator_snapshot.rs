//! Shared snapshot-writing for the operator evaluation CLIs: every harness
//! writes a timestamped JSON file plus a `*-latest.json` pointer so repeated
//! runs can be diffed without guessing a filename.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub fn write_snapshot<T: Serialize>(name: &str, run_at: DateTime<Utc>, payload: &T) -> std::io::Result<PathBuf> {
    let dir = PathBuf::from("operator-snapshots");
    fs::create_dir_all(&dir)?;

    let stamped = dir.join(format!("{name}-{}.json", run_at.format("%Y%m%dT%H%M%SZ")));
    let latest = dir.join(format!("{name}-latest.json"));

    let body = serde_json::to_vec_pretty(payload).expect("snapshot payload must serialize");
    fs::write(&stamped, &body)?;
    fs::write(&latest, &body)?;

    Ok(stamped)
}
