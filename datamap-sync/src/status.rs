//! Run status record, published next to the tiles after every upload.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use datamap_core::RunSummary;

use crate::error::SyncError;
use crate::store::{ObjectMeta, ObjectStore};

/// Object name of the status record, relative to the tile prefix.
pub const STATUS_FILE: &str = "data.json";

#[derive(Serialize)]
struct StatusRecord<'a> {
    updated: String,
    #[serde(flatten)]
    summary: &'a RunSummary,
}

/// Serialize `summary` with an `updated` timestamp.
pub fn status_json(summary: &RunSummary, now: DateTime<Utc>) -> Result<Vec<u8>, SyncError> {
    let record = StatusRecord {
        updated: now.to_rfc3339_opts(SecondsFormat::Micros, false),
        summary,
    };
    Ok(serde_json::to_vec(&record)?)
}

/// Write the status record to `<prefix>data.json`.
pub fn upload_status_file(
    store: &dyn ObjectStore,
    prefix: &str,
    summary: &RunSummary,
    now: DateTime<Utc>,
) -> Result<(), SyncError> {
    let key = format!("{prefix}{STATUS_FILE}");
    store.put_object(&key, status_json(summary, now)?, ObjectMeta::JSON)?;
    tracing::debug!(bucket = store.bucket(), key = %key, "uploaded status file");
    Ok(())
}
