//! Local JSON snapshot loading.
//!
//! The engine stands in for the sync collaborator: it reads an array of
//! campaign objects from disk and hands it to the store in one `set_data`.

use std::path::Path;

use tracing::info;

use campaign_store::parse_records;
use campaign_types::Record;

use crate::error::EngineError;

/// Read the records in the snapshot at `path`.
///
/// Returns `Ok(None)` when the file does not exist.
///
/// # Errors
///
/// Returns [`EngineError::SnapshotIo`] if the file cannot be read,
/// [`EngineError::SnapshotJson`] if it is not JSON, and
/// [`EngineError::Snapshot`] if the JSON is not an array.
pub fn load_snapshot(path: &Path) -> Result<Option<Vec<Record>>, EngineError> {
    if !path.exists() {
        info!(path = %path.display(), "snapshot not found, starting empty");
        return Ok(None);
    }
    let path_display = path.display().to_string();
    let contents = std::fs::read_to_string(path).map_err(|source| EngineError::SnapshotIo {
        path: path_display.clone(),
        source,
    })?;
    let value: serde_json::Value =
        serde_json::from_str(&contents).map_err(|source| EngineError::SnapshotJson {
            path: path_display.clone(),
            source,
        })?;
    let records = parse_records(value)?;
    info!(path = %path_display, records = records.len(), "snapshot read");
    Ok(Some(records))
}
