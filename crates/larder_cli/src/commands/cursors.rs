//! Cursor listing and reset.

use super::{require_store, resource_name, CliResult, Format};
use chrono::{DateTime, Utc};
use larder_entities::RESOURCES;
use larder_storage::{epoch, CursorStore, FileCursorStore};
use serde::Serialize;
use std::path::Path;

/// Stored pull cursor for one resource.
#[derive(Debug, Serialize)]
pub struct CursorEntry {
    /// Resource name.
    pub resource: &'static str,
    /// Server time of the last completed pull.
    pub cursor: DateTime<Utc>,
    /// False until the first pull completes.
    pub pulled: bool,
}

/// Reads the cursor of every resource.
///
/// # Errors
///
/// Fails if `path` is not a directory, or the cursor file is locked or
/// corrupt.
pub fn collect(path: &Path) -> CliResult<Vec<CursorEntry>> {
    require_store(path)?;
    let store = FileCursorStore::open(path)?;
    RESOURCES
        .into_iter()
        .map(|resource| -> CliResult<CursorEntry> {
            let cursor = store.load(resource)?;
            Ok(CursorEntry {
                resource,
                cursor,
                pulled: cursor > epoch(),
            })
        })
        .collect()
}

/// Runs the cursors command.
pub fn run(path: &Path, format: Format) -> CliResult<()> {
    let entries = collect(path)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        Format::Text => {
            for entry in &entries {
                if entry.pulled {
                    println!("{:<16} {}", entry.resource, entry.cursor.to_rfc3339());
                } else {
                    println!("{:<16} (never pulled)", entry.resource);
                }
            }
        }
    }
    Ok(())
}

/// Runs the reset-cursor command.
///
/// The next cycle for `resource` pulls everything again; merging is
/// idempotent, so records already held are left as they are.
pub fn reset(path: &Path, resource: &str) -> CliResult<()> {
    let resource = resource_name(resource)?;
    require_store(path)?;
    let store = FileCursorStore::open(path)?;
    let previous = store.load(resource)?;
    store.reset(resource)?;
    tracing::info!(resource, previous = %previous, "cursor reset");
    println!("{resource}: cursor reset to {}", epoch().to_rfc3339());
    Ok(())
}
