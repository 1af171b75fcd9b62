//! Inspect command implementation.

use super::{require_store, CliResult, Format};
use chrono::{DateTime, Utc};
use larder_entities::{InventoryItem, MealPlan, Recipe, ShoppingList, RESOURCES};
use larder_storage::{FileStore, LocalStore, SyncStatus};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store directory.
    pub path: String,
    /// One entry per synced resource.
    pub tables: Vec<TableStats>,
}

impl InspectResult {
    /// Dirty records across all tables.
    pub fn dirty_count(&self) -> usize {
        self.tables.iter().map(|t| t.dirty.len()).sum()
    }
}

/// Statistics for a single table.
#[derive(Debug, Serialize)]
pub struct TableStats {
    /// Resource name.
    pub resource: &'static str,
    /// Records per status, including zero counts.
    pub counts: BTreeMap<&'static str, usize>,
    /// Records with unacknowledged local changes.
    pub dirty: Vec<DirtyRecord>,
}

impl TableStats {
    /// Total records in the table, tombstones included.
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

/// A record awaiting push.
#[derive(Debug, Serialize)]
pub struct DirtyRecord {
    /// Record ID.
    pub id: Uuid,
    /// Pending status.
    pub status: SyncStatus,
    /// Local mutation counter.
    pub local_revision: u64,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Refused by the server and not pushed again until edited.
    pub rejected: bool,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: Format) -> CliResult<()> {
    let result = collect(path)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }
    Ok(())
}

/// Reads every table under `path`.
///
/// # Errors
///
/// Fails if `path` is not a directory, or a table is locked or corrupt.
pub fn collect(path: &Path) -> CliResult<InspectResult> {
    require_store(path)?;
    let [inventory, recipes, meal_plans, shopping_lists] = RESOURCES;
    let tables = vec![
        table_stats::<InventoryItem>(path, inventory)?,
        table_stats::<Recipe>(path, recipes)?,
        table_stats::<MealPlan>(path, meal_plans)?,
        table_stats::<ShoppingList>(path, shopping_lists)?,
    ];
    Ok(InspectResult {
        path: path.display().to_string(),
        tables,
    })
}

fn table_stats<T>(path: &Path, resource: &'static str) -> CliResult<TableStats>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    let store = FileStore::<T>::open(path, resource)?;
    let records = store.list_all()?;
    tracing::debug!(resource, records = records.len(), "read table");

    let mut counts: BTreeMap<&'static str, usize> =
        SyncStatus::ALL.iter().map(|s| (s.as_str(), 0)).collect();
    let mut dirty = Vec::new();
    for record in records {
        *counts.entry(record.status.as_str()).or_default() += 1;
        if record.is_dirty() {
            dirty.push(DirtyRecord {
                id: record.id,
                status: record.status,
                local_revision: record.local_revision,
                updated_at: record.updated_at,
                rejected: record.is_rejected(),
            });
        }
    }
    dirty.sort_by_key(|d| d.updated_at);

    Ok(TableStats {
        resource,
        counts,
        dirty,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Larder Store Inspection");
    println!("=======================");
    println!();
    println!("Path: {}", result.path);

    for table in &result.tables {
        println!();
        println!("{} ({} records)", table.resource, table.total());
        for status in SyncStatus::ALL {
            println!(
                "  {:<16} {}",
                status.as_str(),
                table.counts.get(status.as_str()).copied().unwrap_or(0)
            );
        }
        for record in &table.dirty {
            println!(
                "  * {} {} rev {} at {}{}",
                record.id,
                record.status,
                record.local_revision,
                record.updated_at.to_rfc3339(),
                if record.rejected { " (rejected)" } else { "" }
            );
        }
    }

    println!();
    println!("Dirty records: {}", result.dirty_count());
}
