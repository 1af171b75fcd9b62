//! Pantry, fridge and freezer stock.

use crate::error::{require_quantity, require_text, EntityResult, Validate};
use crate::wire::synced_from;
use chrono::NaiveDate;
use larder_storage::SyncRecord;
use larder_sync_engine::{encode_record, EntityAdapter, SyncResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where an item is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageLocation {
    /// Dry storage.
    #[default]
    Pantry,
    /// Refrigerator.
    Fridge,
    /// Freezer.
    Freezer,
}

/// One stocked item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    /// Display name.
    pub name: String,
    /// Amount on hand, in `unit`.
    pub quantity: f64,
    /// Unit of `quantity`, e.g. `g` or `pcs`.
    pub unit: String,
    /// Storage location.
    #[serde(default)]
    pub location: StorageLocation,
    /// Best-before date, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_on: Option<NaiveDate>,
}

impl InventoryItem {
    /// Creates a pantry item without an expiry date.
    pub fn new(name: impl Into<String>, quantity: f64, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quantity,
            unit: unit.into(),
            location: StorageLocation::Pantry,
            expires_on: None,
        }
    }

    /// Sets the location.
    pub fn in_location(mut self, location: StorageLocation) -> Self {
        self.location = location;
        self
    }

    /// Sets the best-before date.
    pub fn expiring_on(mut self, date: NaiveDate) -> Self {
        self.expires_on = Some(date);
        self
    }

    /// Returns true if the best-before date is before `today`.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expires_on.is_some_and(|d| d < today)
    }

    /// Days left until the best-before date; negative once expired.
    pub fn days_until_expiry(&self, today: NaiveDate) -> Option<i64> {
        self.expires_on.map(|d| (d - today).num_days())
    }

    /// Returns true if nothing is left.
    pub fn is_used_up(&self) -> bool {
        self.quantity <= 0.0
    }
}

impl Validate for InventoryItem {
    fn validate(&self) -> EntityResult<()> {
        require_text("name", &self.name)?;
        require_text("unit", &self.unit)?;
        require_quantity("quantity", self.quantity)
    }
}

/// Adapter for `/inventory`.
pub struct InventoryAdapter;

impl EntityAdapter for InventoryAdapter {
    type Entity = InventoryItem;
    const RESOURCE: &'static str = "inventory";

    fn to_remote(record: &SyncRecord<InventoryItem>) -> SyncResult<Value> {
        encode_record(record, &record.body)
    }

    fn from_remote(value: Value) -> SyncResult<SyncRecord<InventoryItem>> {
        synced_from(value)
    }
}
