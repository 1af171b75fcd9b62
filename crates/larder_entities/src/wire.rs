//! Shared transport mapping.

use larder_storage::SyncRecord;
use larder_sync_engine::{decode_record, SyncResult};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Decodes a canonical record whose wire shape is the entity itself.
pub(crate) fn synced_from<T: DeserializeOwned>(value: Value) -> SyncResult<SyncRecord<T>> {
    let (meta, body) = decode_record::<T>(value)?;
    Ok(SyncRecord::synced(meta.id, meta.created_at, meta.updated_at, body))
}
