//! Mapping between local entities and transport records.

use crate::error::{SyncError, SyncResult};
use larder_storage::SyncRecord;
use larder_sync_protocol::RecordMeta;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;

/// Binds one entity type to one remote resource.
///
/// The engine is generic over this trait; each of the app's entity types
/// supplies one implementation. Implementations are stateless.
///
/// # Example
///
/// ```rust
/// use larder_sync_engine::{decode_record, encode_record, EntityAdapter, SyncResult};
/// use larder_storage::SyncRecord;
/// use serde::{Deserialize, Serialize};
/// use serde_json::Value;
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct Pantry {
///     name: String,
/// }
///
/// struct PantryAdapter;
///
/// impl EntityAdapter for PantryAdapter {
///     type Entity = Pantry;
///     const RESOURCE: &'static str = "pantries";
///
///     fn to_remote(record: &SyncRecord<Pantry>) -> SyncResult<Value> {
///         encode_record(record, &record.body)
///     }
///
///     fn from_remote(value: Value) -> SyncResult<SyncRecord<Pantry>> {
///         let (meta, body) = decode_record::<Pantry>(value)?;
///         Ok(SyncRecord::synced(meta.id, meta.created_at, meta.updated_at, body))
///     }
/// }
/// ```
pub trait EntityAdapter: Send + Sync + 'static {
    /// The local entity type.
    type Entity: Clone + PartialEq + Debug + Send + Sync + 'static;

    /// Collection name on the backend, without a leading slash.
    const RESOURCE: &'static str;

    /// Maps a local record to its transport representation.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Protocol`] if the entity cannot be encoded.
    fn to_remote(record: &SyncRecord<Self::Entity>) -> SyncResult<Value>;

    /// Maps a canonical transport record to a `Synced` local record.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Protocol`] if the record is malformed.
    fn from_remote(value: Value) -> SyncResult<SyncRecord<Self::Entity>>;

    /// Copies server-owned fields from `canonical` into `local`.
    ///
    /// Called when a push completes but the record changed locally while
    /// the request was in flight: the local edit is kept, and only fields
    /// the server computes are taken from the response. The default keeps
    /// `local` untouched.
    fn absorb_server_fields(local: &mut Self::Entity, canonical: &Self::Entity) {
        let _ = (local, canonical);
    }
}

/// Encodes `wire` as a JSON object and writes the record envelope into it.
///
/// # Errors
///
/// Returns [`SyncError::Protocol`] if `wire` does not serialize to an
/// object.
pub fn encode_record<T, W>(record: &SyncRecord<T>, wire: &W) -> SyncResult<Value>
where
    W: Serialize + ?Sized,
{
    let mut value = serde_json::to_value(wire)
        .map_err(|e| SyncError::Protocol(format!("failed to encode record: {e}")))?;
    RecordMeta {
        id: record.id,
        created_at: record.created_at,
        updated_at: record.updated_at,
    }
    .write_into(&mut value)?;
    Ok(value)
}

/// Splits a transport record into its envelope and entity fields.
///
/// Unknown fields are ignored by the usual serde rules.
///
/// # Errors
///
/// Returns [`SyncError::Protocol`] if the envelope or fields are invalid.
pub fn decode_record<W: DeserializeOwned>(value: Value) -> SyncResult<(RecordMeta, W)> {
    let meta = RecordMeta::from_value(&value)?;
    let wire = serde_json::from_value(value)
        .map_err(|e| SyncError::Protocol(format!("record {}: {e}", meta.id)))?;
    Ok((meta, wire))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Note, NoteAdapter};
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn encode_writes_envelope() {
        let record = SyncRecord::new_local(Note::new("buy saffron"), Utc::now());
        let value = NoteAdapter::to_remote(&record).unwrap();

        assert_eq!(value["id"], record.id.to_string());
        assert_eq!(value["text"], "buy saffron");
        assert!(value.get("status").is_none());
        assert!(value.get("local_revision").is_none());
    }

    #[test]
    fn decode_builds_synced_record() {
        let record = SyncRecord::new_local(Note::new("x"), Utc::now());
        let mut value = NoteAdapter::to_remote(&record).unwrap();
        value["server_note"] = json!("ignored");

        let decoded = NoteAdapter::from_remote(value).unwrap();
        assert_eq!(decoded.id, record.id);
        assert_eq!(decoded.body, record.body);
        assert_eq!(decoded.status, larder_storage::SyncStatus::Synced);
    }

    #[test]
    fn decode_rejects_malformed() {
        assert!(matches!(
            NoteAdapter::from_remote(json!({"text": "no envelope"})),
            Err(SyncError::Protocol(_))
        ));

        let record = SyncRecord::new_local(Note::new("x"), Utc::now());
        let mut value = NoteAdapter::to_remote(&record).unwrap();
        value["pinned"] = json!("yes");
        assert!(matches!(
            NoteAdapter::from_remote(value),
            Err(SyncError::Protocol(_))
        ));
    }

    #[test]
    fn encode_rejects_non_objects() {
        let record = SyncRecord::new_local(3_u32, Utc::now());
        assert!(encode_record(&record, &record.body).is_err());
    }
}
