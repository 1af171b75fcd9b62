//! Envelope fields every transport record carries.

use crate::error::{ProtocolError, ProtocolResult};
use crate::list::{format_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Field holding the record ID.
pub const FIELD_ID: &str = "id";
/// Field holding the creation time.
pub const FIELD_CREATED_AT: &str = "created_at";
/// Field holding the last modification time.
pub const FIELD_UPDATED_AT: &str = "updated_at";
/// Field set to `true` on a deletion marker.
pub const FIELD_DELETED: &str = "deleted";

/// The envelope of a transport record.
///
/// Whatever an entity's own fields look like on the wire, its JSON object
/// carries these three so the server can index it and the engine can
/// match it to a local record without knowing the entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMeta {
    /// Record ID.
    pub id: Uuid,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl RecordMeta {
    /// Reads the envelope from a JSON object.
    pub fn from_value(value: &Value) -> ProtocolResult<Self> {
        let object = value.as_object().ok_or(ProtocolError::InvalidField {
            field: FIELD_ID,
            message: "record must be a JSON object".into(),
        })?;

        Ok(Self {
            id: id_field(object)?,
            created_at: timestamp_field(object, FIELD_CREATED_AT)?,
            updated_at: timestamp_field(object, FIELD_UPDATED_AT)?,
        })
    }

    /// Writes the envelope into a JSON object, replacing existing fields.
    pub fn write_into(&self, value: &mut Value) -> ProtocolResult<()> {
        let object = value.as_object_mut().ok_or(ProtocolError::InvalidField {
            field: FIELD_ID,
            message: "record must be a JSON object".into(),
        })?;
        object.insert(FIELD_ID.into(), Value::String(self.id.to_string()));
        object.insert(
            FIELD_CREATED_AT.into(),
            Value::String(format_timestamp(&self.created_at)),
        );
        object.insert(
            FIELD_UPDATED_AT.into(),
            Value::String(format_timestamp(&self.updated_at)),
        );
        Ok(())
    }
}

/// A deletion as it appears in a list page.
///
/// Deleted records keep their place in the change feed so devices holding
/// a copy learn about the deletion. A marker carries only the ID and the
/// server time of the deletion, which sits in `updated_at` so markers and
/// records share one ordering.
///
/// ```json
/// {"id": "6f1c...", "updated_at": "2026-03-01T10:00:00.000001Z", "deleted": true}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionMarker {
    /// ID of the deleted record.
    pub id: Uuid,
    /// Server time of the deletion.
    pub deleted_at: DateTime<Utc>,
}

impl DeletionMarker {
    /// Encodes the marker as a JSON object.
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert(FIELD_ID.into(), Value::String(self.id.to_string()));
        object.insert(
            FIELD_UPDATED_AT.into(),
            Value::String(format_timestamp(&self.deleted_at)),
        );
        object.insert(FIELD_DELETED.into(), Value::Bool(true));
        Value::Object(object)
    }

    /// Reads a marker. Anything without `"deleted": true` is not a marker
    /// and gives `Ok(None)`.
    pub fn from_value(value: &Value) -> ProtocolResult<Option<Self>> {
        let Some(object) = value.as_object() else {
            return Ok(None);
        };
        if object.get(FIELD_DELETED).and_then(Value::as_bool) != Some(true) {
            return Ok(None);
        }
        Ok(Some(Self {
            id: id_field(object)?,
            deleted_at: timestamp_field(object, FIELD_UPDATED_AT)?,
        }))
    }
}

fn id_field(object: &Map<String, Value>) -> ProtocolResult<Uuid> {
    Uuid::parse_str(text_field(object, FIELD_ID)?).map_err(|e| ProtocolError::InvalidField {
        field: FIELD_ID,
        message: e.to_string(),
    })
}

fn text_field<'a>(object: &'a Map<String, Value>, field: &'static str) -> ProtocolResult<&'a str> {
    object
        .get(field)
        .ok_or(ProtocolError::MissingField(field))?
        .as_str()
        .ok_or(ProtocolError::InvalidField {
            field,
            message: "expected a string".into(),
        })
}

fn timestamp_field(object: &Map<String, Value>, field: &'static str) -> ProtocolResult<DateTime<Utc>> {
    parse_timestamp(text_field(object, field)?).map_err(|e| ProtocolError::InvalidField {
        field,
        message: e.to_string(),
    })
}
