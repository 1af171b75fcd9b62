//! Canonical record storage.
//!
//! Every resource is a table of JSON records keyed by ID. The store owns a
//! clock that issues strictly increasing timestamps at microsecond
//! precision, the precision of the wire format, so a list watermark never
//! straddles two writes.
//!
//! Deletions are stamped by the same clock and stay in the change feed as
//! [`DeletionMarker`]s, so a device that pulls after a deletion drops its
//! copy.

use crate::error::{ServerError, ServerResult};
use chrono::{DateTime, Duration, Utc};
use larder_sync_protocol::{DeletionMarker, ListPage, ListQuery, PageToken, RecordMeta};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Field holding the per-record write counter.
pub const FIELD_SERVER_VERSION: &str = "server_version";

/// Checks an incoming record; `Err` carries the reason for a 422.
pub type Validator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// Fills server-owned fields of a record before it is stored.
pub type Decorator = Arc<dyn Fn(&mut Value) + Send + Sync>;

/// Per-resource hooks.
#[derive(Clone, Default)]
pub struct ResourceOptions {
    validator: Option<Validator>,
    decorator: Option<Decorator>,
}

impl ResourceOptions {
    /// Options without hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects records the validator refuses.
    pub fn with_validator(
        mut self,
        validator: impl Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Runs the decorator on every stored record.
    pub fn with_decorator(mut self, decorator: impl Fn(&mut Value) + Send + Sync + 'static) -> Self {
        self.decorator = Some(Arc::new(decorator));
        self
    }
}

struct Stored {
    value: Value,
    position: PageToken,
    version: u64,
}

#[derive(Default)]
struct Table {
    options: ResourceOptions,
    records: HashMap<Uuid, Stored>,
    deleted: HashMap<Uuid, PageToken>,
}

/// Result of a create request.
#[derive(Debug, Clone, PartialEq)]
pub struct Created {
    /// The canonical record.
    pub record: Value,
    /// False if the ID already existed and the create became an update.
    pub inserted: bool,
}

/// In-memory canonical store for every registered resource.
pub struct RecordStore {
    tables: RwLock<HashMap<String, Table>>,
    clock: Mutex<DateTime<Utc>>,
}

impl RecordStore {
    /// Creates an empty store whose clock starts at the epoch.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            clock: Mutex::new(DateTime::<Utc>::UNIX_EPOCH),
        }
    }

    /// Registers a resource. Registering again replaces the hooks and
    /// keeps the records.
    pub fn register(&self, resource: &str, options: ResourceOptions) {
        self.tables
            .write()
            .entry(resource.to_string())
            .or_default()
            .options = options;
    }

    /// Returns true if the resource is registered.
    pub fn has_resource(&self, resource: &str) -> bool {
        self.tables.read().contains_key(resource)
    }

    /// Registered resource names, sorted.
    pub fn resources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// The last timestamp the clock issued.
    pub fn now(&self) -> DateTime<Utc> {
        *self.clock.lock()
    }

    /// Stores a new record.
    ///
    /// The client's `created_at` is kept; `updated_at` and the server
    /// version are assigned here. Creating an ID that already exists
    /// replaces it, so a create retried after a lost response is harmless.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` if the record has no valid envelope
    /// - `Conflict` if the ID was deleted
    /// - `Validation` if the resource's validator refuses it
    pub fn create(&self, resource: &str, record: Value) -> ServerResult<Created> {
        let meta = RecordMeta::from_value(&record)?;
        let mut tables = self.tables.write();
        let table = table_mut(&mut tables, resource)?;

        if table.deleted.contains_key(&meta.id) {
            return Err(ServerError::Conflict(format!(
                "{resource}/{} was deleted",
                meta.id
            )));
        }

        let existing = table.records.get(&meta.id);
        let inserted = existing.is_none();
        let created_at = existing.map_or(meta.created_at, |s| {
            existing_created_at(&s.value, meta.created_at)
        });
        let record = self.write(table, resource, meta.id, created_at, record)?;
        Ok(Created { record, inserted })
    }

    /// Replaces an existing record.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the ID is unknown or deleted
    /// - `InvalidRequest` if the body's ID differs from `id`
    /// - `Validation` if the resource's validator refuses it
    pub fn update(&self, resource: &str, id: Uuid, record: Value) -> ServerResult<Value> {
        let meta = RecordMeta::from_value(&record)?;
        if meta.id != id {
            return Err(ServerError::InvalidRequest(format!(
                "body id {} does not match path id {id}",
                meta.id
            )));
        }

        let mut tables = self.tables.write();
        let table = table_mut(&mut tables, resource)?;
        let created_at = match table.records.get(&id) {
            Some(stored) => existing_created_at(&stored.value, meta.created_at),
            None => {
                return Err(ServerError::NotFound {
                    resource: resource.to_string(),
                    id,
                })
            }
        };
        self.write(table, resource, id, created_at, record)
    }

    /// Deletes a record and remembers the deletion.
    ///
    /// The first deletion of an ID is stamped by the clock and listed as a
    /// marker from then on; repeating it changes nothing. Returns true if
    /// a live record was removed. Deleting an unknown ID is not an error.
    ///
    /// # Errors
    ///
    /// Returns `UnknownResource` for unregistered resources.
    pub fn delete(&self, resource: &str, id: Uuid) -> ServerResult<bool> {
        let mut tables = self.tables.write();
        let table = table_mut(&mut tables, resource)?;
        let existed = table.records.remove(&id).is_some();
        if !table.deleted.contains_key(&id) {
            let position = PageToken {
                updated_at: self.tick(),
                id,
            };
            table.deleted.insert(id, position);
        }
        if existed {
            tracing::debug!(resource, id = %id, "deleted record");
        }
        Ok(existed)
    }

    /// Returns a record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the ID is unknown or deleted.
    pub fn get(&self, resource: &str, id: Uuid) -> ServerResult<Value> {
        let tables = self.tables.read();
        let table = table_ref(&tables, resource)?;
        table
            .records
            .get(&id)
            .map(|s| s.value.clone())
            .ok_or_else(|| ServerError::NotFound {
                resource: resource.to_string(),
                id,
            })
    }

    /// Returns one page of changes after `query.updated_after`.
    ///
    /// A page holds live records and deletion markers, ordered by
    /// (`updated_at`, `id`), at most `max_page_size` of them. `server_time`
    /// is the clock when the listing started.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for a malformed page token.
    pub fn list(&self, resource: &str, query: &ListQuery, max_page_size: u32) -> ServerResult<ListPage> {
        let after = query.cursor.as_deref().map(PageToken::decode).transpose()?;
        let tables = self.tables.read();
        let table = table_ref(&tables, resource)?;
        let server_time = self.now();

        let live = table.records.values().map(|s| (s.position, Some(&s.value)));
        let deleted = table.deleted.values().map(|position| (*position, None));
        let mut matching: Vec<(PageToken, Option<&Value>)> = live
            .chain(deleted)
            .filter(|(position, _)| position.updated_at > query.updated_after)
            .filter(|(position, _)| after.map_or(true, |a| *position > a))
            .collect();
        matching.sort_by_key(|(position, _)| *position);

        let max = max_page_size.max(1);
        let limit = query.limit.unwrap_or(max).clamp(1, max) as usize;
        let next_cursor = (matching.len() > limit).then(|| matching[limit - 1].0.encode());
        matching.truncate(limit);

        let records = matching
            .into_iter()
            .map(|(position, value)| match value {
                Some(value) => value.clone(),
                None => DeletionMarker {
                    id: position.id,
                    deleted_at: position.updated_at,
                }
                .to_value(),
            })
            .collect();

        Ok(ListPage {
            records,
            next_cursor,
            server_time,
        })
    }

    /// Number of live records in a resource.
    pub fn len(&self, resource: &str) -> usize {
        self.tables
            .read()
            .get(resource)
            .map_or(0, |t| t.records.len())
    }

    /// Returns true if a resource holds no live records.
    pub fn is_empty(&self, resource: &str) -> bool {
        self.len(resource) == 0
    }

    /// Returns true if the ID was deleted.
    pub fn is_deleted(&self, resource: &str, id: Uuid) -> bool {
        self.tables
            .read()
            .get(resource)
            .is_some_and(|t| t.deleted.contains_key(&id))
    }

    fn write(
        &self,
        table: &mut Table,
        resource: &str,
        id: Uuid,
        created_at: DateTime<Utc>,
        mut record: Value,
    ) -> ServerResult<Value> {
        if let Some(validate) = &table.options.validator {
            validate(&record).map_err(ServerError::Validation)?;
        }

        let updated_at = self.tick();
        RecordMeta {
            id,
            created_at,
            updated_at,
        }
        .write_into(&mut record)?;

        let version = table.records.get(&id).map_or(0, |s| s.version) + 1;
        if let Some(object) = record.as_object_mut() {
            object.insert(FIELD_SERVER_VERSION.into(), Value::from(version));
        }
        if let Some(decorate) = &table.options.decorator {
            decorate(&mut record);
        }

        tracing::debug!(resource, id = %id, version, "stored record");
        table.records.insert(
            id,
            Stored {
                value: record.clone(),
                position: PageToken { updated_at, id },
                version,
            },
        );
        Ok(record)
    }

    fn tick(&self) -> DateTime<Utc> {
        let mut clock = self.clock.lock();
        let wall = Utc::now();
        let wall = DateTime::from_timestamp_micros(wall.timestamp_micros()).unwrap_or(wall);
        *clock = wall.max(*clock + Duration::microseconds(1));
        *clock
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}

fn table_mut<'a>(tables: &'a mut HashMap<String, Table>, resource: &str) -> ServerResult<&'a mut Table> {
    tables
        .get_mut(resource)
        .ok_or_else(|| ServerError::UnknownResource(resource.to_string()))
}

fn table_ref<'a>(tables: &'a HashMap<String, Table>, resource: &str) -> ServerResult<&'a Table> {
    tables
        .get(resource)
        .ok_or_else(|| ServerError::UnknownResource(resource.to_string()))
}

fn existing_created_at(stored: &Value, fallback: DateTime<Utc>) -> DateTime<Utc> {
    RecordMeta::from_value(stored).map_or(fallback, |m| m.created_at)
}
