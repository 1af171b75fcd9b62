//! Local store trait definition.

use crate::error::StorageResult;
use crate::record::SyncRecord;
use uuid::Uuid;

/// A durable table of sync records for one entity type.
///
/// The sync engine treats the store as an external collaborator: it only
/// relies on the operations below and never on how records are laid out.
///
/// # Invariants
///
/// - `get` returns exactly the record most recently passed to `upsert`
///   for that ID, or `None` after `remove`
/// - `list_dirty` returns every record whose status is not `Synced`
/// - Implementations must be `Send + Sync`; callers serialize
///   read-modify-write sequences on a single record themselves
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For tests and ephemeral sessions
/// - [`super::FileStore`] - CBOR file per table
pub trait LocalStore<T>: Send + Sync {
    /// Looks up a record by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage cannot be read.
    fn get(&self, id: Uuid) -> StorageResult<Option<SyncRecord<T>>>;

    /// Returns every record in the table, tombstones included.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage cannot be read.
    fn list_all(&self) -> StorageResult<Vec<SyncRecord<T>>>;

    /// Returns every record whose status is not `Synced`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage cannot be read.
    fn list_dirty(&self) -> StorageResult<Vec<SyncRecord<T>>> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(SyncRecord::is_dirty)
            .collect())
    }

    /// Inserts or replaces a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be made durable.
    fn upsert(&self, record: SyncRecord<T>) -> StorageResult<()>;

    /// Physically removes a record.
    ///
    /// Returns true if a record was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be made durable.
    fn remove(&self, id: Uuid) -> StorageResult<bool>;
}
