//! File-backed local store.

use crate::error::{StorageError, StorageResult};
use crate::record::SyncRecord;
use crate::store::LocalStore;
use fs2::FileExt;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A file-backed local store holding one table.
///
/// The table lives in `<dir>/<table>.cbor` as a CBOR array of records.
/// Every write rewrites the table through a temporary file followed by an
/// atomic rename, so a crash leaves either the old or the new table on
/// disk, never a torn one.
///
/// An advisory lock on `<dir>/<table>.lock` is held for the lifetime of
/// the store; a second open of the same table fails with
/// [`StorageError::Locked`].
///
/// # Example
///
/// ```no_run
/// use larder_storage::{FileStore, LocalStore};
/// use std::path::Path;
///
/// let store: FileStore<String> = FileStore::open(Path::new("data"), "inventory").unwrap();
/// println!("{} dirty records", store.list_dirty().unwrap().len());
/// ```
#[derive(Debug)]
pub struct FileStore<T> {
    dir: PathBuf,
    table: String,
    records: RwLock<BTreeMap<Uuid, SyncRecord<T>>>,
    _lock_file: File,
}

impl<T> FileStore<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    /// Opens or creates the table `table` inside `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - Another handle holds the table lock
    /// - The existing table file cannot be decoded
    pub fn open(dir: &Path, table: &str) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;

        let lock_path = dir.join(format!("{table}.lock"));
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(lock_path));
        }

        let data_path = table_path(dir, table);
        let records: Vec<SyncRecord<T>> = read_cbor(&data_path)?.unwrap_or_default();
        tracing::debug!(table, records = records.len(), "opened file store");

        Ok(Self {
            dir: dir.to_path_buf(),
            table: table.to_string(),
            records: RwLock::new(records.into_iter().map(|r| (r.id, r)).collect()),
            _lock_file: lock_file,
        })
    }

    /// Returns the path of the table file.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        table_path(&self.dir, &self.table)
    }

    /// Returns the table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Applies `change` to a copy of the table, persists it, then publishes it.
    fn commit<R>(
        &self,
        change: impl FnOnce(&mut BTreeMap<Uuid, SyncRecord<T>>) -> R,
    ) -> StorageResult<R> {
        let mut records = self.records.write();
        let mut next = records.clone();
        let out = change(&mut next);
        let rows: Vec<&SyncRecord<T>> = next.values().collect();
        write_cbor_atomic(&self.path(), &rows)?;
        *records = next;
        Ok(out)
    }
}

impl<T> LocalStore<T> for FileStore<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    fn get(&self, id: Uuid) -> StorageResult<Option<SyncRecord<T>>> {
        Ok(self.records.read().get(&id).cloned())
    }

    fn list_all(&self) -> StorageResult<Vec<SyncRecord<T>>> {
        Ok(self.records.read().values().cloned().collect())
    }

    fn upsert(&self, record: SyncRecord<T>) -> StorageResult<()> {
        self.commit(|rows| {
            rows.insert(record.id, record);
        })
    }

    fn remove(&self, id: Uuid) -> StorageResult<bool> {
        if !self.records.read().contains_key(&id) {
            return Ok(false);
        }
        self.commit(|rows| rows.remove(&id).is_some())
    }
}

fn table_path(dir: &Path, table: &str) -> PathBuf {
    dir.join(format!("{table}.cbor"))
}

/// Reads a CBOR value, returning `None` if the file is missing or empty.
pub(crate) fn read_cbor<V: DeserializeOwned>(path: &Path) -> StorageResult<Option<V>> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(None);
    }
    ciborium::from_reader(BufReader::new(file))
        .map(Some)
        .map_err(|e| StorageError::decode(path, e))
}

/// Writes a CBOR value using write-then-rename.
///
/// 1. Write to `<path>.tmp`
/// 2. Sync the temporary file
/// 3. Rename over `path`
/// 4. Sync the parent directory so the rename is durable
pub(crate) fn write_cbor_atomic<V: Serialize + ?Sized>(path: &Path, value: &V) -> StorageResult<()> {
    let temp_path = path.with_extension("cbor.tmp");

    let file = File::create(&temp_path)?;
    let mut writer = BufWriter::new(file);
    ciborium::into_writer(value, &mut writer).map_err(|e| StorageError::Encode(e.to_string()))?;
    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| StorageError::Io(e.into_error()))?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;
    if let Some(parent) = path.parent() {
        sync_directory(parent)?;
    }
    Ok(())
}

#[cfg(unix)]
fn sync_directory(dir: &Path) -> StorageResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> StorageResult<()> {
    // NTFS journals metadata; directory handles cannot be fsynced.
    Ok(())
}
