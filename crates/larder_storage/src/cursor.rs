//! Persisted sync cursors.
//!
//! A cursor is the server-time watermark of the last fully merged pull for
//! one resource. A resource that has never been synced reports the Unix
//! epoch, which makes the first pull a full download.

use crate::error::{StorageError, StorageResult};
use crate::file::{read_cbor, write_cbor_atomic};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// The "never synced" cursor value.
pub fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Storage for per-resource sync cursors.
pub trait CursorStore: Send + Sync {
    /// Returns the cursor for `resource`, or [`epoch`] if none was saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the cursor storage cannot be read.
    fn load(&self, resource: &str) -> StorageResult<DateTime<Utc>>;

    /// Stores a new cursor for `resource`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cursor cannot be made durable.
    fn save(&self, resource: &str, cursor: DateTime<Utc>) -> StorageResult<()>;

    /// Forgets the cursor for `resource`, forcing a full pull next time.
    ///
    /// # Errors
    ///
    /// Returns an error if the change cannot be made durable.
    fn reset(&self, resource: &str) -> StorageResult<()>;

    /// Returns every stored cursor, ordered by resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the cursor storage cannot be read.
    fn entries(&self) -> StorageResult<Vec<(String, DateTime<Utc>)>>;
}

/// Cursor store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursors: Mutex<BTreeMap<String, DateTime<Utc>>>,
}

impl MemoryCursorStore {
    /// Creates an empty cursor store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CursorStore for MemoryCursorStore {
    fn load(&self, resource: &str) -> StorageResult<DateTime<Utc>> {
        Ok(self
            .cursors
            .lock()
            .get(resource)
            .copied()
            .unwrap_or_else(epoch))
    }

    fn save(&self, resource: &str, cursor: DateTime<Utc>) -> StorageResult<()> {
        self.cursors.lock().insert(resource.to_string(), cursor);
        Ok(())
    }

    fn reset(&self, resource: &str) -> StorageResult<()> {
        self.cursors.lock().remove(resource);
        Ok(())
    }

    fn entries(&self) -> StorageResult<Vec<(String, DateTime<Utc>)>> {
        Ok(self
            .cursors
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect())
    }
}

/// Cursor store persisted as a CBOR map in `<dir>/cursors.cbor`.
#[derive(Debug)]
pub struct FileCursorStore {
    path: PathBuf,
    cursors: Mutex<BTreeMap<String, DateTime<Utc>>>,
    _lock_file: File,
}

impl FileCursorStore {
    /// Opens or creates the cursor file in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, the file is
    /// locked by another handle, or the existing file cannot be decoded.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;

        let lock_path = dir.join("cursors.lock");
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(lock_path));
        }

        let path = dir.join("cursors.cbor");
        let cursors = read_cbor(&path)?.unwrap_or_default();

        Ok(Self {
            path,
            cursors: Mutex::new(cursors),
            _lock_file: lock_file,
        })
    }

    /// Returns the path of the cursor file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn commit(&self, change: impl FnOnce(&mut BTreeMap<String, DateTime<Utc>>)) -> StorageResult<()> {
        let mut cursors = self.cursors.lock();
        let mut next = cursors.clone();
        change(&mut next);
        write_cbor_atomic(&self.path, &next)?;
        *cursors = next;
        Ok(())
    }
}

impl CursorStore for FileCursorStore {
    fn load(&self, resource: &str) -> StorageResult<DateTime<Utc>> {
        Ok(self
            .cursors
            .lock()
            .get(resource)
            .copied()
            .unwrap_or_else(epoch))
    }

    fn save(&self, resource: &str, cursor: DateTime<Utc>) -> StorageResult<()> {
        self.commit(|cursors| {
            cursors.insert(resource.to_string(), cursor);
        })
    }

    fn reset(&self, resource: &str) -> StorageResult<()> {
        self.commit(|cursors| {
            cursors.remove(resource);
        })
    }

    fn entries(&self) -> StorageResult<Vec<(String, DateTime<Utc>)>> {
        Ok(self
            .cursors
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect())
    }
}
