//! File-backed store
//!
//! Persists the whole key space as one JSON object so rate-limit history
//! survives process restarts. Every operation reads the file afresh, so
//! several stores (or processes) opened on the same path see each other's
//! keys. Writes go through a uniquely named temporary sibling that is renamed
//! into place.

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::{KeyValueStore, StorageError};

/// Key-value store persisted to a JSON file
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open the store at `path`
    ///
    /// A missing file yields an empty store. A file that is not a JSON object
    /// of strings is logged and treated as empty; it is overwritten on the
    /// next write.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        };

        let keys = store.load()?.len();
        debug!(path = ?store.path, keys, "Opened file store");

        Ok(store)
    }

    /// Current contents of the file; corruption reads as empty
    fn load(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match read_entries(&self.path) {
            Err(StorageError::Corrupt { path, reason }) => {
                warn!(path = ?path, reason = %reason, "Ignoring corrupt store file");
                Ok(BTreeMap::new())
            }
            other => other,
        }
    }

    /// Read, edit and write back the file while holding the write lock
    ///
    /// Nothing is written when `edit` returns false.
    fn update<F>(&self, edit: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool,
    {
        let _guard = self.write_lock.lock().map_err(|_| StorageError::Poisoned)?;
        let mut entries = self.load()?;
        if edit(&mut entries) {
            self.flush(&entries)?;
        }
        Ok(())
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|source| StorageError::Io {
            path: parent.to_path_buf(),
            source,
        })?;

        let json = serde_json::to_string_pretty(entries)?;
        let io_err = |source| StorageError::Io {
            path: self.path.clone(),
            source,
        };

        let mut tmp = NamedTempFile::new_in(parent).map_err(io_err)?;
        tmp.write_all(json.as_bytes()).map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

fn read_entries(path: &Path) -> Result<BTreeMap<String, String>, StorageError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(source) => {
            return Err(StorageError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    serde_json::from_str(&content).map_err(|e| StorageError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.update(|entries| entries.remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.load()?.into_keys().collect())
    }
}
