//! Persistence Substrate
//!
//! Key-value storage shared by the rate limiter and the CSRF token manager.
//! Every stored value is a UTF-8 JSON document.
//!
//! Two backends are provided:
//!
//! - [`MemoryStore`]: lives as long as the process, used as the session store
//! - [`FileStore`]: a JSON file that survives restarts, used for rate limits
//!
//! A single store call is atomic, but a get followed by a set is not. Callers
//! that need read-modify-write atomicity must serialise access themselves.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::path::PathBuf;

/// Error types for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Reading or writing the backing file failed
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backing file exists but is not a JSON object of strings
    #[error("Corrupt store file {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Serialising the store contents failed
    #[error("Failed to serialize store: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A previous holder of the store lock panicked
    #[error("Store lock poisoned")]
    Poisoned,
}

/// Minimal key-value interface over the persistence substrate
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    /// Fetch the value stored under `key`
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete `key`; deleting a missing key is not an error
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Snapshot of every key currently stored
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}
