//! Durable key/value storage for client state.
//!
//! [`StorageFacade`] is the only entry point the rest of the crate uses. It
//! stores JSON text under string keys and never reports failures to the
//! caller: write errors are logged, read errors degrade to the default value.

mod memory;
mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// A string-to-string store.
pub trait KvBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// JSON facade over a [`KvBackend`]. Cheap to clone.
#[derive(Clone)]
pub struct StorageFacade {
    backend: Arc<dyn KvBackend>,
}

impl std::fmt::Debug for StorageFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageFacade")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl StorageFacade {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    /// Open (or create) a SQLite-backed store at `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Ok(Self::new(Arc::new(SqliteBackend::open(path)?)))
    }

    /// Non-durable store, state is lost when the process exits.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Serialize `value` and write it under `key`.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let text = match serde_json::to_string(value) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(key, error = %e, "Error serializing value for storage");
                return;
            }
        };

        if let Err(e) = self.backend.set(key, &text) {
            tracing::error!(key, backend = self.backend.name(), error = %e, "Error storing data");
        }
    }

    /// Read and deserialize the value under `key`, or `default`.
    ///
    /// Text that is not valid JSON is still returned verbatim when `T` can be
    /// built from a plain string (e.g. a model name written by an older
    /// client without quoting).
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let raw = match self.backend.get(key) {
            Ok(Some(raw)) if !raw.is_empty() => raw,
            Ok(_) => return default,
            Err(e) => {
                tracing::error!(key, backend = self.backend.name(), error = %e, "Error retrieving data");
                return default;
            }
        };

        match serde_json::from_str::<T>(&raw) {
            Ok(value) => value,
            Err(parse_err) => match serde_json::from_value::<T>(serde_json::Value::String(raw)) {
                Ok(value) => value,
                Err(_) => {
                    tracing::error!(key, error = %parse_err, "Error parsing stored data, using default");
                    default
                }
            },
        }
    }

    /// Delete the value under `key`.
    pub fn remove(&self, key: &str) {
        if let Err(e) = self.backend.remove(key) {
            tracing::error!(key, backend = self.backend.name(), error = %e, "Error removing data");
        }
    }
}
