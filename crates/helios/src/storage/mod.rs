//! Durable storage for the persisted store slices.
//!
//! Provides a trait-based storage abstraction with implementations for:
//! - A JSON document on the local filesystem
//! - Process memory (tests, persistence disabled)

mod error;
mod local;
mod memory;
mod traits;

use std::path::PathBuf;
use std::sync::Arc;

pub use error::{StorageError, StorageResult};
pub use local::{DEFAULT_FILE_NAME, JsonFileStorage};
pub use memory::MemoryStorage;
pub use traits::{PersistedDocument, STATE_VERSION, StateStorage};

/// Create storage based on configuration.
pub fn create_storage(config: StorageConfig) -> Arc<dyn StateStorage> {
    match config {
        StorageConfig::File(path) => Arc::new(JsonFileStorage::new(path)),
        StorageConfig::Memory => Arc::new(MemoryStorage::new()),
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StorageConfig {
    /// JSON document at the given path.
    File(PathBuf),
    /// Nothing survives the process.
    #[default]
    Memory,
}
