//! Storage trait definitions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::StorageResult;
use crate::store::PersistedState;

/// Version of the persisted document layout.
pub const STATE_VERSION: u32 = 1;

/// On-disk envelope around the persisted slices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedDocument {
    pub version: u32,
    pub state: PersistedState,
}

impl PersistedDocument {
    pub fn new(state: PersistedState) -> Self {
        Self {
            version: STATE_VERSION,
            state,
        }
    }
}

/// Durable home for the persisted store slices.
#[async_trait]
pub trait StateStorage: Send + Sync + std::fmt::Debug {
    /// Load the last saved state, `None` when nothing was saved yet.
    async fn load(&self) -> StorageResult<Option<PersistedState>>;

    /// Replace the saved state.
    async fn save(&self, state: &PersistedState) -> StorageResult<()>;

    /// Forget the saved state.
    async fn clear(&self) -> StorageResult<()>;

    /// Human-readable location, for logs.
    fn location(&self) -> String;
}
