//! In-memory storage, for tests and for running without a data directory.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

use super::{StateStorage, StorageResult};
use crate::store::PersistedState;

#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<Option<PersistedState>>,
    saves: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `state` already saved.
    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of completed `save` calls.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub async fn current(&self) -> Option<PersistedState> {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl StateStorage for MemoryStorage {
    async fn load(&self) -> StorageResult<Option<PersistedState>> {
        Ok(self.state.lock().await.clone())
    }

    async fn save(&self, state: &PersistedState) -> StorageResult<()> {
        *self.state.lock().await = Some(state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear(&self) -> StorageResult<()> {
        *self.state.lock().await = None;
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
