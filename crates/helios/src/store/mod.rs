//! Observable application state.
//!
//! [`Store`] owns one [`AppState`] behind a `watch` channel. All writes go
//! through named operations; an operation that leaves the state unchanged
//! does not wake subscribers. Commits are serialised, and every commit that
//! touches the session, task or plan slices is mirrored to the configured
//! [`StateStorage`].

mod state;

use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::{Mutex, watch};

use helios_protocol::{
    AgentMessage, Challenge, FeedbackProcessed, Plan, PlanPatch, PlanUpdate, Task, TaskPatch,
    TaskStatus, User,
};

use crate::realtime::ChannelStatus;
use crate::storage::StateStorage;

pub use state::{ActiveView, AppState, PersistedState, SystemStatus};

/// Whether a commit can change the persisted slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slice {
    Persisted,
    Volatile,
}

struct StoreInner {
    state: watch::Sender<AppState>,
    storage: Option<Arc<dyn StateStorage>>,
    commit_lock: Mutex<()>,
}

/// Cheaply cloneable handle to the shared application state.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field(
                "storage",
                &self.inner.storage.as_ref().map(|s| s.location()),
            )
            .field("subscribers", &self.inner.state.receiver_count())
            .finish()
    }
}

impl Store {
    /// Store without persistence.
    pub fn new() -> Self {
        Self::build(AppState::default(), None)
    }

    /// Open a store backed by `storage`, restoring whatever it holds.
    ///
    /// Load failures are logged and the store starts from defaults.
    pub async fn open(storage: Arc<dyn StateStorage>) -> Self {
        let state = match storage.load().await {
            Ok(Some(persisted)) => {
                info!(
                    "Restored {} tasks and {} plans from {}",
                    persisted.tasks.len(),
                    persisted.plans.len(),
                    storage.location()
                );
                AppState::from_persisted(persisted)
            }
            Ok(None) => {
                debug!("No saved state at {}", storage.location());
                AppState::default()
            }
            Err(e) => {
                warn!(
                    "Ignoring saved state at {}: {}",
                    storage.location(),
                    e
                );
                AppState::default()
            }
        };
        Self::build(state, Some(storage))
    }

    fn build(state: AppState, storage: Option<Arc<dyn StateStorage>>) -> Self {
        let (tx, _) = watch::channel(state);
        Self {
            inner: Arc::new(StoreInner {
                state: tx,
                storage,
                commit_lock: Mutex::new(()),
            }),
        }
    }

    /// Clone of the current state.
    pub fn snapshot(&self) -> AppState {
        self.inner.state.borrow().clone()
    }

    /// Receiver that observes every change.
    pub fn subscribe(&self) -> watch::Receiver<AppState> {
        self.inner.state.subscribe()
    }

    /// Run `f` against the current state without cloning it.
    pub fn read<R>(&self, f: impl FnOnce(&AppState) -> R) -> R {
        f(&self.inner.state.borrow())
    }

    async fn commit(&self, slice: Slice, f: impl FnOnce(&mut AppState) -> bool) -> bool {
        let _guard = self.inner.commit_lock.lock().await;

        let mut persisted = None;
        let changed = self.inner.state.send_if_modified(|state| {
            let changed = f(state);
            if changed && slice == Slice::Persisted {
                persisted = Some(state.persisted());
            }
            changed
        });

        if let (Some(persisted), Some(storage)) = (persisted, &self.inner.storage)
            && let Err(e) = storage.save(&persisted).await
        {
            warn!("Failed to persist state to {}: {}", storage.location(), e);
        }
        changed
    }

    // ========== Session ==========

    pub async fn set_user(&self, user: Option<User>) -> bool {
        self.commit(Slice::Persisted, |s| s.set_user(user)).await
    }

    // ========== Tasks ==========

    pub async fn add_task(&self, task: Task) -> bool {
        self.commit(Slice::Persisted, |s| s.add_task(task)).await
    }

    pub async fn update_task(&self, id: &str, patch: &TaskPatch) -> bool {
        let now = Utc::now();
        self.commit(Slice::Persisted, |s| s.update_task(id, patch, now))
            .await
    }

    pub async fn update_task_status(&self, id: &str, status: TaskStatus) -> bool {
        let now = Utc::now();
        self.commit(Slice::Persisted, |s| s.update_task_status(id, status, now))
            .await
    }

    pub async fn delete_task(&self, id: &str) -> bool {
        self.commit(Slice::Persisted, |s| s.delete_task(id)).await
    }

    // ========== Plans ==========

    pub async fn add_plan(&self, plan: Plan) -> bool {
        self.commit(Slice::Persisted, |s| s.add_plan(plan)).await
    }

    pub async fn update_plan(&self, id: &str, patch: &PlanPatch) -> bool {
        self.commit(Slice::Persisted, |s| s.update_plan(id, patch))
            .await
    }

    /// Apply a server-pushed plan update.
    pub async fn apply_plan_update(&self, update: &PlanUpdate) -> bool {
        self.commit(Slice::Persisted, |s| s.apply_plan_update(update))
            .await
    }

    pub async fn delete_plan(&self, id: &str) -> bool {
        self.commit(Slice::Persisted, |s| s.delete_plan(id)).await
    }

    // ========== Agent messages ==========

    pub async fn add_agent_message(&self, message: AgentMessage) -> bool {
        self.commit(Slice::Volatile, |s| s.add_agent_message(message))
            .await
    }

    pub async fn clear_agent_messages(&self, task_id: &str) -> bool {
        self.commit(Slice::Volatile, |s| s.clear_agent_messages(task_id))
            .await
    }

    // ========== Volatile slices ==========

    pub async fn set_system_status(&self, status: &str, details: Option<&str>) -> bool {
        let now = Utc::now();
        self.commit(Slice::Volatile, |s| s.set_system_status(status, details, now))
            .await
    }

    pub async fn set_challenges(&self, challenges: Vec<Challenge>) -> bool {
        self.commit(Slice::Volatile, |s| s.set_challenges(challenges))
            .await
    }

    pub async fn update_challenge_progress(&self, id: &str, progress: f64) -> bool {
        self.commit(Slice::Volatile, |s| s.update_challenge_progress(id, progress))
            .await
    }

    pub async fn set_active_view(&self, view: ActiveView) -> bool {
        self.commit(Slice::Volatile, |s| s.set_active_view(view))
            .await
    }

    pub async fn set_agent_working(&self, working: bool) -> bool {
        self.commit(Slice::Volatile, |s| s.set_agent_working(working))
            .await
    }

    pub async fn record_feedback(&self, receipt: FeedbackProcessed) -> bool {
        self.commit(Slice::Volatile, |s| s.record_feedback(receipt))
            .await
    }

    pub async fn set_connection(&self, status: ChannelStatus) -> bool {
        self.commit(Slice::Volatile, |s| s.set_connection(status))
            .await
    }

    /// Return every slice to its default and forget the saved state.
    ///
    /// The connection slice is kept: it mirrors a live channel.
    pub async fn reset(&self) -> bool {
        let _guard = self.inner.commit_lock.lock().await;

        let changed = self.inner.state.send_if_modified(|state| {
            let fresh = AppState {
                connection: state.connection.clone(),
                ..AppState::default()
            };
            if *state == fresh {
                false
            } else {
                *state = fresh;
                true
            }
        });

        if let Some(storage) = &self.inner.storage
            && let Err(e) = storage.clear().await
        {
            warn!("Failed to clear saved state at {}: {}", storage.location(), e);
        }
        changed
    }
}
