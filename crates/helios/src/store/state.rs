//! Store slices and their update operations.
//!
//! Every operation is a pure transition on [`AppState`]: it takes the inputs
//! (including the current time where a timestamp is stamped) and returns
//! whether the state changed. Unknown ids are no-ops.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use helios_protocol::{
    AgentMessage, Challenge, FeedbackProcessed, Plan, PlanPatch, PlanUpdate, Task, TaskPatch,
    TaskStatus, User,
};

use crate::realtime::ChannelStatus;

/// Top-level view selected in the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveView {
    #[default]
    Planner,
    Challenge,
    Ai,
    Treehole,
}

/// Service-reported system status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for SystemStatus {
    fn default() -> Self {
        Self {
            status: "idle".to_string(),
            details: None,
            updated_at: None,
        }
    }
}

/// The slices that survive a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub plans: Vec<Plan>,
}

/// Everything the client renders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    // persisted
    pub user: Option<User>,
    pub tasks: Vec<Task>,
    pub plans: Vec<Plan>,

    // volatile
    pub agent_messages: Vec<AgentMessage>,
    pub challenges: Vec<Challenge>,
    pub system_status: SystemStatus,
    pub active_view: ActiveView,
    pub agent_working: bool,
    pub feedback: Vec<FeedbackProcessed>,
    pub connection: ChannelStatus,
}

impl AppState {
    /// Fresh state with the persisted slices restored.
    pub fn from_persisted(persisted: PersistedState) -> Self {
        Self {
            user: persisted.user,
            tasks: persisted.tasks,
            plans: persisted.plans,
            ..Self::default()
        }
    }

    pub fn persisted(&self) -> PersistedState {
        PersistedState {
            user: self.user.clone(),
            tasks: self.tasks.clone(),
            plans: self.plans.clone(),
        }
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn plan(&self, id: &str) -> Option<&Plan> {
        self.plans.iter().find(|p| p.id == id)
    }

    pub fn messages_for_task<'a>(&'a self, task_id: &'a str) -> impl Iterator<Item = &'a AgentMessage> {
        self.agent_messages
            .iter()
            .filter(move |m| m.task_id.as_deref() == Some(task_id))
    }

    // ========== Session ==========

    pub fn set_user(&mut self, user: Option<User>) -> bool {
        replace(&mut self.user, user)
    }

    // ========== Tasks ==========

    /// Insert a task, replacing any existing task with the same id.
    pub fn add_task(&mut self, task: Task) -> bool {
        upsert(&mut self.tasks, task, |t| t.id.as_str())
    }

    /// Patch a task and stamp `updated_at` when anything changed.
    pub fn update_task(&mut self, id: &str, patch: &TaskPatch, now: DateTime<Utc>) -> bool {
        let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) else {
            return false;
        };
        if patch.apply_to(task) {
            task.updated_at = now;
            true
        } else {
            false
        }
    }

    pub fn update_task_status(&mut self, id: &str, status: TaskStatus, now: DateTime<Utc>) -> bool {
        self.update_task(id, &TaskPatch::status(status), now)
    }

    pub fn delete_task(&mut self, id: &str) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != id);
        self.tasks.len() != before
    }

    // ========== Plans ==========

    /// Insert a plan, replacing any existing plan with the same id.
    pub fn add_plan(&mut self, plan: Plan) -> bool {
        upsert(&mut self.plans, plan, |p| p.id.as_str())
    }

    pub fn update_plan(&mut self, id: &str, patch: &PlanPatch) -> bool {
        self.plans
            .iter_mut()
            .find(|p| p.id == id)
            .is_some_and(|plan| patch.apply_to(plan))
    }

    /// Apply a service-pushed plan update.
    pub fn apply_plan_update(&mut self, update: &PlanUpdate) -> bool {
        self.update_plan(&update.id, &update.patch)
    }

    pub fn delete_plan(&mut self, id: &str) -> bool {
        let before = self.plans.len();
        self.plans.retain(|p| p.id != id);
        self.plans.len() != before
    }

    // ========== Agent messages ==========

    /// Append a transcript entry. An entry whose id is already present
    /// replaces the earlier one instead of duplicating it.
    pub fn add_agent_message(&mut self, message: AgentMessage) -> bool {
        if let Some(id) = message.id.as_deref()
            && let Some(existing) = self
                .agent_messages
                .iter_mut()
                .find(|m| m.id.as_deref() == Some(id))
        {
            return replace(existing, message);
        }
        self.agent_messages.push(message);
        true
    }

    /// Drop every transcript entry belonging to `task_id`.
    pub fn clear_agent_messages(&mut self, task_id: &str) -> bool {
        let before = self.agent_messages.len();
        self.agent_messages
            .retain(|m| m.task_id.as_deref() != Some(task_id));
        self.agent_messages.len() != before
    }

    // ========== System status ==========

    pub fn set_system_status(
        &mut self,
        status: &str,
        details: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        let current = &self.system_status;
        if current.status == status && current.details.as_deref() == details {
            return false;
        }
        self.system_status = SystemStatus {
            status: status.to_string(),
            details: details.map(str::to_string),
            updated_at: Some(now),
        };
        true
    }

    // ========== Challenges ==========

    pub fn set_challenges(&mut self, challenges: Vec<Challenge>) -> bool {
        replace(&mut self.challenges, challenges)
    }

    pub fn update_challenge_progress(&mut self, id: &str, progress: f64) -> bool {
        match self.challenges.iter_mut().find(|c| c.id == id) {
            Some(challenge) if challenge.progress != progress => {
                challenge.progress = progress;
                true
            }
            _ => false,
        }
    }

    // ========== UI ==========

    pub fn set_active_view(&mut self, view: ActiveView) -> bool {
        replace(&mut self.active_view, view)
    }

    pub fn set_agent_working(&mut self, working: bool) -> bool {
        replace(&mut self.agent_working, working)
    }

    // ========== Feedback ==========

    /// Record a processed-feedback notification, deduplicated by feedback id.
    pub fn record_feedback(&mut self, receipt: FeedbackProcessed) -> bool {
        if let Some(id) = receipt.feedback_id.as_deref()
            && let Some(existing) = self
                .feedback
                .iter_mut()
                .find(|f| f.feedback_id.as_deref() == Some(id))
        {
            return replace(existing, receipt);
        }
        self.feedback.push(receipt);
        true
    }

    // ========== Connection ==========

    pub fn set_connection(&mut self, status: ChannelStatus) -> bool {
        replace(&mut self.connection, status)
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

fn upsert<T, F>(items: &mut Vec<T>, item: T, key: F) -> bool
where
    T: PartialEq,
    F: Fn(&T) -> &str,
{
    match items.iter().position(|existing| key(existing) == key(&item)) {
        Some(index) => replace(&mut items[index], item),
        None => {
            items.push(item);
            true
        }
    }
}
