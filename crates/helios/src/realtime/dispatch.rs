//! Routing decoded events into the store.

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};

use helios_protocol::InboundEvent;

use super::status::ChannelStatus;
use crate::store::Store;

/// Receives every decoded event and every status transition of a channel.
///
/// Calls are made from the channel's driver task, in transport order.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle_event(&self, event: InboundEvent);

    async fn status_changed(&self, _status: &ChannelStatus) {}
}

/// Applies events to a [`Store`] and mirrors channel status into its
/// connection slice.
#[derive(Debug, Clone)]
pub struct StoreDispatcher {
    store: Store,
    /// Set for task-scoped channels; stamped onto messages that lack one.
    task_id: Option<String>,
}

impl StoreDispatcher {
    pub fn new(store: Store, task_id: Option<String>) -> Self {
        Self { store, task_id }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

#[async_trait]
impl EventHandler for StoreDispatcher {
    async fn handle_event(&self, event: InboundEvent) {
        let now = Utc::now();
        match event {
            InboundEvent::PlanUpdated(update) => {
                if !self.store.apply_plan_update(&update.plan).await {
                    debug!("Plan update for {} changed nothing", update.plan.id);
                }
            }
            InboundEvent::AgentMessage(payload) => {
                let mut message = payload.into_message(now);
                if message.task_id.is_none() {
                    message.task_id = self.task_id.clone();
                }
                self.store.add_agent_message(message).await;
            }
            InboundEvent::StatusChange(change) => {
                self.store
                    .set_system_status(&change.status, change.details.as_deref())
                    .await;
            }
            InboundEvent::TaskStatusChanged(change) => {
                if !self
                    .store
                    .update_task_status(&change.task_id, change.status)
                    .await
                {
                    debug!("Status change for unknown task {}", change.task_id);
                }
            }
            InboundEvent::FeedbackProcessed(receipt) => {
                self.store.record_feedback(receipt).await;
            }
            InboundEvent::ConnectionEstablished(established) => {
                info!(
                    "Server confirmed connection{}",
                    established
                        .message
                        .map(|m| format!(": {m}"))
                        .unwrap_or_default()
                );
            }
            InboundEvent::Pong => debug!("PONG"),
            InboundEvent::Received(_) => debug!("Server acknowledged message"),
            InboundEvent::History(record) => {
                let message = record.into_message(self.task_id.clone(), now);
                self.store.add_agent_message(message).await;
            }
            InboundEvent::Unknown { event } => {
                info!("Ignoring unhandled event {event}");
            }
        }
    }

    async fn status_changed(&self, status: &ChannelStatus) {
        self.store.set_connection(status.clone()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helios_protocol::{InboundEvent, TaskStatus};
    use serde_json::json;

    fn decode(value: serde_json::Value) -> InboundEvent {
        InboundEvent::decode(&value.to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_agent_message_on_task_channel_gets_task_id() {
        let store = Store::new();
        let dispatcher = StoreDispatcher::new(store.clone(), Some("t1".into()));

        dispatcher
            .handle_event(decode(json!({
                "event": "AGENT_MESSAGE",
                "payload": {"agentName": "planner", "content": "drafting"}
            })))
            .await;

        let snapshot = store.snapshot();
        assert_eq!(snapshot.agent_messages.len(), 1);
        assert_eq!(snapshot.agent_messages[0].task_id.as_deref(), Some("t1"));
        assert_eq!(snapshot.agent_messages[0].content, "drafting");
    }

    #[tokio::test]
    async fn test_history_record_is_appended_once() {
        let store = Store::new();
        let dispatcher = StoreDispatcher::new(store.clone(), Some("t9".into()));
        let record = json!({
            "id": 17,
            "sequence_order": 3,
            "speaker": "Engineer",
            "message": "tests pass",
            "created_at": "2024-05-01T10:00:00.123456"
        });

        dispatcher.handle_event(decode(record.clone())).await;
        dispatcher.handle_event(decode(record)).await;

        let snapshot = store.snapshot();
        assert_eq!(snapshot.agent_messages.len(), 1);
        assert_eq!(snapshot.agent_messages[0].id.as_deref(), Some("17"));
        assert_eq!(snapshot.agent_messages[0].agent_name.as_deref(), Some("Engineer"));
    }

    #[tokio::test]
    async fn test_status_change_and_unknown_task() {
        let store = Store::new();
        let dispatcher = StoreDispatcher::new(store.clone(), None);

        dispatcher
            .handle_event(decode(json!({
                "event": "STATUS_CHANGE",
                "payload": {"status": "processing", "details": "Planning tasks"}
            })))
            .await;
        dispatcher
            .handle_event(decode(json!({
                "event": "TASK_STATUS_CHANGED",
                "payload": {"taskId": "nope", "status": "COMPLETED"}
            })))
            .await;

        let snapshot = store.snapshot();
        assert_eq!(snapshot.system_status.status, "processing");
        assert_eq!(snapshot.system_status.details.as_deref(), Some("Planning tasks"));
        assert!(snapshot.tasks.iter().all(|t| t.status != TaskStatus::Completed));
    }

    #[tokio::test]
    async fn test_status_is_mirrored() {
        let store = Store::new();
        let dispatcher = StoreDispatcher::new(store.clone(), None);
        let status = ChannelStatus {
            retries: 3,
            ..ChannelStatus::default()
        };

        dispatcher.status_changed(&status).await;
        assert_eq!(store.snapshot().connection, status);
    }
}
