//! Test utilities and common setup.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use helios::protocol::{InboundEvent, Plan, Priority, Task, TaskStatus};
use helios::realtime::{
    ChannelConfig, ChannelStatus, Endpoint, EventHandler, MemoryConnector, RealtimeChannel,
    StoreDispatcher,
};
use helios::store::Store;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BASE_URL: &str = "ws://helios.test";

/// Records everything the channel hands to its handler.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<InboundEvent>>,
    statuses: Mutex<Vec<ChannelStatus>>,
}

impl RecordingHandler {
    pub fn events(&self) -> Vec<InboundEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<ChannelStatus> {
        self.statuses.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle_event(&self, event: InboundEvent) {
        self.events.lock().unwrap().push(event);
    }

    async fn status_changed(&self, status: &ChannelStatus) {
        self.statuses.lock().unwrap().push(status.clone());
    }
}

pub fn config(endpoint: Endpoint) -> ChannelConfig {
    ChannelConfig::new(endpoint, BASE_URL)
}

/// Channel on the user stream of `u1` feeding `store`.
pub fn store_channel(connector: &MemoryConnector, store: &Store) -> RealtimeChannel {
    RealtimeChannel::spawn(
        config(Endpoint::user("u1")),
        Arc::new(connector.clone()),
        Arc::new(StoreDispatcher::new(store.clone(), None)),
    )
}

/// Channel on the user stream of `u1` feeding a recorder.
pub fn recording_channel(
    connector: &MemoryConnector,
) -> (RealtimeChannel, Arc<RecordingHandler>) {
    let handler = Arc::new(RecordingHandler::default());
    let channel = RealtimeChannel::spawn(
        config(Endpoint::user("u1")),
        Arc::new(connector.clone()),
        handler.clone(),
    );
    (channel, handler)
}

/// Let the driver run everything that is ready without firing timers
/// further out than a millisecond.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn task(id: &str) -> Task {
    let now = Utc::now();
    Task {
        id: id.to_string(),
        title: format!("Task {id}"),
        description: None,
        status: TaskStatus::Pending,
        priority: Priority::Medium,
        plan_id: None,
        created_at: now,
        updated_at: now,
        due_date: None,
        assigned_agents: Vec::new(),
        progress: 0.0,
        metadata: None,
    }
}

pub fn plan(id: &str) -> Plan {
    Plan {
        id: id.to_string(),
        name: format!("Plan {id}"),
        description: String::new(),
        color: "#3b82f6".to_string(),
        icon: None,
        created_at: Utc::now(),
        task_ids: Vec::new(),
        progress: 0.0,
    }
}
