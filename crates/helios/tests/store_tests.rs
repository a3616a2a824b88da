//! Store integration tests: idempotency, notification and persistence.

use helios::protocol::{
    AgentMessage, FeedbackProcessed, PlanPatch, PlanUpdate, TaskPatch, TaskStatus, User,
    UserPreferences,
};
use helios::realtime::{ChannelStatus, ConnectionState};
use helios::storage::{JsonFileStorage, STATE_VERSION};
use helios::store::{ActiveView, Store};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

mod common;
use common::{plan, task};

fn user() -> User {
    User {
        id: "u1".to_string(),
        email: "ada@example.com".to_string(),
        name: "Ada".to_string(),
        avatar: None,
        preferences: UserPreferences::default(),
    }
}

fn message(id: &str, task_id: &str) -> AgentMessage {
    serde_json::from_value(json!({
        "id": id,
        "agentName": "Planner",
        "content": format!("message {id}"),
        "timestamp": "2024-05-01T09:30:00Z",
        "taskId": task_id
    }))
    .unwrap()
}

#[tokio::test]
async fn test_operations_are_idempotent() {
    let store = Store::new();
    let mut rx = store.subscribe();
    let rename = PlanPatch {
        name: Some("Launch".to_string()),
        ..PlanPatch::default()
    };
    let feedback = FeedbackProcessed {
        feedback_id: Some("f1".to_string()),
        task_id: Some("t1".to_string()),
        status: Some("done".to_string()),
        message: None,
    };

    // first application changes state, the second is a no-op
    macro_rules! twice {
        ($op:expr) => {{
            assert!($op.await, "first application of {}", stringify!($op));
            rx.borrow_and_update();
            assert!(!$op.await, "second application of {}", stringify!($op));
            assert!(!rx.has_changed().unwrap(), "notified by {}", stringify!($op));
        }};
    }

    twice!(store.set_user(Some(user())));
    twice!(store.add_task(task("t1")));
    twice!(store.update_task_status("t1", TaskStatus::Executing));
    twice!(store.add_plan(plan("p1")));
    twice!(store.update_plan("p1", &rename));
    twice!(store.add_agent_message(message("m1", "t1")));
    twice!(store.set_system_status("processing", Some("Planning")));
    twice!(store.set_active_view(ActiveView::Treehole));
    twice!(store.set_agent_working(true));
    twice!(store.record_feedback(feedback.clone()));
    twice!(store.clear_agent_messages("t1"));
    twice!(store.delete_plan("p1"));
    twice!(store.delete_task("t1"));
}

#[tokio::test]
async fn test_unknown_ids_are_noops() {
    let store = Store::new();
    let before = store.snapshot();

    assert!(!store.update_task("missing", &TaskPatch::status(TaskStatus::Failed)).await);
    assert!(!store.delete_task("missing").await);
    assert!(
        !store
            .apply_plan_update(&PlanUpdate {
                id: "missing".to_string(),
                patch: PlanPatch::default(),
            })
            .await
    );
    assert!(!store.update_challenge_progress("missing", 50.0).await);

    assert_eq!(store.snapshot(), before);
}

#[tokio::test]
async fn test_task_update_stamps_updated_at() {
    let store = Store::new();
    let original = task("t1");
    let created = original.updated_at;
    store.add_task(original).await;

    let patch = TaskPatch {
        progress: Some(40.0),
        ..TaskPatch::default()
    };
    assert!(store.update_task("t1", &patch).await);
    let stamped = store.read(|s| s.task("t1").map(|t| t.updated_at)).unwrap();
    assert!(stamped >= created);

    // an identical patch leaves the stamp alone
    assert!(!store.update_task("t1", &patch).await);
    assert_eq!(
        store.read(|s| s.task("t1").map(|t| t.updated_at)),
        Some(stamped)
    );
}

#[tokio::test]
async fn test_persisted_slices_survive_restart() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(JsonFileStorage::in_dir(dir.path()));

    let store = Store::open(storage.clone()).await;
    store.set_user(Some(user())).await;
    store.add_task(task("t1")).await;
    store.add_plan(plan("p1")).await;
    store.add_agent_message(message("m1", "t1")).await;
    store.set_agent_working(true).await;
    store
        .set_connection(ChannelStatus {
            state: ConnectionState::Open,
            ..ChannelStatus::default()
        })
        .await;

    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(storage.path()).unwrap()).unwrap();
    assert_eq!(raw["version"], json!(STATE_VERSION));
    assert_eq!(raw["state"]["tasks"][0]["id"], "t1");
    assert!(raw["state"].get("agent_messages").is_none());

    let restored = Store::open(Arc::new(JsonFileStorage::in_dir(dir.path()))).await;
    let snapshot = restored.snapshot();
    assert_eq!(snapshot.user, Some(user()));
    assert_eq!(snapshot.tasks.len(), 1);
    assert_eq!(snapshot.plans.len(), 1);
    assert!(snapshot.agent_messages.is_empty());
    assert!(!snapshot.agent_working);
    assert_eq!(snapshot.connection.state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_corrupt_file_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(JsonFileStorage::in_dir(dir.path()));
    std::fs::write(storage.path(), "{ not json").unwrap();

    let store = Store::open(storage.clone()).await;
    assert!(store.snapshot().tasks.is_empty());

    // the next write replaces the corrupt document
    store.add_task(task("t1")).await;
    let reopened = Store::open(storage).await;
    assert_eq!(reopened.snapshot().tasks.len(), 1);
}

#[tokio::test]
async fn test_newer_version_is_ignored() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(JsonFileStorage::in_dir(dir.path()));
    let document = json!({
        "version": STATE_VERSION + 1,
        "state": {"user": null, "tasks": [], "plans": []}
    });
    std::fs::write(storage.path(), document.to_string()).unwrap();

    let store = Store::open(storage).await;
    assert_eq!(store.snapshot().user, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_commits_are_serialised() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(JsonFileStorage::in_dir(dir.path()));
    let store = Store::open(storage.clone()).await;

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move { store.add_task(task(&format!("t{i}"))).await })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap());
    }

    assert_eq!(store.snapshot().tasks.len(), 20);
    let reopened = Store::open(storage).await;
    assert_eq!(reopened.snapshot().tasks.len(), 20);
}

#[tokio::test]
async fn test_reset_clears_everything() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(JsonFileStorage::in_dir(dir.path()));
    let store = Store::open(storage.clone()).await;
    store.add_task(task("t1")).await;
    store.set_active_view(ActiveView::Ai).await;

    assert!(store.reset().await);
    assert!(!store.reset().await);
    assert_eq!(store.snapshot().active_view, ActiveView::Planner);
    assert!(!storage.path().exists());
}
