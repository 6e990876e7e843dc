//! Integration tests for the mission store and outbox worker against a
//! real on-disk SQLite database.

use std::sync::Arc;
use std::time::Duration;

use helm::agents::{Plan, PlanStep};
use helm::bus::EventBus;
use helm::{MissionOutcome, MissionStatus, TaskStatus};
use mission_event::{EventType, StoredEvent};
use mission_store::{MissionStore, OutboxWorker, StoreError};
use serde_json::json;

fn store_in(dir: &tempfile::TempDir) -> MissionStore {
    MissionStore::new(dir.path().join("missions.db")).expect("store opens")
}

fn plan() -> Plan {
    Plan {
        strategy_name: "direct".into(),
        reasoning: String::new(),
        steps: vec![
            PlanStep {
                name: "gather".into(),
                description: "collect".into(),
                tool_hint: Some("search".into()),
            },
            PlanStep {
                name: "report".into(),
                description: "summarise".into(),
                tool_hint: None,
            },
        ],
    }
}

/// **Scenario**: creating a mission writes the row, the `mission_created`
/// event at seq 1, and exactly one pending outbox entry, atomically.
#[tokio::test]
async fn create_mission_emits_event_and_outbox_row() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);

    let mission = store
        .create_mission("Summarise X", json!({}), 1, None)
        .await
        .unwrap();
    assert_eq!(mission.status, MissionStatus::Pending);

    let events = store.get_mission_events(mission.id, 0).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].seq, 1);
    assert_eq!(events[0].event_type, EventType::MissionCreated);

    assert_eq!(store.outbox_pending_count().await.unwrap(), 1);
}

/// **Scenario**: the same idempotency key returns the existing mission and
/// writes nothing new (at-most-once effect at the store level).
#[tokio::test]
async fn create_mission_idempotency_key_returns_existing() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);

    let first = store
        .create_mission("Summarise X", json!({}), 1, Some("K"))
        .await
        .unwrap();
    let second = store
        .create_mission("Summarise X", json!({}), 1, Some("K"))
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(store.outbox_pending_count().await.unwrap(), 1);

    let found = store.find_by_idempotency_key("K").await.unwrap();
    assert_eq!(found.map(|m| m.id), Some(first.id));
}

/// **Scenario**: sequence numbers are strictly increasing and contiguous
/// from 1 across mixed mutations.
#[tokio::test]
async fn event_sequence_is_contiguous() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let mission = store
        .create_mission("Summarise X", json!({}), 1, None)
        .await
        .unwrap();

    store
        .update_status(mission.id, MissionStatus::Running, None)
        .await
        .unwrap();
    for i in 0..3 {
        store
            .append_event(
                mission.id,
                EventType::PhaseStart,
                json!({ "phase": "PLANNING", "n": i }),
            )
            .await
            .unwrap();
    }
    store
        .complete_mission(mission.id, MissionOutcome::Success, Some("done".into()), None)
        .await
        .unwrap();

    let events = store.get_mission_events(mission.id, 0).await.unwrap();
    let seqs: Vec<i64> = events.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (1..=events.len() as i64).collect::<Vec<_>>());
    assert_eq!(
        events.last().unwrap().event_type,
        EventType::MissionCompleted
    );

    // since_seq filters strictly-after.
    let tail = store.get_mission_events(mission.id, 2).await.unwrap();
    assert_eq!(tail.first().map(|e| e.seq), Some(3));
}

/// **Scenario**: illegal transitions are rejected and leave no event or
/// outbox row behind (atomicity of the aborted mutation).
#[tokio::test]
async fn illegal_transition_rejected_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let mission = store
        .create_mission("Summarise X", json!({}), 1, None)
        .await
        .unwrap();
    store
        .update_status(mission.id, MissionStatus::Running, None)
        .await
        .unwrap();
    store
        .complete_mission(mission.id, MissionOutcome::Success, None, None)
        .await
        .unwrap();

    let events_before = store.get_mission_events(mission.id, 0).await.unwrap().len();
    let outbox_before = store.outbox_pending_count().await.unwrap();

    let result = store
        .update_status(mission.id, MissionStatus::Running, None)
        .await;
    assert!(matches!(result, Err(StoreError::InvalidTransition { .. })));

    assert_eq!(
        store.get_mission_events(mission.id, 0).await.unwrap().len(),
        events_before
    );
    assert_eq!(store.outbox_pending_count().await.unwrap(), outbox_before);
}

/// **Scenario**: a failed outcome emits `mission_failed` with the reason.
#[tokio::test]
async fn failed_outcome_emits_mission_failed() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let mission = store
        .create_mission("Summarise X", json!({}), 1, None)
        .await
        .unwrap();
    store
        .update_status(mission.id, MissionStatus::Running, None)
        .await
        .unwrap();
    store
        .complete_mission(
            mission.id,
            MissionOutcome::Failed,
            None,
            Some("loop_stopped".into()),
        )
        .await
        .unwrap();

    let events = store.get_mission_events(mission.id, 0).await.unwrap();
    let last = events.last().unwrap();
    assert_eq!(last.event_type, EventType::MissionFailed);
    assert_eq!(last.payload["reason"], "loop_stopped");
}

/// **Scenario**: task results update plan rows and emit `task_completed`.
#[tokio::test]
async fn task_results_update_rows_and_emit_events() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let mission = store
        .create_mission("Summarise X", json!({}), 1, None)
        .await
        .unwrap();
    store.record_tasks(mission.id, &plan()).await.unwrap();

    let tasks = store.get_tasks(mission.id).await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].name, "gather");
    assert_eq!(tasks[0].status, TaskStatus::Pending);

    store
        .append_task_result(
            mission.id,
            0,
            TaskStatus::Success,
            Some(json!({"found": 3})),
            None,
        )
        .await
        .unwrap();

    let tasks = store.get_tasks(mission.id).await.unwrap();
    assert_eq!(tasks[0].status, TaskStatus::Success);
    assert_eq!(tasks[0].result.as_ref().unwrap()["found"], 3);

    let events = store.get_mission_events(mission.id, 0).await.unwrap();
    let task_event = events
        .iter()
        .find(|e| e.event_type == EventType::TaskCompleted)
        .expect("task_completed emitted");
    assert_eq!(task_event.payload["name"], "gather");
}

/// **Scenario**: cancellation flags a live mission and refuses a terminal
/// one.
#[tokio::test]
async fn cancel_flag_only_for_live_missions() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let mission = store
        .create_mission("Summarise X", json!({}), 1, None)
        .await
        .unwrap();
    assert!(store.request_cancel(mission.id).await.unwrap());
    assert!(store
        .get_mission(mission.id)
        .await
        .unwrap()
        .unwrap()
        .cancel_requested);

    store
        .update_status(mission.id, MissionStatus::Running, None)
        .await
        .unwrap();
    store
        .complete_mission(mission.id, MissionOutcome::Success, None, None)
        .await
        .unwrap();
    assert!(!store.request_cancel(mission.id).await.unwrap());
}

/// **Scenario**: the supervisor run guard admits one run at a time.
#[tokio::test]
async fn run_guard_is_exclusive() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    assert!(store.try_begin_run(7));
    assert!(!store.try_begin_run(7));
    store.end_run(7);
    assert!(store.try_begin_run(7));
}

/// **Scenario**: the worker publishes claimed rows to the mission topic in
/// sequence order, marks them processed, and a second drain is a no-op.
#[tokio::test]
async fn outbox_drain_publishes_in_order_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(store_in(&dir));
    let bus: Arc<EventBus<StoredEvent>> = Arc::new(EventBus::new(64));

    let mission = store
        .create_mission("Summarise X", json!({}), 1, None)
        .await
        .unwrap();
    store
        .update_status(mission.id, MissionStatus::Running, None)
        .await
        .unwrap();
    store
        .append_event(mission.id, EventType::PhaseStart, json!({"phase": "PLANNING"}))
        .await
        .unwrap();

    let sub = bus.subscribe(&format!("mission:{}", mission.id));
    let worker = OutboxWorker::new(
        Arc::clone(&store),
        Arc::clone(&bus),
        Duration::from_secs(5),
        10,
        5,
    );

    let published = worker.drain_once().await.unwrap();
    assert_eq!(published, 3);
    assert_eq!(store.outbox_pending_count().await.unwrap(), 0);

    let mut seqs = Vec::new();
    while let Some(event) = sub.try_recv() {
        seqs.push(event.seq);
    }
    assert_eq!(seqs, vec![1, 2, 3]);

    assert_eq!(worker.drain_once().await.unwrap(), 0);
}

/// **Scenario**: purge removes processed rows only.
#[tokio::test]
async fn purge_processed_leaves_pending() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(store_in(&dir));
    let bus: Arc<EventBus<StoredEvent>> = Arc::new(EventBus::new(64));
    let mission = store
        .create_mission("Summarise X", json!({}), 1, None)
        .await
        .unwrap();

    let worker = OutboxWorker::new(
        Arc::clone(&store),
        Arc::clone(&bus),
        Duration::from_secs(5),
        10,
        5,
    );
    worker.drain_once().await.unwrap();

    store
        .append_event(mission.id, EventType::PhaseStart, json!({}))
        .await
        .unwrap();

    let far_future = "2999-01-01T00:00:00+00:00".to_string();
    let purged = store.purge_processed(far_future).await.unwrap();
    assert_eq!(purged, 1);
    assert_eq!(store.outbox_pending_count().await.unwrap(), 1);
}
