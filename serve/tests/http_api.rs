//! End-to-end HTTP API tests against a live server and database.

mod common;

use common::{spawn_server, wait_terminal};
use mission_event::EventType;
use serde_json::{json, Value};

/// **Scenario**: happy mission: create, run to completion, observe the
/// persisted event log with contiguous sequence numbers.
#[tokio::test]
async fn happy_mission_end_to_end() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let created: Value = client
        .post(server.http("/missions"))
        .json(&json!({ "objective": "Summarise X" }))
        .send()
        .await
        .expect("post mission")
        .json()
        .await
        .expect("mission json");
    assert_eq!(created["status"], "pending");
    let id = created["id"].as_i64().expect("mission id");

    let finished = wait_terminal(&server, &client, id).await;
    assert_eq!(finished["status"], "success");
    assert!(finished["outcome"].is_null());
    assert!(finished["result"]["summary"]
        .as_str()
        .expect("result summary")
        .contains("Summarise X"));

    let events: Vec<Value> = client
        .get(server.http(&format!("/missions/{id}/events")))
        .send()
        .await
        .expect("get events")
        .json()
        .await
        .expect("events json");
    assert!(!events.is_empty());

    let seqs: Vec<i64> = events.iter().map(|e| e["seq"].as_i64().unwrap()).collect();
    assert_eq!(seqs, (1..=events.len() as i64).collect::<Vec<_>>());

    let types: Vec<&str> = events
        .iter()
        .map(|e| e["event_type"].as_str().unwrap())
        .collect();
    assert_eq!(types.first(), Some(&EventType::MissionCreated.as_str()));
    assert!(types.contains(&"run_started"));
    assert!(types.contains(&"phase_start"));
    assert!(types.contains(&"phase_completed"));
    assert_eq!(types.last(), Some(&"mission_completed"));
}

/// **Scenario**: unknown mission id returns `404 {detail}`.
#[tokio::test]
async fn missing_mission_is_404() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let response = client
        .get(server.http("/missions/99999"))
        .send()
        .await
        .expect("get mission");
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.expect("error json");
    assert_eq!(body["detail"], "Mission not found");
}

/// **Scenario**: an empty objective is rejected with 400.
#[tokio::test]
async fn empty_objective_is_400() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.http("/missions"))
        .json(&json!({ "objective": "   " }))
        .send()
        .await
        .expect("post mission");
    assert_eq!(response.status(), 400);
}

/// **Scenario**: two POSTs with the same `Idempotency-Key` produce one
/// mission and byte-identical response bodies (replay).
#[tokio::test]
async fn idempotency_key_replays_verbatim() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let first = client
        .post(server.http("/missions"))
        .header("Idempotency-Key", "K-1")
        .json(&json!({ "objective": "Summarise X" }))
        .send()
        .await
        .expect("first post");
    assert_eq!(first.status(), 200);
    let first_bytes = first.bytes().await.expect("first body");

    let second = client
        .post(server.http("/missions"))
        .header("Idempotency-Key", "K-1")
        .json(&json!({ "objective": "Summarise X" }))
        .send()
        .await
        .expect("second post");
    assert_eq!(second.status(), 200);
    let second_bytes = second.bytes().await.expect("second body");

    assert_eq!(first_bytes, second_bytes, "replay must be byte-identical");
}

/// **Scenario**: the same `X-Correlation-ID` deduplicates at the store
/// level; both responses carry the same mission id.
#[tokio::test]
async fn correlation_id_deduplicates_mission() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let first: Value = client
        .post(server.http("/missions"))
        .header("X-Correlation-ID", "corr-7")
        .json(&json!({ "objective": "Summarise X" }))
        .send()
        .await
        .expect("first post")
        .json()
        .await
        .expect("first json");

    let second: Value = client
        .post(server.http("/missions"))
        .header("X-Correlation-ID", "corr-7")
        .json(&json!({ "objective": "Summarise X" }))
        .send()
        .await
        .expect("second post")
        .json()
        .await
        .expect("second json");

    assert_eq!(first["id"], second["id"]);
}

/// **Scenario**: cancel on an unknown mission is 404; on a known one it
/// flags the store.
#[tokio::test]
async fn cancel_endpoint() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.http("/missions/4242/cancel"))
        .send()
        .await
        .expect("cancel");
    assert_eq!(response.status(), 404);

    let created: Value = client
        .post(server.http("/missions"))
        .json(&json!({ "objective": "Summarise X" }))
        .send()
        .await
        .expect("post mission")
        .json()
        .await
        .expect("mission json");
    let id = created["id"].as_i64().unwrap();

    let response = client
        .post(server.http(&format!("/missions/{id}/cancel")))
        .send()
        .await
        .expect("cancel");
    assert_eq!(response.status(), 200);
    // Whether the run was cancelled in time or already finished, the
    // mission must still settle into a terminal status.
    let finished = wait_terminal(&server, &client, id).await;
    assert!(finished["status"] == "success" || finished["status"] == "failed");
}

/// **Scenario**: health endpoint answers ok.
#[tokio::test]
async fn health_endpoint() {
    let server = spawn_server().await;
    let body: Value = reqwest::get(server.http("/health"))
        .await
        .expect("health")
        .json()
        .await
        .expect("health json");
    assert_eq!(body["status"], "ok");
}
