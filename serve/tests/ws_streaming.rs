//! WebSocket integration tests: handshake auth, role gate, mission
//! catch-up completeness, and the chat authority loop.

mod common;

use common::{spawn_server, wait_terminal, TestServer};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect_with_subprotocol(server: &TestServer, path: &str, token: &str) -> WsStream {
    let mut request = server
        .ws(path)
        .into_client_request()
        .expect("client request");
    request.headers_mut().insert(
        "sec-websocket-protocol",
        HeaderValue::from_str(&format!("jwt, {token}")).expect("header value"),
    );
    let (socket, _response) = connect_async(request).await.expect("ws connect");
    socket
}

fn close_code(message: &Message) -> Option<u16> {
    match message {
        Message::Close(Some(frame)) => Some(frame.code.into()),
        _ => None,
    }
}

fn parse_text(message: &Message) -> Value {
    match message {
        Message::Text(text) => serde_json::from_str(text).expect("frame is json"),
        other => panic!("expected text frame, got {other:?}"),
    }
}

/// **Scenario**: no subprotocol credential and no query token; the server
/// closes with 4401 before sending any frame.
#[tokio::test]
async fn missing_credential_closes_4401() {
    let server = spawn_server().await;
    let (mut socket, _) = connect_async(server.ws("/missions/1/ws"))
        .await
        .expect("ws connect");

    let first = socket.next().await.expect("a frame").expect("frame ok");
    assert_eq!(close_code(&first), Some(4401));
}

/// **Scenario**: an expired token in the subprotocol closes with 4401
/// (chat route).
#[tokio::test]
async fn expired_token_closes_4401() {
    let server = spawn_server().await;
    let expired = server.expired_token(1);
    let mut socket = connect_with_subprotocol(&server, "/api/chat/ws", &expired).await;

    let first = socket.next().await.expect("a frame").expect("frame ok");
    assert_eq!(close_code(&first), Some(4401));
}

/// **Scenario**: a valid admin token on the customer endpoint gets the
/// error envelope, then a 4403 close.
#[tokio::test]
async fn admin_on_customer_endpoint_forbidden() {
    let server = spawn_server().await;
    let admin = server.token(9, true);
    let mut socket = connect_with_subprotocol(&server, "/api/chat/ws", &admin).await;

    let first = socket.next().await.expect("a frame").expect("frame ok");
    let envelope = parse_text(&first);
    assert_eq!(envelope["type"], "error");
    assert_eq!(envelope["payload"]["status_code"], 403);
    assert_eq!(
        envelope["payload"]["details"],
        "Admin accounts must use the admin chat endpoint."
    );

    let second = socket.next().await.expect("a frame").expect("frame ok");
    assert_eq!(close_code(&second), Some(4403));
}

/// **Scenario**: mission WS on an unknown mission closes with 4004.
#[tokio::test]
async fn unknown_mission_closes_4004() {
    let server = spawn_server().await;
    let token = server.token(1, false);
    let mut socket = connect_with_subprotocol(&server, "/missions/31337/ws", &token).await;

    let first = socket.next().await.expect("a frame").expect("frame ok");
    assert_eq!(close_code(&first), Some(4004));
}

/// **Scenario**: catch-up completeness: the concatenation of replayed and
/// live `mission_event` frames is exactly the persisted sequence 1..n with
/// no gaps and no duplicates, bracketed by `mission_status` snapshots, and
/// the socket closes after the terminal event.
#[tokio::test]
async fn mission_ws_catch_up_completeness() {
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
    let id = created["id"].as_i64().expect("mission id");

    let token = server.token(1, false);
    let mut socket =
        connect_with_subprotocol(&server, &format!("/missions/{id}/ws"), &token).await;

    let mut statuses: Vec<Value> = Vec::new();
    let mut event_types: Vec<String> = Vec::new();
    let mut closed = false;
    while let Some(frame) = socket.next().await {
        let frame = frame.expect("frame ok");
        match &frame {
            Message::Text(_) => {
                let envelope = parse_text(&frame);
                match envelope["type"].as_str() {
                    Some("mission_status") => statuses.push(envelope["payload"].clone()),
                    Some("mission_event") => event_types.push(
                        envelope["payload"]["event_type"]
                            .as_str()
                            .expect("embedded event type")
                            .to_string(),
                    ),
                    other => panic!("unexpected envelope type {other:?}"),
                }
            }
            Message::Close(_) => {
                closed = true;
                break;
            }
            _ => {}
        }
    }

    assert!(closed, "server closes after the terminal event");
    assert!(statuses.len() >= 2, "initial and final mission_status");
    assert_eq!(statuses.last().unwrap()["status"], "success");

    // Replay + live together must equal the persisted log exactly: same
    // count (no duplicates, no gaps) and the same boundary events.
    let events: Vec<Value> = client
        .get(server.http(&format!("/missions/{id}/events")))
        .send()
        .await
        .expect("get events")
        .json()
        .await
        .expect("events json");
    assert_eq!(event_types.len(), events.len());
    assert_eq!(event_types.first().map(String::as_str), Some("mission_created"));
    assert_eq!(event_types.last().map(String::as_str), Some("mission_completed"));
}

/// **Scenario**: chat happy path: conversation_init first, mission events
/// relayed through, assistant_final and complete close the exchange; an
/// empty question only yields an error envelope and keeps the socket open.
#[tokio::test]
async fn chat_ws_question_round_trip() {
    let server = spawn_server().await;
    let token = server.token(5, false);
    let mut socket = connect_with_subprotocol(&server, "/api/chat/ws", &token).await;

    // Empty question: error envelope, socket stays open.
    socket
        .send(Message::Text(json!({ "question": "  " }).to_string()))
        .await
        .expect("send empty question");
    let frame = socket.next().await.expect("a frame").expect("frame ok");
    let envelope = parse_text(&frame);
    assert_eq!(envelope["type"], "error");
    assert_eq!(envelope["payload"]["details"], "Question is required.");

    // Real question on the same socket.
    socket
        .send(Message::Text(
            json!({ "question": "Summarise X", "mission_type": "mission_complex" }).to_string(),
        ))
        .await
        .expect("send question");

    let mut kinds: Vec<String> = Vec::new();
    loop {
        let frame = socket.next().await.expect("a frame").expect("frame ok");
        let envelope = parse_text(&frame);
        let kind = envelope["type"].as_str().expect("type").to_string();
        kinds.push(kind.clone());
        if kind == "complete" {
            break;
        }
    }

    assert_eq!(kinds.first().map(String::as_str), Some("conversation_init"));
    assert!(kinds.iter().any(|k| k == "mission_event"));
    assert!(kinds.iter().any(|k| k == "assistant_final"));
    assert_eq!(kinds.last().map(String::as_str), Some("complete"));
}

/// **Scenario**: reconnect after completion replays the full history;
/// a late subscriber misses nothing.
#[tokio::test]
async fn mission_ws_replay_after_completion() {
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
    let id = created["id"].as_i64().expect("mission id");
    wait_terminal(&server, &client, id).await;

    let token = server.token(1, false);
    let mut socket =
        connect_with_subprotocol(&server, &format!("/missions/{id}/ws"), &token).await;

    let mut event_count = 0usize;
    let mut final_status = None;
    while let Some(frame) = socket.next().await {
        let frame = frame.expect("frame ok");
        match &frame {
            Message::Text(_) => {
                let envelope = parse_text(&frame);
                match envelope["type"].as_str() {
                    Some("mission_event") => event_count += 1,
                    Some("mission_status") => {
                        final_status = Some(envelope["payload"]["status"].clone())
                    }
                    _ => {}
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    let events: Vec<Value> = client
        .get(server.http(&format!("/missions/{id}/events")))
        .send()
        .await
        .expect("get events")
        .json()
        .await
        .expect("events json");
    assert_eq!(event_count, events.len());
    assert_eq!(final_status, Some(json!("success")));
}
