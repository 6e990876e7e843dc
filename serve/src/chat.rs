//! Unified chat WebSocket authority.
//!
//! One handler serves both the customer and admin chat routes,
//! parameterised by [`ChatPolicy`]: role gate, intent normalisation, event
//! relay with the admin legacy-error adaptation, and the output guard that
//! apologises when a stream ends without content.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures_util::StreamExt;
use helm::bus::EventBus;
use mission_event::{close_code, ChatEventKind, Envelope, StoredEvent};
use mission_store::MissionStore;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::app::AppState;
use crate::auth::{extract_ws_auth, UserInfo};
use crate::mission_ws::{close_with, send_close, send_envelope};
use crate::runner::MissionRunner;

/// Bounded buffer between the chat backend and the socket sender. Keeps a
/// slow client from growing memory without bound.
const EVENT_QUEUE_CAPACITY: usize = 128;

/// Route policy for one chat endpoint.
#[derive(Clone, Copy, Debug)]
pub struct ChatPolicy {
    pub requires_admin: bool,
    pub forbidden_details: &'static str,
    pub route_id: &'static str,
}

pub const CUSTOMER_CHAT_POLICY: ChatPolicy = ChatPolicy {
    requires_admin: false,
    forbidden_details: "Admin accounts must use the admin chat endpoint.",
    route_id: "customer_chat",
};

pub const ADMIN_CHAT_POLICY: ChatPolicy = ChatPolicy {
    requires_admin: true,
    forbidden_details: "This endpoint requires an administrator account.",
    route_id: "admin_chat",
};

/// One normalised chat request handed to the backend.
#[derive(Clone, Debug)]
pub struct ChatRequest {
    pub question: String,
    pub user_id: i64,
    pub conversation_id: Option<String>,
    pub context: Value,
}

/// The orchestrator's streaming chat RPC, as consumed by the authority.
/// Implementations write `{type, payload}` envelopes to the channel and
/// drop the sender when the stream ends; dropping the receiver cancels.
#[async_trait]
pub trait ChatRpc: Send + Sync {
    async fn stream_chat(&self, request: ChatRequest) -> mpsc::Receiver<Envelope>;
}

/// Canonical intent name for a raw `mission_type` value.
fn normalize_intent(raw: Option<&Value>) -> Option<String> {
    let raw = raw?.as_str()?.trim();
    if raw.is_empty() {
        return None;
    }
    let canonical = match raw.to_ascii_lowercase().as_str() {
        "mission_complex" => "MISSION_COMPLEX",
        "deep_analysis" => "DEEP_ANALYSIS",
        "code_search" => "CODE_SEARCH",
        "chat" => "DEFAULT",
        _ => return Some(raw.to_ascii_uppercase()),
    };
    Some(canonical.to_string())
}

/// Request context for the orchestrator: route id plus the normalised
/// intent; `metadata.mission_type` overrides the top-level field.
fn build_request_context(payload: &Value, policy: &ChatPolicy) -> Value {
    let mut map = serde_json::Map::new();
    map.insert(
        "route_id".to_string(),
        Value::String(policy.route_id.to_string()),
    );

    if let Some(intent) = normalize_intent(payload.get("mission_type")) {
        map.insert("intent".to_string(), Value::String(intent));
    }
    if let Some(metadata) = payload.get("metadata").filter(|m| m.is_object()) {
        if let Some(intent) = normalize_intent(metadata.get("mission_type")) {
            map.insert("intent".to_string(), Value::String(intent));
        }
    }
    Value::Object(map)
}

/// Admin UIs still expect the legacy `error` shape for assistant errors.
fn adapt_legacy_event(event: Envelope, policy: &ChatPolicy) -> Envelope {
    if !policy.requires_admin || event.kind != "assistant_error" {
        return event;
    }
    let content = event
        .payload
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or("Unexpected error.")
        .to_string();
    Envelope::error(content, 500)
}

/// `GET /api/chat/ws`
pub async fn customer_chat_ws(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    chat_ws(ws, params, headers, state, CUSTOMER_CHAT_POLICY)
}

/// `GET /admin/api/chat/ws`
pub async fn admin_chat_ws(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    chat_ws(ws, params, headers, state, ADMIN_CHAT_POLICY)
}

fn chat_ws(
    ws: WebSocketUpgrade,
    params: HashMap<String, String>,
    headers: HeaderMap,
    state: Arc<AppState>,
    policy: ChatPolicy,
) -> Response {
    let ws = ws.protocols(["jwt"]);

    let auth = extract_ws_auth(
        &headers,
        params.get("token").map(String::as_str),
        state.settings.environment,
    );
    let Some((token, _proto)) = auth else {
        return ws.on_upgrade(|socket| close_with(socket, close_code::AUTH, "missing credential"));
    };
    let claims = match state.codec.decode(&token) {
        Ok(claims) => claims,
        Err(_) => {
            return ws
                .on_upgrade(|socket| close_with(socket, close_code::AUTH, "invalid credential"));
        }
    };

    ws.on_upgrade(move |socket| async move {
        let user = match state.users.resolve(&claims).await {
            Some(user) if user.active => user,
            _ => {
                close_with(socket, close_code::AUTH, "unknown user").await;
                return;
            }
        };
        handle_chat_socket(socket, state, policy, user).await;
    })
}

async fn handle_chat_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    policy: ChatPolicy,
    user: UserInfo,
) {
    let (mut sender, mut receiver) = socket.split();

    if user.admin != policy.requires_admin {
        let _ = send_envelope(
            &mut sender,
            &Envelope::error(policy.forbidden_details, 403),
        )
        .await;
        send_close(&mut sender, close_code::FORBIDDEN, "role forbidden").await;
        return;
    }

    loop {
        let Some(msg) = receiver.next().await else {
            break;
        };
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            _ => continue,
        };

        let payload: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(_) => {
                let _ = send_envelope(
                    &mut sender,
                    &Envelope::error("Malformed request frame.", 400),
                )
                .await;
                continue;
            }
        };

        let question = payload
            .get("question")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        if question.is_empty() {
            let _ = send_envelope(
                &mut sender,
                &Envelope::new("error", json!({ "details": "Question is required." })),
            )
            .await;
            continue;
        }

        let request = ChatRequest {
            question,
            user_id: user.id,
            conversation_id: payload
                .get("conversation_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            context: build_request_context(&payload, &policy),
        };

        let mut rx = state.chat.stream_chat(request).await;
        let mut content_delivered = false;
        let mut client_gone = false;

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    if ChatEventKind::is_content_bearing(&event.kind) {
                        content_delivered = true;
                    }
                    let event = adapt_legacy_event(event, &policy);
                    if send_envelope(&mut sender, &event).await.is_err() {
                        client_gone = true;
                        break;
                    }
                }
                msg = receiver.next() => {
                    match msg {
                        None | Some(Ok(Message::Close(_))) | Some(Err(_)) => {
                            client_gone = true;
                            break;
                        }
                        _ => {}
                    }
                }
            }
        }
        // Dropping rx tells the backend to stop producing.
        drop(rx);
        if client_gone {
            break;
        }

        if !content_delivered {
            tracing::warn!(
                route_id = policy.route_id,
                user_id = user.id,
                "output guard: stream ended without content"
            );
            let _ = send_envelope(
                &mut sender,
                &Envelope::new(
                    "assistant_fallback",
                    json!({
                        "content": "Sorry, I could not produce a final result for this request. Please try again or rephrase."
                    }),
                ),
            )
            .await;
        }
    }
    tracing::info!(route_id = policy.route_id, "chat ws disconnected");
}

/// Mission-backed chat backend: every question enters through the same
/// authoritative mission path (single brain) and the mission's event stream
/// is relayed as chat envelopes. An LLM-conversational backend implements
/// the same trait.
pub struct MissionChatRpc {
    store: Arc<MissionStore>,
    runner: Arc<MissionRunner>,
    bus: Arc<EventBus<StoredEvent>>,
    model_api_key: Option<String>,
}

impl MissionChatRpc {
    pub fn new(
        store: Arc<MissionStore>,
        runner: Arc<MissionRunner>,
        bus: Arc<EventBus<StoredEvent>>,
        model_api_key: Option<String>,
    ) -> Self {
        Self {
            store,
            runner,
            bus,
            model_api_key,
        }
    }
}

#[async_trait]
impl ChatRpc for MissionChatRpc {
    async fn stream_chat(&self, request: ChatRequest) -> mpsc::Receiver<Envelope> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let store = Arc::clone(&self.store);
        let runner = Arc::clone(&self.runner);
        let bus = Arc::clone(&self.bus);
        let model_api_key = self.model_api_key.clone();

        tokio::spawn(async move {
            let conversation_id = request
                .conversation_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            if tx
                .send(Envelope::new(
                    "conversation_init",
                    json!({ "conversation_id": conversation_id }),
                ))
                .await
                .is_err()
            {
                return;
            }

            if model_api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
                let _ = tx
                    .send(Envelope::new(
                        "assistant_error",
                        json!({ "content": "Model credentials are not configured; missions cannot start." }),
                    ))
                    .await;
                return;
            }

            let _ = tx
                .send(Envelope::new("status", json!({ "state": "dispatching" })))
                .await;

            let mission = match store
                .create_mission(&request.question, request.context.clone(), request.user_id, None)
                .await
            {
                Ok(mission) => mission,
                Err(e) => {
                    tracing::error!(error = %e, "chat mission dispatch failed");
                    let _ = tx
                        .send(Envelope::new(
                            "assistant_error",
                            json!({ "content": "Failed to dispatch the mission." }),
                        ))
                        .await;
                    return;
                }
            };

            let topic = format!("mission:{}", mission.id);
            let sub = bus.subscribe(&topic);
            runner.spawn(mission.clone());

            // Catch up on whatever persisted before the subscription; the
            // sequence filter deduplicates against live delivery. The
            // terminal event may already be part of the replay when the run
            // finishes fast.
            let mut last_seq = 0;
            let mut finished = false;
            if let Ok(history) = store.get_mission_events(mission.id, 0).await {
                for event in history {
                    last_seq = event.seq;
                    finished = finished || event.event_type.is_terminal();
                    if tx.send(Envelope::mission_event(&event)).await.is_err() {
                        bus.unsubscribe(&topic, &sub);
                        return;
                    }
                }
            }

            while !finished {
                tokio::select! {
                    event = sub.recv() => {
                        if event.seq <= last_seq {
                            continue;
                        }
                        last_seq = event.seq;
                        finished = event.event_type.is_terminal();
                        if tx.send(Envelope::mission_event(&event)).await.is_err() {
                            bus.unsubscribe(&topic, &sub);
                            return;
                        }
                    }
                    _ = tx.closed() => {
                        bus.unsubscribe(&topic, &sub);
                        return;
                    }
                }
            }

            let final_envelope = match store.get_mission(mission.id).await {
                Ok(Some(m)) if m.status == helm::MissionStatus::Failed => Envelope::new(
                    "assistant_error",
                    json!({ "content": format!("Mission {} failed.", mission.id) }),
                ),
                Ok(Some(m)) => Envelope::new(
                    "assistant_final",
                    json!({ "content": m
                        .result_summary
                        .unwrap_or_else(|| "Mission completed.".to_string()) }),
                ),
                _ => Envelope::new(
                    "assistant_final",
                    json!({ "content": "Mission completed." }),
                ),
            };
            let _ = tx.send(final_envelope).await;
            let _ = tx.send(Envelope::new("complete", json!({}))).await;
            bus.unsubscribe(&topic, &sub);
        });

        rx
    }
}
