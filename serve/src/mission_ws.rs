//! Mission streaming WebSocket: snapshot, gap-free catch-up, live relay,
//! terminal closure.
//!
//! The handler subscribes to the bus *before* reading history, records the
//! highest sequence replayed, and filters live events at or below it, so
//! the replayed + live concatenation equals the persisted sequence with no
//! duplicates and no gaps.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use mission_event::{close_code, Envelope};

use crate::app::AppState;
use crate::auth::extract_ws_auth;

/// Sending half of an accepted socket.
pub(crate) type WsSender = SplitSink<WebSocket, Message>;

/// Closes an unsplit socket with a code; used on handshake rejection,
/// before any data frame is sent.
pub(crate) async fn close_with(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

pub(crate) async fn send_close(sender: &mut WsSender, code: u16, reason: &'static str) {
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

pub(crate) async fn send_envelope(
    sender: &mut WsSender,
    envelope: &Envelope,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(envelope).unwrap_or_else(|_| "{}".to_string());
    sender.send(Message::Text(text)).await
}

fn status_envelope(mission: &helm::Mission) -> Envelope {
    let (status, outcome) = helm::MissionView::status_payload(mission.status);
    Envelope::mission_status(&status, outcome.as_deref())
}

/// `GET /missions/{id}/ws`
pub async fn mission_ws(
    ws: WebSocketUpgrade,
    Path(mission_id): Path<i64>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
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
        let active = state
            .users
            .resolve(&claims)
            .await
            .map(|u| u.active)
            .unwrap_or(false);
        if !active {
            close_with(socket, close_code::AUTH, "unknown user").await;
            return;
        }
        handle_mission_socket(socket, state, mission_id).await;
    })
}

async fn handle_mission_socket(socket: WebSocket, state: Arc<AppState>, mission_id: i64) {
    let topic = format!("mission:{mission_id}");
    // Subscribe before reading history so nothing published during the
    // replay can be missed.
    let sub = state.bus.subscribe(&topic);
    let (mut sender, mut receiver) = socket.split();

    let mission = match state.store.get_mission(mission_id).await {
        Ok(Some(mission)) => mission,
        Ok(None) => {
            send_close(&mut sender, close_code::NOT_FOUND, "mission not found").await;
            state.bus.unsubscribe(&topic, &sub);
            return;
        }
        Err(e) => {
            tracing::error!(mission_id, error = %e, "mission ws init failed");
            send_close(&mut sender, close_code::INTERNAL, "internal error").await;
            state.bus.unsubscribe(&topic, &sub);
            return;
        }
    };

    if send_envelope(&mut sender, &status_envelope(&mission))
        .await
        .is_err()
    {
        state.bus.unsubscribe(&topic, &sub);
        return;
    }

    let history = match state.store.get_mission_events(mission_id, 0).await {
        Ok(events) => events,
        Err(e) => {
            tracing::error!(mission_id, error = %e, "catch-up query failed");
            send_close(&mut sender, close_code::INTERNAL, "internal error").await;
            state.bus.unsubscribe(&topic, &sub);
            return;
        }
    };

    let mut last_seq = 0;
    for event in &history {
        if send_envelope(&mut sender, &Envelope::mission_event(event))
            .await
            .is_err()
        {
            state.bus.unsubscribe(&topic, &sub);
            return;
        }
        last_seq = event.seq;
    }

    // Already finished (including completion that landed between the
    // snapshot read and the replay): the terminal event was part of the
    // replay, so send a fresh final snapshot and close cleanly.
    let replayed_terminal = history
        .last()
        .map(|e| e.event_type.is_terminal())
        .unwrap_or(false);
    if mission.status.is_terminal() || replayed_terminal {
        let fresh = match state.store.get_mission(mission_id).await {
            Ok(Some(fresh)) => fresh,
            _ => mission,
        };
        let _ = send_envelope(&mut sender, &status_envelope(&fresh)).await;
        let _ = sender.send(Message::Close(None)).await;
        state.bus.unsubscribe(&topic, &sub);
        return;
    }

    loop {
        tokio::select! {
            event = sub.recv() => {
                // Events already replayed (or re-delivered by the
                // at-least-once outbox) are filtered by sequence.
                if event.seq <= last_seq {
                    continue;
                }
                let terminal = event.event_type.is_terminal();
                if send_envelope(&mut sender, &Envelope::mission_event(&event)).await.is_err() {
                    break;
                }
                last_seq = event.seq;

                if terminal {
                    match state.store.get_mission(mission_id).await {
                        Ok(Some(fresh)) => {
                            let _ = send_envelope(&mut sender, &status_envelope(&fresh)).await;
                        }
                        _ => tracing::warn!(mission_id, "terminal event for unknown mission"),
                    }
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
            msg = receiver.next() => {
                match msg {
                    None | Some(Ok(Message::Close(_))) | Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    state.bus.unsubscribe(&topic, &sub);
    tracing::debug!(mission_id, "mission ws closed");
}
