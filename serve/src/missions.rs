//! Mission HTTP API: the authoritative front door for starting and
//! inspecting missions.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use helm::MissionView;
use mission_event::StoredEvent;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct MissionCreate {
    pub objective: String,
    #[serde(default)]
    pub context: Option<Value>,
    #[serde(default)]
    pub priority: Option<i64>,
}

/// `POST /missions`: creates the mission and starts its supervisor run.
/// `X-Correlation-ID` doubles as the store-level idempotency key; absent,
/// one is generated so retries inside the platform stay traceable.
pub async fn create_mission(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<MissionCreate>,
) -> Result<Json<MissionView>, ApiError> {
    if body.objective.trim().is_empty() {
        return Err(ApiError::Validation("objective is required".to_string()));
    }

    let correlation_id = headers
        .get("X-Correlation-ID")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    tracing::info!(correlation_id = %correlation_id, "creating mission");

    let mut context = body.context.unwrap_or_else(|| json!({}));
    if !context.is_object() {
        return Err(ApiError::Validation("context must be an object".to_string()));
    }
    if let (Some(priority), Some(map)) = (body.priority, context.as_object_mut()) {
        map.entry("priority").or_insert(json!(priority));
    }

    let initiator_id = context
        .get("initiator_id")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let mission = state
        .store
        .create_mission(&body.objective, context, initiator_id, Some(&correlation_id))
        .await?;

    state.runner.spawn(mission.clone());
    Ok(Json(MissionView::from_mission(&mission)))
}

/// `GET /missions/{id}`: the single source of truth for mission state.
pub async fn get_mission(
    State(state): State<Arc<AppState>>,
    Path(mission_id): Path<i64>,
) -> Result<Json<MissionView>, ApiError> {
    let mission = state
        .store
        .get_mission(mission_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Mission not found".to_string()))?;
    Ok(Json(MissionView::from_mission(&mission)))
}

/// `GET /missions/{id}/events`: the persisted, ordered event log.
pub async fn get_mission_events(
    State(state): State<Arc<AppState>>,
    Path(mission_id): Path<i64>,
) -> Result<Json<Vec<StoredEvent>>, ApiError> {
    if state.store.get_mission(mission_id).await?.is_none() {
        return Err(ApiError::NotFound("Mission not found".to_string()));
    }
    let events = state.store.get_mission_events(mission_id, 0).await?;
    Ok(Json(events))
}

/// `POST /missions/{id}/cancel`: best-effort cooperative cancellation;
/// the current agent step finishes first.
pub async fn cancel_mission(
    State(state): State<Arc<AppState>>,
    Path(mission_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    if state.store.get_mission(mission_id).await?.is_none() {
        return Err(ApiError::NotFound("Mission not found".to_string()));
    }
    let accepted = state.store.request_cancel(mission_id).await?;
    if accepted {
        state.runner.cancel(mission_id);
    }
    Ok(Json(json!({ "cancelled": accepted })))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
