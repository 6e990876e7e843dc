//! Single-brain dispatch: the one entry point that starts a mission.
//!
//! Exactly one service hosts mission authority. Any front-door code path
//! that looks like it "starts a mission" must proxy here; local execution
//! outside the control plane is forbidden (split-brain prevention).

use serde_json::{json, Value};
use thiserror::Error;

use crate::mission::MissionView;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Operator-level configuration is missing (e.g. model credential);
    /// fail fast with a user-visible message before any network call.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The control plane is unreachable or answered with a server error.
    #[error("control plane unavailable: {0}")]
    Upstream(String),

    #[error("mission not found")]
    NotFound,
}

/// Typed HTTP client for the control plane's mission API.
pub struct ControlPlaneClient {
    base_url: String,
    http: reqwest::Client,
}

impl ControlPlaneClient {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    /// Creates a mission. The idempotency key travels as `X-Correlation-ID`,
    /// so a duplicate submit returns the cached mission view unchanged.
    pub async fn create_mission(
        &self,
        objective: &str,
        context: Value,
        priority: i64,
        idempotency_key: Option<&str>,
    ) -> Result<MissionView, DispatchError> {
        let url = format!("{}/missions", self.base_url);
        let mut request = self.http.post(&url).json(&json!({
            "objective": objective,
            "context": context,
            "priority": priority,
        }));
        if let Some(key) = idempotency_key {
            request = request.header("X-Correlation-ID", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DispatchError::Upstream(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Upstream(format!("{status}: {body}")));
        }
        response
            .json::<MissionView>()
            .await
            .map_err(|e| DispatchError::Upstream(e.to_string()))
    }

    pub async fn get_mission(&self, id: i64) -> Result<MissionView, DispatchError> {
        let url = format!("{}/missions/{id}", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| DispatchError::Upstream(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(DispatchError::NotFound);
        }
        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Upstream(status.to_string()));
        }
        response
            .json::<MissionView>()
            .await
            .map_err(|e| DispatchError::Upstream(e.to_string()))
    }

    pub async fn get_mission_events(&self, id: i64) -> Result<Vec<Value>, DispatchError> {
        let url = format!("{}/missions/{id}/events", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| DispatchError::Upstream(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Upstream(status.to_string()));
        }
        response
            .json::<Vec<Value>>()
            .await
            .map_err(|e| DispatchError::Upstream(e.to_string()))
    }
}

/// Starts a mission through the control plane and returns its transient
/// view. Strict proxy: no local execution.
pub async fn start_mission(
    client: &ControlPlaneClient,
    model_api_key: Option<&str>,
    objective: &str,
    initiator_id: i64,
    context: Option<Value>,
    force_research: bool,
    idempotency_key: Option<&str>,
) -> Result<MissionView, DispatchError> {
    if model_api_key.map_or(true, |k| k.trim().is_empty()) {
        return Err(DispatchError::Configuration(
            "model API key is not configured; missions cannot start".to_string(),
        ));
    }

    let context = build_dispatch_context(context, force_research, initiator_id);
    tracing::info!(objective = %truncate(objective, 50), "delegating mission to control plane");
    client
        .create_mission(objective, context, 1, idempotency_key)
        .await
}

/// Flattens the caller's context and stamps the dispatch-level fields.
fn build_dispatch_context(context: Option<Value>, force_research: bool, initiator_id: i64) -> Value {
    let mut context = match context {
        Some(Value::Object(map)) => Value::Object(map),
        _ => json!({}),
    };
    if let Some(map) = context.as_object_mut() {
        map.insert("initiator_id".to_string(), json!(initiator_id));
        if force_research {
            map.insert("force_research".to_string(), json!(true));
        }
    }
    context
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
