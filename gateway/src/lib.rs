//! API gateway for the Helm platform (axum).
//!
//! Routes requests to backend services by longest path prefix, probes
//! their health on an interval, retries transient proxy failures, and
//! aggregates platform health at `/health`.
//!
//! **Public API**: [`run_gateway`], [`run_gateway_on_listener`],
//! [`GatewayState`], [`router`].

mod config;
mod proxy;
mod registry;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::info;

pub use crate::config::{match_route, rewrite_path, GatewayConfig, RouteRule, ServiceEndpoint};
pub use registry::{ServiceHealth, ServiceRegistry};

pub struct GatewayState {
    pub config: GatewayConfig,
    pub registry: Arc<ServiceRegistry>,
    pub http: reqwest::Client,
}

impl GatewayState {
    pub fn new(config: GatewayConfig) -> Arc<Self> {
        let registry = Arc::new(ServiceRegistry::new(config.services.clone()));
        Arc::new(Self {
            config,
            registry,
            http: reqwest::Client::new(),
        })
    }
}

/// `GET /health`: gateway plus per-service health with a summary.
async fn gateway_health(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    let services_health = state.registry.check_all_health().await;
    let healthy = services_health.values().filter(|h| h.healthy).count();
    let total = services_health.len();
    let percentage = if total > 0 {
        healthy as f64 / total as f64 * 100.0
    } else {
        0.0
    };

    Json(json!({
        "gateway": "healthy",
        "services": services_health,
        "summary": {
            "healthy": healthy,
            "total": total,
            "percentage": percentage,
        },
    }))
}

/// `GET /services`: the static registry.
async fn list_services(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    let services: Vec<Value> = state
        .registry
        .list_services()
        .map(|svc| {
            json!({
                "name": svc.name,
                "base_url": svc.base_url,
                "health_path": svc.health_path,
                "timeout_secs": svc.timeout.as_secs(),
                "retry_count": svc.retry_count,
            })
        })
        .collect();
    let count = services.len();
    Json(json!({ "services": services, "count": count }))
}

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(gateway_health))
        .route("/services", get(list_services))
        .fallback(proxy::proxy_handler)
        .with_state(state)
}

/// Binds the configured gateway address and serves until shutdown, with
/// the periodic health probe task running alongside.
pub async fn run_gateway(
    settings: ::config::Settings,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let gateway_config = GatewayConfig::for_control_plane(
        &settings.control_plane_url,
        Duration::from_secs(settings.proxy_timeout_secs),
    );
    let state = GatewayState::new(gateway_config);
    let probes = Arc::clone(&state.registry)
        .spawn_probe_loop(Duration::from_secs(settings.health_probe_interval_secs));

    let listener = TcpListener::bind(&settings.gateway_bind_addr).await?;
    let result = run_gateway_on_listener(listener, state).await;
    probes.abort();
    result
}

/// Serves on an existing listener; used by tests.
pub async fn run_gateway_on_listener(
    listener: TcpListener,
    state: Arc<GatewayState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("gateway listening on http://{}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}
