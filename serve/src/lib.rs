//! Control-plane server for Helm (axum).
//!
//! Hosts the authoritative mission API (the "single brain"), the mission
//! streaming WebSocket with gap-free catch-up, the unified chat WebSocket
//! authority, and the idempotency middleware.
//!
//! **Public API**: [`run_serve`], [`run_serve_on_listener`], [`AppState`],
//! [`router`].

mod app;
mod auth;
mod chat;
mod error;
mod idempotency;
mod mission_ws;
mod missions;
mod runner;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

pub use app::{router, AppState};
pub use auth::{claims_for, Claims, ClaimsDirectory, TokenCodec, UserDirectory, UserInfo};
pub use chat::{ChatPolicy, ChatRequest, ChatRpc, MissionChatRpc};
pub use idempotency::IdempotencyStore;
pub use runner::MissionRunner;

/// Binds the configured address and serves until shutdown. Spawns the
/// outbox worker alongside the listener.
pub async fn run_serve(
    settings: config::Settings,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(&settings.bind_addr).await?;
    let state = AppState::build(settings)?;
    let worker = state.spawn_outbox_worker();
    let result = run_serve_on_listener(listener, state).await;
    worker.abort();
    result
}

/// Serves on an existing listener. Used by tests (bind 127.0.0.1:0, pass
/// the listener in); the caller owns the outbox worker's lifecycle.
pub async fn run_serve_on_listener(
    listener: TcpListener,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("control plane listening on http://{}", addr);
    let app = router(state);
    axum::serve(listener, app).await?;
    Ok(())
}
