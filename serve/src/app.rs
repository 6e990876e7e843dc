//! Application state and router: dependencies are built once at process
//! start and threaded through explicitly.

use std::sync::Arc;
use std::time::Duration;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use helm::agents::AgentSet;
use helm::bus::EventBus;
use helm::supervisor::EngineConfig;
use mission_event::StoredEvent;
use mission_store::{MissionStore, OutboxWorker, StoreError};
use tokio::task::JoinHandle;

use crate::auth::{ClaimsDirectory, TokenCodec, UserDirectory};
use crate::chat::{admin_chat_ws, customer_chat_ws, ChatRpc, MissionChatRpc};
use crate::idempotency::{idempotency_layer, IdempotencyStore};
use crate::mission_ws::mission_ws;
use crate::missions::{cancel_mission, create_mission, get_mission, get_mission_events, health};
use crate::runner::MissionRunner;

pub struct AppState {
    pub settings: config::Settings,
    pub store: Arc<MissionStore>,
    pub bus: Arc<EventBus<StoredEvent>>,
    pub runner: Arc<MissionRunner>,
    pub codec: TokenCodec,
    pub users: Arc<dyn UserDirectory>,
    pub idempotency: Arc<IdempotencyStore>,
    pub chat: Arc<dyn ChatRpc>,
}

impl AppState {
    /// Builds the full dependency graph with the baseline agent roster.
    pub fn build(settings: config::Settings) -> Result<Arc<Self>, StoreError> {
        Self::build_with_agents(settings, AgentSet::baseline())
    }

    /// Same, with a caller-supplied roster (LLM-backed or scripted).
    pub fn build_with_agents(
        settings: config::Settings,
        agents: AgentSet,
    ) -> Result<Arc<Self>, StoreError> {
        let store = Arc::new(MissionStore::new(&settings.database_path)?);
        let bus = Arc::new(EventBus::new(settings.bus_queue_capacity));
        let engine_config = EngineConfig {
            max_iterations: settings.max_iterations,
            approval_threshold: settings.approval_threshold,
            recursion_limit: settings.recursion_limit,
            agent_timeout: Duration::from_secs(settings.llm_timeout_secs),
        };
        let runner = Arc::new(MissionRunner::new(
            Arc::clone(&store),
            agents,
            engine_config,
        ));
        let chat: Arc<dyn ChatRpc> = Arc::new(MissionChatRpc::new(
            Arc::clone(&store),
            Arc::clone(&runner),
            Arc::clone(&bus),
            settings.model_api_key.clone(),
        ));
        let codec = TokenCodec::new(settings.secret_key.clone());
        let idempotency = Arc::new(IdempotencyStore::new(
            Duration::from_secs(settings.idempotency_processing_ttl_secs),
            Duration::from_secs(settings.idempotency_cached_ttl_secs),
        ));

        Ok(Arc::new(Self {
            settings,
            store,
            bus,
            runner,
            codec,
            users: Arc::new(ClaimsDirectory),
            idempotency,
            chat,
        }))
    }

    /// Spawns the outbox worker for this state's store and bus.
    pub fn spawn_outbox_worker(self: &Arc<Self>) -> JoinHandle<()> {
        OutboxWorker::new(
            Arc::clone(&self.store),
            Arc::clone(&self.bus),
            Duration::from_secs(self.settings.outbox_interval_secs),
            self.settings.outbox_batch_size,
            self.settings.outbox_retry_cap,
        )
        .spawn()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/missions", post(create_mission))
        .route("/missions/:id", get(get_mission))
        .route("/missions/:id/events", get(get_mission_events))
        .route("/missions/:id/cancel", post(cancel_mission))
        .route("/missions/:id/ws", get(mission_ws))
        .route("/api/chat/ws", get(customer_chat_ws))
        .route("/admin/api/chat/ws", get(admin_chat_ws))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            idempotency_layer,
        ))
        .with_state(state)
}
