//! Mission runner: drives one supervisor run per mission and maps the
//! final state onto the mission's terminal status.
//!
//! The runner is the only code path that executes missions; everything
//! else (HTTP, chat) goes through it, which is what keeps the brain single.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use helm::agents::AgentSet;
use helm::supervisor::{
    CancelFlag, EngineConfig, MissionObserver, RunSeed, RunVerdict, SupervisorEngine,
};
use helm::{Mission, MissionOutcome, MissionStatus, TaskStatus};
use mission_event::EventType;
use mission_store::MissionStore;
use serde_json::Value;

/// Persists brain events through the state manager; every emit is one
/// transaction appending the event and its outbox row.
struct StoreObserver {
    store: Arc<MissionStore>,
    mission_id: i64,
}

#[async_trait]
impl MissionObserver for StoreObserver {
    async fn emit(&self, event_type: EventType, payload: Value) {
        if let Err(e) = self
            .store
            .append_event(self.mission_id, event_type.clone(), payload)
            .await
        {
            tracing::error!(
                mission_id = self.mission_id,
                event_type = %event_type,
                error = %e,
                "failed to persist brain event"
            );
        }
    }
}

pub struct MissionRunner {
    store: Arc<MissionStore>,
    agents: AgentSet,
    config: EngineConfig,
    cancels: DashMap<i64, CancelFlag>,
}

impl MissionRunner {
    pub fn new(store: Arc<MissionStore>, agents: AgentSet, config: EngineConfig) -> Self {
        Self {
            store,
            agents,
            config,
            cancels: DashMap::new(),
        }
    }

    /// Flips the cooperative cancel flag for a running mission.
    pub fn cancel(&self, mission_id: i64) {
        if let Some(flag) = self.cancels.get(&mission_id) {
            flag.cancel();
        }
    }

    /// Starts the supervisor run in the background. Pending missions only;
    /// the run guard makes a second concurrent start a no-op.
    pub fn spawn(self: &Arc<Self>, mission: Mission) {
        if mission.status != MissionStatus::Pending {
            tracing::debug!(
                mission_id = mission.id,
                status = %mission.status,
                "not spawning run for non-pending mission"
            );
            return;
        }
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            runner.run_mission(mission).await;
        });
    }

    async fn run_mission(self: Arc<Self>, mission: Mission) {
        let mission_id = mission.id;
        if !self.store.try_begin_run(mission_id) {
            tracing::warn!(mission_id, "supervisor run already active, skipping");
            return;
        }

        let cancel = self
            .cancels
            .entry(mission_id)
            .or_insert_with(CancelFlag::new)
            .clone();
        if mission.cancel_requested {
            cancel.cancel();
        }

        self.drive(mission, cancel).await;

        self.store.end_run(mission_id);
        self.cancels.remove(&mission_id);
    }

    async fn drive(&self, mission: Mission, cancel: CancelFlag) {
        let mission_id = mission.id;
        if let Err(e) = self
            .store
            .update_status(mission_id, MissionStatus::Running, None)
            .await
        {
            tracing::error!(mission_id, error = %e, "failed to mark mission running");
            return;
        }

        let observer = Arc::new(StoreObserver {
            store: Arc::clone(&self.store),
            mission_id,
        });
        let engine = SupervisorEngine::new(self.agents.clone(), self.config, observer);
        let seed = RunSeed {
            mission_id,
            objective: mission.objective.clone(),
            context: mission.context.clone(),
            cancel,
        };

        let completion = match engine.run(seed).await {
            Ok(state) => {
                if let Some(plan) = &state.plan {
                    if let Err(e) = self.store.record_tasks(mission_id, plan).await {
                        tracing::error!(mission_id, error = %e, "failed to record tasks");
                    }
                }
                if let Some(execution) = &state.execution {
                    for (ordinal, result) in execution.results.iter().enumerate() {
                        let status = match result.status.as_str() {
                            "success" => TaskStatus::Success,
                            "skipped" => TaskStatus::Skipped,
                            _ => TaskStatus::Failed,
                        };
                        if let Err(e) = self
                            .store
                            .append_task_result(
                                mission_id,
                                ordinal as i64,
                                status,
                                result.result.clone(),
                                result.error.clone(),
                            )
                            .await
                        {
                            tracing::error!(mission_id, ordinal, error = %e, "failed to record task result");
                        }
                    }
                }

                match RunVerdict::from_state(&state) {
                    RunVerdict::Approved { answer } => {
                        let summary = answer.unwrap_or_else(|| "Objective completed.".to_string());
                        (MissionOutcome::Success, Some(summary), None)
                    }
                    RunVerdict::IterationCapped {
                        has_execution: true,
                    } => {
                        let summary = state
                            .audit
                            .as_ref()
                            .map(|a| a.feedback.clone())
                            .unwrap_or_else(|| "Iteration cap reached.".to_string());
                        (
                            MissionOutcome::PartialSuccess,
                            Some(summary),
                            Some("iteration_cap".to_string()),
                        )
                    }
                    RunVerdict::IterationCapped {
                        has_execution: false,
                    } => (
                        MissionOutcome::Failed,
                        None,
                        Some("no_usable_execution".to_string()),
                    ),
                    RunVerdict::LoopStopped { .. } => {
                        (MissionOutcome::Failed, None, Some("loop_stopped".to_string()))
                    }
                    RunVerdict::Cancelled => {
                        (MissionOutcome::Failed, None, Some("cancelled".to_string()))
                    }
                    RunVerdict::AuditFailed { message } => {
                        (MissionOutcome::Failed, None, Some(message))
                    }
                    RunVerdict::Incomplete => (
                        MissionOutcome::Failed,
                        None,
                        Some("run ended without an audit".to_string()),
                    ),
                }
            }
            Err(e) => {
                tracing::error!(mission_id, error = %e, "supervisor run failed");
                (MissionOutcome::Failed, None, Some(e.to_string()))
            }
        };

        let (outcome, summary, reason) = completion;
        if let Err(e) = self
            .store
            .complete_mission(mission_id, outcome, summary, reason)
            .await
        {
            tracing::error!(mission_id, error = %e, "failed to complete mission");
        }
    }
}
