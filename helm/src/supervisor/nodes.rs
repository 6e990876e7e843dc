//! Graph nodes for the supervisor run.
//!
//! Worker nodes wrap one agent each: emit `phase_start`, invoke the agent
//! over the collaboration context, fold the context back into shared state,
//! emit `phase_completed`. Agent errors are absorbed here (recorded in
//! shared memory and emitted as `phase_error`), so the graph itself only
//! fails on structural problems.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mission_event::{EventType, LoopStartPayload, PhasePayload, RunStartedPayload};
use serde_json::{json, Value};

use crate::agents::{
    AgentError, Architect, Audit, Auditor, CollabContext, Contextualizer, Operator, Strategist,
};
use crate::graph::{GraphError, Node};
use crate::state::MissionState;
use crate::supervisor::engine::{CancelFlag, MissionObserver};
use crate::supervisor::plan_hash::{canonical_plan_hash, is_repeat};
use crate::supervisor::policy::SupervisorPolicy;

fn payload<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Bounds one agent invocation (the LLM-call deadline). An elapsed
/// deadline is an ordinary agent failure, absorbed like any other.
async fn with_deadline<T>(
    deadline: Duration,
    fut: impl Future<Output = Result<T, AgentError>>,
) -> Result<T, AgentError> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(AgentError::Failed(format!(
            "agent timed out after {}s",
            deadline.as_secs()
        ))),
    }
}

fn phase(phase: &str, agent: &str, run_id: String) -> PhasePayload {
    PhasePayload {
        phase: phase.to_string(),
        agent: agent.to_string(),
        run_id,
        error: None,
    }
}

async fn emit_phase_error(
    observer: &Arc<dyn MissionObserver>,
    state: &mut MissionState,
    phase_name: &str,
    agent: &str,
    err: &AgentError,
) {
    let mut p = phase(phase_name, agent, state.run_id());
    p.error = Some(err.to_string());
    observer.emit(EventType::PhaseError, payload(&p)).await;
    state.shared.insert(
        format!("phase_error:{phase_name}"),
        Value::String(err.to_string()),
    );
    state.record(agent, json!({ "status": "error", "error": err.to_string() }));
    tracing::warn!(phase = phase_name, agent, error = %err, "agent phase failed");
}

/// The supervisor: announces run boundaries and stamps the routing decision
/// into `next_step` for the conditional router.
pub(super) struct SupervisorNode {
    pub(super) policy: SupervisorPolicy,
    pub(super) observer: Arc<dyn MissionObserver>,
    pub(super) cancel: CancelFlag,
}

#[async_trait]
impl Node<MissionState> for SupervisorNode {
    fn id(&self) -> &str {
        "supervisor"
    }

    async fn run(&self, mut state: MissionState) -> Result<MissionState, GraphError> {
        let announced = state
            .shared
            .get("announced_iteration")
            .and_then(Value::as_u64);
        if announced != Some(u64::from(state.iteration)) {
            self.observer
                .emit(
                    EventType::RunStarted,
                    payload(&RunStartedPayload {
                        run_id: state.run_id(),
                        iteration: state.iteration,
                    }),
                )
                .await;
            state.shared.insert(
                "announced_iteration".to_string(),
                Value::from(u64::from(state.iteration)),
            );
        }

        if self.cancel.is_cancelled() {
            state.set_flag("cancelled", true);
            state.next_step = Some("end".to_string());
            state.record("supervisor", json!({ "status": "cancelled" }));
            return Ok(state);
        }

        let decision = self.policy.decide(&state);
        state.next_step = Some(decision.route.node_id().to_string());
        state.record(
            "supervisor",
            json!({
                "status": "routed",
                "next_step": decision.route.node_id(),
                "reason": decision.reason,
            }),
        );
        Ok(state)
    }
}

pub(super) struct ContextualizerNode {
    pub(super) deadline: Duration,
    pub(super) agent: Arc<dyn Contextualizer>,
    pub(super) observer: Arc<dyn MissionObserver>,
}

#[async_trait]
impl Node<MissionState> for ContextualizerNode {
    fn id(&self) -> &str {
        "contextualizer"
    }

    async fn run(&self, mut state: MissionState) -> Result<MissionState, GraphError> {
        self.observer
            .emit(
                EventType::PhaseStart,
                payload(&phase("RESEARCH", "Contextualizer", state.run_id())),
            )
            .await;

        match with_deadline(self.deadline, self.agent.enrich(&state.objective, &state.context)).await {
            Ok(enrichment) => {
                self.observer
                    .emit(
                        EventType::PhaseCompleted,
                        payload(&phase("RESEARCH", "Contextualizer", state.run_id())),
                    )
                    .await;
                state.shared.insert(
                    "refined_objective".to_string(),
                    Value::String(enrichment.refined_objective.clone()),
                );
                state
                    .shared
                    .insert("metadata_filters".to_string(), enrichment.metadata_filters);
                state.shared.insert(
                    "knowledge_snippets".to_string(),
                    json!(enrichment.snippets),
                );
                state.set_flag("context_enriched", true);
                state.set_flag("research_performed", true);
                state.record(
                    "contextualizer",
                    json!({
                        "status": "enriched",
                        "refined_objective": enrichment.refined_objective,
                        "snippets_count": enrichment.snippets.len(),
                    }),
                );
            }
            Err(err) => {
                emit_phase_error(&self.observer, &mut state, "RESEARCH", "Contextualizer", &err)
                    .await;
            }
        }
        Ok(state)
    }
}

pub(super) struct StrategistNode {
    pub(super) deadline: Duration,
    pub(super) agent: Arc<dyn Strategist>,
    pub(super) observer: Arc<dyn MissionObserver>,
}

#[async_trait]
impl Node<MissionState> for StrategistNode {
    fn id(&self) -> &str {
        "strategist"
    }

    async fn run(&self, mut state: MissionState) -> Result<MissionState, GraphError> {
        self.observer
            .emit(
                EventType::PhaseStart,
                payload(&phase("PLANNING", "Strategist", state.run_id())),
            )
            .await;

        let mut ctx = CollabContext::from_memory(state.shared.clone());
        let objective = ctx
            .get_str("refined_objective")
            .unwrap_or(&state.objective)
            .to_string();

        match with_deadline(self.deadline, self.agent.create_plan(&objective, &mut ctx)).await {
            Ok(plan) => {
                ctx.update("last_plan", payload(&plan));
                state.shared = ctx.into_memory();

                let hash = canonical_plan_hash(&plan);
                if is_repeat(&state.plan_hashes, &hash) {
                    state.plan = Some(plan);
                    state.loop_detected = true;
                    state.loop_reason =
                        Some("identical plan produced in consecutive runs".to_string());
                    state.record(
                        "strategist",
                        json!({ "status": "loop_detected", "plan_hash": hash }),
                    );
                } else {
                    state.plan_hashes.push(hash);
                    state.plan = Some(plan);
                    state.record("strategist", json!({ "status": "planned" }));
                    self.observer
                        .emit(
                            EventType::PhaseCompleted,
                            payload(&phase("PLANNING", "Strategist", state.run_id())),
                        )
                        .await;
                }
            }
            Err(err) => {
                state.shared = ctx.into_memory();
                emit_phase_error(&self.observer, &mut state, "PLANNING", "Strategist", &err).await;
            }
        }
        Ok(state)
    }
}

pub(super) struct ArchitectNode {
    pub(super) deadline: Duration,
    pub(super) agent: Arc<dyn Architect>,
    pub(super) observer: Arc<dyn MissionObserver>,
}

#[async_trait]
impl Node<MissionState> for ArchitectNode {
    fn id(&self) -> &str {
        "architect"
    }

    async fn run(&self, mut state: MissionState) -> Result<MissionState, GraphError> {
        if state.loop_detected {
            state.record("architect", json!({ "status": "skipped_due_to_loop" }));
            return Ok(state);
        }
        let Some(plan) = state.plan.clone() else {
            state.record("architect", json!({ "status": "skipped_no_plan" }));
            return Ok(state);
        };

        self.observer
            .emit(
                EventType::PhaseStart,
                payload(&phase("DESIGN", "Architect", state.run_id())),
            )
            .await;

        let mut ctx = CollabContext::from_memory(state.shared.clone());
        match with_deadline(self.deadline, self.agent.design_solution(&plan, &mut ctx)).await {
            Ok(design) => {
                ctx.update("last_design", design.clone());
                state.shared = ctx.into_memory();
                state.design = Some(design);
                state.record("architect", json!({ "status": "designed" }));
                self.observer
                    .emit(
                        EventType::PhaseCompleted,
                        payload(&phase("DESIGN", "Architect", state.run_id())),
                    )
                    .await;
            }
            Err(err) => {
                state.shared = ctx.into_memory();
                emit_phase_error(&self.observer, &mut state, "DESIGN", "Architect", &err).await;
            }
        }
        Ok(state)
    }
}

pub(super) struct OperatorNode {
    pub(super) deadline: Duration,
    pub(super) agent: Arc<dyn Operator>,
    pub(super) observer: Arc<dyn MissionObserver>,
}

#[async_trait]
impl Node<MissionState> for OperatorNode {
    fn id(&self) -> &str {
        "operator"
    }

    async fn run(&self, mut state: MissionState) -> Result<MissionState, GraphError> {
        if state.loop_detected {
            state.record("operator", json!({ "status": "skipped_due_to_loop" }));
            return Ok(state);
        }
        let design = state.design.clone().unwrap_or(Value::Null);

        self.observer
            .emit(
                EventType::PhaseStart,
                payload(&phase("EXECUTION", "Operator", state.run_id())),
            )
            .await;

        let mut ctx = CollabContext::from_memory(state.shared.clone());
        match with_deadline(self.deadline, self.agent.execute_tasks(&design, &mut ctx)).await {
            Ok(execution) => {
                ctx.update("last_execution", payload(&execution));
                state.shared = ctx.into_memory();
                state.execution = Some(execution);
                state.record("operator", json!({ "status": "executed" }));
                self.observer
                    .emit(
                        EventType::PhaseCompleted,
                        payload(&phase("EXECUTION", "Operator", state.run_id())),
                    )
                    .await;
            }
            Err(err) => {
                state.shared = ctx.into_memory();
                emit_phase_error(&self.observer, &mut state, "EXECUTION", "Operator", &err).await;
            }
        }
        Ok(state)
    }
}

pub(super) struct AuditorNode {
    pub(super) deadline: Duration,
    pub(super) agent: Arc<dyn Auditor>,
    pub(super) observer: Arc<dyn MissionObserver>,
}

#[async_trait]
impl Node<MissionState> for AuditorNode {
    fn id(&self) -> &str {
        "auditor"
    }

    async fn run(&self, mut state: MissionState) -> Result<MissionState, GraphError> {
        if state.loop_detected {
            state.audit = Some(Audit {
                approved: false,
                score: 0.0,
                feedback: "Run stopped: identical plan produced in consecutive runs.".to_string(),
                final_response: None,
            });
            state.record("auditor", json!({ "status": "loop_stopped" }));
            return Ok(state);
        }

        let Some(execution) = state.execution.clone() else {
            state.record("auditor", json!({ "status": "skipped_no_execution" }));
            return Ok(state);
        };

        self.observer
            .emit(
                EventType::PhaseStart,
                payload(&phase("REFLECTION", "Auditor", state.run_id())),
            )
            .await;

        let mut ctx = CollabContext::from_memory(state.shared.clone());
        match with_deadline(
            self.deadline,
            self.agent.review_work(&execution, &state.objective, &mut ctx),
        )
        .await
        {
            Ok(audit) => {
                ctx.update("last_audit", payload(&audit));
                state.shared = ctx.into_memory();
                if let Some(answer) = &audit.final_response {
                    state.answer = Some(answer.clone());
                }
                state.audit = Some(audit);
                state.record("auditor", json!({ "status": "audited" }));
                self.observer
                    .emit(
                        EventType::PhaseCompleted,
                        payload(&phase("REFLECTION", "Auditor", state.run_id())),
                    )
                    .await;
            }
            Err(err) => {
                state.shared = ctx.into_memory();
                emit_phase_error(&self.observer, &mut state, "REFLECTION", "Auditor", &err).await;
                // Auditor failure is terminal: record a rejected audit so the
                // policy ends the run instead of retrying the review.
                state.set_flag("audit_error", true);
                state.audit = Some(Audit {
                    approved: false,
                    score: 0.0,
                    feedback: format!("Audit failed: {err}"),
                    final_response: None,
                });
            }
        }
        Ok(state)
    }
}

pub(super) struct LoopControllerNode {
    pub(super) observer: Arc<dyn MissionObserver>,
}

#[async_trait]
impl Node<MissionState> for LoopControllerNode {
    fn id(&self) -> &str {
        "loop_controller"
    }

    async fn run(&self, mut state: MissionState) -> Result<MissionState, GraphError> {
        self.observer
            .emit(
                EventType::PhaseStart,
                payload(&phase("RE-PLANNING", "LoopController", state.run_id())),
            )
            .await;

        let feedback = state
            .audit
            .as_ref()
            .map(|a| a.feedback.clone())
            .unwrap_or_default();

        state.iteration += 1;
        state
            .shared
            .insert("audit_feedback".to_string(), Value::String(feedback));
        state.shared.insert(
            "iteration".to_string(),
            Value::from(u64::from(state.iteration)),
        );

        self.observer
            .emit(
                EventType::LoopStart,
                payload(&LoopStartPayload {
                    iteration: state.iteration,
                    run_id: state.run_id(),
                    chief_agent: "Strategist".to_string(),
                }),
            )
            .await;
        self.observer
            .emit(
                EventType::PhaseCompleted,
                payload(&phase("RE-PLANNING", "LoopController", state.run_id())),
            )
            .await;

        state.plan = None;
        state.design = None;
        state.execution = None;
        state.audit = None;
        state.loop_detected = false;
        state.record(
            "loop_controller",
            json!({ "status": "replan", "iteration": state.iteration }),
        );
        Ok(state)
    }
}
