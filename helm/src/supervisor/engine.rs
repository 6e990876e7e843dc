//! Supervisor engine: wires the agent roster into the state graph and runs
//! one mission's cognitive loop.
//!
//! The engine owns no persistence. Brain events flow through the
//! [`MissionObserver`] seam; the server wires that to the state store so
//! every event is persisted and published through the outbox.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mission_event::EventType;
use serde_json::Value;

use crate::agents::AgentSet;
use crate::graph::{GraphError, StateGraph, END, START};
use crate::state::MissionState;
use crate::supervisor::nodes::{
    ArchitectNode, AuditorNode, ContextualizerNode, LoopControllerNode, OperatorNode,
    StrategistNode, SupervisorNode,
};
use crate::supervisor::policy::SupervisorPolicy;

/// Sink for brain events. Implementations must be cheap and non-blocking
/// from the graph's perspective; persistence failures are theirs to log.
#[async_trait]
pub trait MissionObserver: Send + Sync {
    async fn emit(&self, event_type: EventType, payload: Value);
}

/// Observer that discards everything; for tests and dry runs.
pub struct NullObserver;

#[async_trait]
impl MissionObserver for NullObserver {
    async fn emit(&self, _event_type: EventType, _payload: Value) {}
}

/// Cooperative cancellation flag checked by the supervisor between steps.
/// The in-flight agent step finishes; there is no forced termination.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Engine policy constants.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Default iteration cap when the request context does not set one.
    pub max_iterations: u32,
    pub approval_threshold: f64,
    pub recursion_limit: usize,
    /// Deadline for one agent invocation (the LLM-call timeout).
    pub agent_timeout: std::time::Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            approval_threshold: 7.0,
            recursion_limit: 100,
            agent_timeout: std::time::Duration::from_secs(300),
        }
    }
}

/// Everything needed to start one run.
#[derive(Clone)]
pub struct RunSeed {
    pub mission_id: i64,
    pub objective: String,
    pub context: Value,
    pub cancel: CancelFlag,
}

/// How a finished run should be mapped onto the mission's terminal state.
#[derive(Clone, Debug)]
pub enum RunVerdict {
    /// Audit approved the output.
    Approved { answer: Option<String> },
    /// Audit never approved and the iteration cap stopped re-planning.
    IterationCapped { has_execution: bool },
    /// Plan-hash loop detection stopped the run.
    LoopStopped { reason: String },
    /// Cancellation was requested and honoured at a step boundary.
    Cancelled,
    /// The auditor itself failed; terminal.
    AuditFailed { message: String },
    /// The run ended without an audit (should not happen under the policy).
    Incomplete,
}

impl RunVerdict {
    pub fn from_state(state: &MissionState) -> Self {
        if state.flag("cancelled") {
            return RunVerdict::Cancelled;
        }
        if state.flag("audit_error") {
            let message = state
                .audit
                .as_ref()
                .map(|a| a.feedback.clone())
                .unwrap_or_else(|| "audit failed".to_string());
            return RunVerdict::AuditFailed { message };
        }
        if state.loop_detected {
            return RunVerdict::LoopStopped {
                reason: state
                    .loop_reason
                    .clone()
                    .unwrap_or_else(|| "loop_stopped".to_string()),
            };
        }
        match &state.audit {
            Some(audit) if audit.approved => RunVerdict::Approved {
                answer: state.answer.clone(),
            },
            Some(_) => RunVerdict::IterationCapped {
                has_execution: state.execution.is_some(),
            },
            None => RunVerdict::Incomplete,
        }
    }
}

/// Builds and runs the supervisor graph for missions.
pub struct SupervisorEngine {
    agents: AgentSet,
    config: EngineConfig,
    observer: Arc<dyn MissionObserver>,
}

impl SupervisorEngine {
    pub fn new(agents: AgentSet, config: EngineConfig, observer: Arc<dyn MissionObserver>) -> Self {
        Self {
            agents,
            config,
            observer,
        }
    }

    /// Runs the full cognitive loop and returns the final shared state.
    ///
    /// Not re-entrant per mission: callers hold the store's run guard so a
    /// mission has at most one active supervisor run.
    pub async fn run(&self, seed: RunSeed) -> Result<MissionState, GraphError> {
        let mut state = MissionState::new(seed.mission_id, seed.objective, seed.context.clone());
        state.max_iterations = resolve_max_iterations(&seed.context, self.config.max_iterations);
        if let Some(constraints) = seed.context.get("constraints").and_then(Value::as_array) {
            state.constraints = constraints
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
        }
        if let Some(priority) = seed.context.get("priority").and_then(Value::as_str) {
            state.priority = priority.to_string();
        }

        let graph = self.build_graph(seed.cancel)?;
        graph.invoke(state).await
    }

    fn build_graph(
        &self,
        cancel: CancelFlag,
    ) -> Result<crate::graph::CompiledGraph<MissionState>, GraphError> {
        let policy = SupervisorPolicy {
            approval_threshold: self.config.approval_threshold,
        };
        let observer = Arc::clone(&self.observer);

        let mut graph =
            StateGraph::<MissionState>::new().with_recursion_limit(self.config.recursion_limit);
        graph.add_node(
            "supervisor",
            Arc::new(SupervisorNode {
                policy,
                observer: Arc::clone(&observer),
                cancel,
            }),
        );
        graph.add_node(
            "contextualizer",
            Arc::new(ContextualizerNode {
                deadline: self.config.agent_timeout,
                agent: Arc::clone(&self.agents.contextualizer),
                observer: Arc::clone(&observer),
            }),
        );
        graph.add_node(
            "strategist",
            Arc::new(StrategistNode {
                deadline: self.config.agent_timeout,
                agent: Arc::clone(&self.agents.strategist),
                observer: Arc::clone(&observer),
            }),
        );
        graph.add_node(
            "architect",
            Arc::new(ArchitectNode {
                deadline: self.config.agent_timeout,
                agent: Arc::clone(&self.agents.architect),
                observer: Arc::clone(&observer),
            }),
        );
        graph.add_node(
            "operator",
            Arc::new(OperatorNode {
                deadline: self.config.agent_timeout,
                agent: Arc::clone(&self.agents.operator),
                observer: Arc::clone(&observer),
            }),
        );
        graph.add_node(
            "auditor",
            Arc::new(AuditorNode {
                deadline: self.config.agent_timeout,
                agent: Arc::clone(&self.agents.auditor),
                observer: Arc::clone(&observer),
            }),
        );
        graph.add_node(
            "loop_controller",
            Arc::new(LoopControllerNode {
                observer: Arc::clone(&observer),
            }),
        );

        graph.add_edge(START, "supervisor");
        for worker in [
            "contextualizer",
            "strategist",
            "architect",
            "operator",
            "auditor",
            "loop_controller",
        ] {
            graph.add_edge(worker, "supervisor");
        }

        let path_map: HashMap<String, String> = [
            ("contextualizer", "contextualizer"),
            ("strategist", "strategist"),
            ("architect", "architect"),
            ("operator", "operator"),
            ("auditor", "auditor"),
            ("loop_controller", "loop_controller"),
            ("end", END),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        graph.add_conditional_edges(
            "supervisor",
            Arc::new(|state: &MissionState| {
                state
                    .next_step
                    .clone()
                    .unwrap_or_else(|| "end".to_string())
            }),
            Some(path_map),
        );

        graph.compile()
    }
}

/// Iteration cap from the request context, clamped to 1..=5.
fn resolve_max_iterations(context: &Value, default: u32) -> u32 {
    context
        .get("max_iterations")
        .and_then(Value::as_u64)
        .map(|v| v.min(5).max(1) as u32)
        .unwrap_or(default)
        .clamp(1, 5)
}
