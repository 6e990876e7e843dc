//! Agent contracts and typed artifacts.
//!
//! Each agent is a one-shot function over the collaboration context; the
//! control plane depends only on these traits and the artifact shapes.
//! Model-backed implementations plug in behind the same seam; the
//! [`baseline`] module ships deterministic implementations so the plane
//! runs end-to-end without a model.

mod baseline;
mod context;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

pub use baseline::{
    BaselineArchitect, BaselineAuditor, BaselineContextualizer, BaselineOperator,
    BaselineStrategist,
};
pub use context::CollabContext;

/// Agent invocation error. Caught inside graph nodes and recorded as a
/// `phase_error`; never propagated raw out of the graph.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent failed: {0}")]
    Failed(String),
    #[error("agent cancelled")]
    Cancelled,
}

/// One planned step.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PlanStep {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_hint: Option<String>,
}

/// The strategist's artifact.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub strategy_name: String,
    pub reasoning: String,
    pub steps: Vec<PlanStep>,
}

/// Overall execution verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    PartialFailure,
    Failure,
}

/// Per-step execution result.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The operator's artifact.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Execution {
    pub status: ExecutionStatus,
    pub results: Vec<StepResult>,
}

/// The auditor's artifact.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Audit {
    pub approved: bool,
    pub score: f64,
    pub feedback: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_response: Option<String>,
}

/// The contextualizer's artifact.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Enrichment {
    pub refined_objective: String,
    pub metadata_filters: Value,
    pub snippets: Vec<String>,
}

#[async_trait]
pub trait Strategist: Send + Sync {
    async fn create_plan(
        &self,
        objective: &str,
        ctx: &mut CollabContext,
    ) -> Result<Plan, AgentError>;
}

#[async_trait]
pub trait Architect: Send + Sync {
    async fn design_solution(
        &self,
        plan: &Plan,
        ctx: &mut CollabContext,
    ) -> Result<Value, AgentError>;
}

#[async_trait]
pub trait Operator: Send + Sync {
    async fn execute_tasks(
        &self,
        design: &Value,
        ctx: &mut CollabContext,
    ) -> Result<Execution, AgentError>;
}

#[async_trait]
pub trait Auditor: Send + Sync {
    async fn review_work(
        &self,
        execution: &Execution,
        objective: &str,
        ctx: &mut CollabContext,
    ) -> Result<Audit, AgentError>;
}

#[async_trait]
pub trait Contextualizer: Send + Sync {
    async fn enrich(&self, objective: &str, context: &Value) -> Result<Enrichment, AgentError>;
}

/// The full roster the supervisor engine dispatches to.
#[derive(Clone)]
pub struct AgentSet {
    pub strategist: Arc<dyn Strategist>,
    pub architect: Arc<dyn Architect>,
    pub operator: Arc<dyn Operator>,
    pub auditor: Arc<dyn Auditor>,
    pub contextualizer: Arc<dyn Contextualizer>,
}

impl AgentSet {
    /// Deterministic baseline roster.
    pub fn baseline() -> Self {
        Self {
            strategist: Arc::new(BaselineStrategist),
            architect: Arc::new(BaselineArchitect),
            operator: Arc::new(BaselineOperator),
            auditor: Arc::new(BaselineAuditor::default()),
            contextualizer: Arc::new(BaselineContextualizer),
        }
    }
}
