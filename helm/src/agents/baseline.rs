//! Deterministic baseline agents.
//!
//! These give the control plane a working roster without a model: the plan
//! is derived from the objective, execution echoes the design, and the
//! audit scores execution coverage. Re-plans fold the auditor's feedback
//! into the step descriptions so a genuine re-plan never hashes equal to
//! its predecessor.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    AgentError, Architect, Audit, Auditor, CollabContext, Contextualizer, Enrichment, Execution,
    ExecutionStatus, Operator, Plan, PlanStep, StepResult, Strategist,
};

pub struct BaselineContextualizer;

#[async_trait]
impl Contextualizer for BaselineContextualizer {
    async fn enrich(&self, objective: &str, context: &Value) -> Result<Enrichment, AgentError> {
        let refined = objective.trim().to_string();
        if refined.is_empty() {
            return Err(AgentError::Failed("objective is empty".to_string()));
        }
        Ok(Enrichment {
            refined_objective: refined,
            metadata_filters: context
                .get("metadata")
                .cloned()
                .unwrap_or_else(|| json!({})),
            snippets: Vec::new(),
        })
    }
}

pub struct BaselineStrategist;

#[async_trait]
impl Strategist for BaselineStrategist {
    async fn create_plan(
        &self,
        objective: &str,
        ctx: &mut CollabContext,
    ) -> Result<Plan, AgentError> {
        let objective = ctx
            .get_str("refined_objective")
            .unwrap_or(objective)
            .to_string();
        let feedback = ctx.get_str("audit_feedback").map(str::to_string);

        let mut steps = vec![
            PlanStep {
                name: "gather".to_string(),
                description: format!("Collect inputs relevant to: {objective}"),
                tool_hint: Some("search".to_string()),
            },
            PlanStep {
                name: "synthesize".to_string(),
                description: format!("Work the objective to completion: {objective}"),
                tool_hint: None,
            },
            PlanStep {
                name: "report".to_string(),
                description: "Summarise the outcome for the initiator".to_string(),
                tool_hint: None,
            },
        ];
        if let Some(feedback) = &feedback {
            // Folding feedback in changes the canonical hash on re-plan.
            steps.insert(
                0,
                PlanStep {
                    name: "address_feedback".to_string(),
                    description: format!("Address audit feedback: {feedback}"),
                    tool_hint: None,
                },
            );
        }
        Ok(Plan {
            strategy_name: "direct".to_string(),
            reasoning: format!("Decomposed objective into {} steps", steps.len()),
            steps,
        })
    }
}

pub struct BaselineArchitect;

#[async_trait]
impl Architect for BaselineArchitect {
    async fn design_solution(
        &self,
        plan: &Plan,
        _ctx: &mut CollabContext,
    ) -> Result<Value, AgentError> {
        let components: Vec<Value> = plan
            .steps
            .iter()
            .map(|s| json!({ "step": s.name, "approach": s.description }))
            .collect();
        Ok(json!({
            "strategy": plan.strategy_name,
            "components": components,
        }))
    }
}

pub struct BaselineOperator;

#[async_trait]
impl Operator for BaselineOperator {
    async fn execute_tasks(
        &self,
        design: &Value,
        _ctx: &mut CollabContext,
    ) -> Result<Execution, AgentError> {
        let components = design
            .get("components")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let results: Vec<StepResult> = components
            .iter()
            .map(|c| {
                let name = c
                    .get("step")
                    .and_then(Value::as_str)
                    .unwrap_or("step")
                    .to_string();
                StepResult {
                    status: "success".to_string(),
                    result: Some(json!({ "completed": name })),
                    error: None,
                    name,
                }
            })
            .collect();
        Ok(Execution {
            status: ExecutionStatus::Success,
            results,
        })
    }
}

#[derive(Default)]
pub struct BaselineAuditor;

#[async_trait]
impl Auditor for BaselineAuditor {
    async fn review_work(
        &self,
        execution: &Execution,
        objective: &str,
        _ctx: &mut CollabContext,
    ) -> Result<Audit, AgentError> {
        let total = execution.results.len().max(1) as f64;
        let succeeded = execution
            .results
            .iter()
            .filter(|r| r.status == "success")
            .count() as f64;
        let score = 10.0 * succeeded / total;
        let approved = execution.status == ExecutionStatus::Success && succeeded == total;
        Ok(Audit {
            approved,
            score,
            feedback: if approved {
                "All steps completed.".to_string()
            } else {
                format!("{} of {} steps succeeded; rework the rest.", succeeded, total)
            },
            final_response: approved.then(|| format!("Completed objective: {objective}")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: feedback in shared memory changes the plan shape, so a
    /// re-plan hashes differently from its predecessor.
    #[tokio::test]
    async fn strategist_folds_in_feedback() {
        let strategist = BaselineStrategist;
        let mut ctx = CollabContext::default();
        let first = strategist.create_plan("do x", &mut ctx).await.unwrap();
        ctx.update("audit_feedback", json!("be more specific"));
        let second = strategist.create_plan("do x", &mut ctx).await.unwrap();
        assert_ne!(first.steps.len(), second.steps.len());
        assert_eq!(second.steps[0].name, "address_feedback");
    }

    /// **Scenario**: full success is approved with a final response.
    #[tokio::test]
    async fn auditor_approves_full_success() {
        let auditor = BaselineAuditor;
        let execution = Execution {
            status: ExecutionStatus::Success,
            results: vec![StepResult {
                name: "gather".into(),
                status: "success".into(),
                result: None,
                error: None,
            }],
        };
        let audit = auditor
            .review_work(&execution, "do x", &mut CollabContext::default())
            .await
            .unwrap();
        assert!(audit.approved);
        assert!(audit.score > 9.0);
        assert!(audit.final_response.is_some());
    }

    /// **Scenario**: a failed step drops the score below approval.
    #[tokio::test]
    async fn auditor_rejects_partial_failure() {
        let auditor = BaselineAuditor;
        let execution = Execution {
            status: ExecutionStatus::PartialFailure,
            results: vec![
                StepResult {
                    name: "a".into(),
                    status: "success".into(),
                    result: None,
                    error: None,
                },
                StepResult {
                    name: "b".into(),
                    status: "failed".into(),
                    result: None,
                    error: Some("boom".into()),
                },
            ],
        };
        let audit = auditor
            .review_work(&execution, "do x", &mut CollabContext::default())
            .await
            .unwrap();
        assert!(!audit.approved);
        assert!(audit.score <= 5.0);
        assert!(audit.final_response.is_none());
    }

    /// **Scenario**: an empty objective is an agent failure, not a panic.
    #[tokio::test]
    async fn contextualizer_rejects_empty_objective() {
        let result = BaselineContextualizer.enrich("   ", &json!({})).await;
        assert!(matches!(result, Err(AgentError::Failed(_))));
    }
}
