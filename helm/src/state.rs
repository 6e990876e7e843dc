//! Shared state carried through one supervisor run.
//!
//! One [`MissionState`] flows through every node; each node returns the
//! updated state and the graph routes back to the supervisor. The shared
//! memory map doubles as the collaboration context handed to agents.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::agents::{Audit, Execution, Plan};

/// One entry in the append-only trail of node visits.
#[derive(Clone, Debug, Serialize)]
pub struct TimelineEntry {
    pub agent: String,
    pub payload: Value,
}

/// Graph-shared state for one mission run.
#[derive(Clone, Debug, Serialize)]
pub struct MissionState {
    pub mission_id: i64,
    pub objective: String,
    pub context: Value,
    pub constraints: Vec<String>,
    pub priority: String,

    /// Shared memory updated by each node; BTreeMap keeps iteration stable.
    pub shared: BTreeMap<String, Value>,

    pub plan: Option<Plan>,
    pub design: Option<Value>,
    pub execution: Option<Execution>,
    pub audit: Option<Audit>,

    pub iteration: u32,
    pub max_iterations: u32,

    pub plan_hashes: Vec<String>,
    pub loop_detected: bool,
    pub loop_reason: Option<String>,

    pub timeline: Vec<TimelineEntry>,
    pub next_step: Option<String>,
    pub answer: Option<String>,
}

impl MissionState {
    pub fn new(mission_id: i64, objective: impl Into<String>, context: Value) -> Self {
        let mut shared = BTreeMap::new();
        shared.insert("request_context".to_string(), context.clone());
        Self {
            mission_id,
            objective: objective.into(),
            context,
            constraints: Vec::new(),
            priority: "normal".to_string(),
            shared,
            plan: None,
            design: None,
            execution: None,
            audit: None,
            iteration: 0,
            max_iterations: 3,
            plan_hashes: Vec::new(),
            loop_detected: false,
            loop_reason: None,
            timeline: Vec::new(),
            next_step: None,
            answer: None,
        }
    }

    /// The per-iteration run id, `<mission>:<iteration>`; keeps UIs from
    /// merging re-plan runs into one span.
    pub fn run_id(&self) -> String {
        format!("{}:{}", self.mission_id, self.iteration)
    }

    /// Boolean flag from shared memory; absent counts as false.
    pub fn flag(&self, key: &str) -> bool {
        self.shared
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn set_flag(&mut self, key: &str, value: bool) {
        self.shared.insert(key.to_string(), Value::Bool(value));
    }

    /// True when the request context asks for mandatory research.
    pub fn force_research(&self) -> bool {
        self.context
            .get("force_research")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn record(&mut self, agent: &str, payload: Value) {
        self.timeline.push(TimelineEntry {
            agent: agent.to_string(),
            payload,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// **Scenario**: run id combines mission and iteration.
    #[test]
    fn run_id_per_iteration() {
        let mut state = MissionState::new(42, "Summarise X", json!({}));
        assert_eq!(state.run_id(), "42:0");
        state.iteration = 2;
        assert_eq!(state.run_id(), "42:2");
    }

    /// **Scenario**: flags default to false and read back after set.
    #[test]
    fn shared_memory_flags() {
        let mut state = MissionState::new(1, "x", json!({}));
        assert!(!state.flag("context_enriched"));
        state.set_flag("context_enriched", true);
        assert!(state.flag("context_enriched"));
    }

    /// **Scenario**: force_research comes from the request context.
    #[test]
    fn force_research_from_context() {
        let state = MissionState::new(1, "x", json!({"force_research": true}));
        assert!(state.force_research());
        let state = MissionState::new(1, "x", json!({}));
        assert!(!state.force_research());
    }
}
