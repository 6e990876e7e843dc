//! Supervisor decision policy: a pure function from shared state to the
//! next route, evaluated top-to-bottom with first match winning.

use crate::agents::Audit;
use crate::state::MissionState;

/// Target of one supervisor decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    Contextualizer,
    Strategist,
    Architect,
    Operator,
    Auditor,
    LoopController,
    End,
}

impl Route {
    /// Graph node id for this route; `End` maps to the graph's END handling.
    pub fn node_id(self) -> &'static str {
        match self {
            Route::Contextualizer => "contextualizer",
            Route::Strategist => "strategist",
            Route::Architect => "architect",
            Route::Operator => "operator",
            Route::Auditor => "auditor",
            Route::LoopController => "loop_controller",
            Route::End => "end",
        }
    }
}

/// A routing decision plus the reason it was taken (kept in the timeline).
#[derive(Clone, Debug)]
pub struct Decision {
    pub route: Route,
    pub reason: &'static str,
}

/// Policy constants for one run.
#[derive(Clone, Copy, Debug)]
pub struct SupervisorPolicy {
    pub approval_threshold: f64,
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self {
            approval_threshold: 7.0,
        }
    }
}

impl SupervisorPolicy {
    /// Decision rules, first match wins:
    ///
    /// 1. loop detected, no audit yet → auditor records the failure
    /// 2. loop detected, audit recorded → end
    /// 3. forced research not yet performed → contextualizer
    /// 4. context not enriched → contextualizer
    /// 5. no plan → strategist
    /// 6. no design → architect
    /// 7. no execution → operator
    /// 8. no audit → auditor
    /// 9. audit asks for rework, iterations remain, score below threshold → loop controller
    /// 10. otherwise → end
    pub fn decide(&self, state: &MissionState) -> Decision {
        if state.loop_detected {
            return if state.audit.is_none() {
                Decision {
                    route: Route::Auditor,
                    reason: "loop detected; auditor must record the failure",
                }
            } else {
                Decision {
                    route: Route::End,
                    reason: "loop detected and recorded",
                }
            };
        }

        if state.force_research() && !state.flag("research_performed") {
            return Decision {
                route: Route::Contextualizer,
                reason: "research forced by request context",
            };
        }

        if !state.flag("context_enriched") {
            return Decision {
                route: Route::Contextualizer,
                reason: "context not yet enriched",
            };
        }

        if state.plan.is_none() {
            return Decision {
                route: Route::Strategist,
                reason: "no plan",
            };
        }

        if state.design.is_none() {
            return Decision {
                route: Route::Architect,
                reason: "no design",
            };
        }

        if state.execution.is_none() {
            return Decision {
                route: Route::Operator,
                reason: "no execution",
            };
        }

        let Some(audit) = &state.audit else {
            return Decision {
                route: Route::Auditor,
                reason: "no audit",
            };
        };

        // Auditor failure is terminal; never re-plan off an errored audit.
        if !state.flag("audit_error")
            && self.should_continue_loop(audit, state.iteration, state.max_iterations)
        {
            return Decision {
                route: Route::LoopController,
                reason: "audit requests improvement",
            };
        }

        Decision {
            route: Route::End,
            reason: "final output accepted",
        }
    }

    /// Rework is worthwhile only while iterations remain and the audit both
    /// withheld approval and scored below the threshold.
    pub fn should_continue_loop(&self, audit: &Audit, iteration: u32, max_iterations: u32) -> bool {
        !audit.approved && iteration < max_iterations && audit.score < self.approval_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{Execution, ExecutionStatus, Plan};
    use serde_json::json;

    fn base_state() -> MissionState {
        let mut state = MissionState::new(1, "do x", json!({}));
        state.set_flag("context_enriched", true);
        state
    }

    fn plan() -> Plan {
        Plan {
            strategy_name: "direct".into(),
            reasoning: String::new(),
            steps: Vec::new(),
        }
    }

    fn audit(approved: bool, score: f64) -> Audit {
        Audit {
            approved,
            score,
            feedback: String::new(),
            final_response: None,
        }
    }

    /// **Scenario**: rules fire in order as artifacts appear.
    #[test]
    fn decide_progression_order() {
        let policy = SupervisorPolicy::default();
        let mut state = MissionState::new(1, "do x", json!({}));
        assert_eq!(policy.decide(&state).route, Route::Contextualizer);

        state.set_flag("context_enriched", true);
        assert_eq!(policy.decide(&state).route, Route::Strategist);

        state.plan = Some(plan());
        assert_eq!(policy.decide(&state).route, Route::Architect);

        state.design = Some(json!({}));
        assert_eq!(policy.decide(&state).route, Route::Operator);

        state.execution = Some(Execution {
            status: ExecutionStatus::Success,
            results: Vec::new(),
        });
        assert_eq!(policy.decide(&state).route, Route::Auditor);

        state.audit = Some(audit(true, 9.0));
        assert_eq!(policy.decide(&state).route, Route::End);
    }

    /// **Scenario**: forced research routes to the contextualizer even when
    /// enrichment already happened, until research is recorded.
    #[test]
    fn decide_force_research() {
        let policy = SupervisorPolicy::default();
        let mut state = MissionState::new(1, "do x", json!({"force_research": true}));
        state.set_flag("context_enriched", true);
        assert_eq!(policy.decide(&state).route, Route::Contextualizer);
        state.set_flag("research_performed", true);
        assert_eq!(policy.decide(&state).route, Route::Strategist);
    }

    /// **Scenario**: loop detection overrides everything; auditor first,
    /// then end once the audit is recorded.
    #[test]
    fn decide_loop_detected() {
        let policy = SupervisorPolicy::default();
        let mut state = base_state();
        state.loop_detected = true;
        assert_eq!(policy.decide(&state).route, Route::Auditor);
        state.audit = Some(audit(false, 0.0));
        assert_eq!(policy.decide(&state).route, Route::End);
    }

    /// **Scenario**: a rejected low-score audit loops while iterations
    /// remain, then ends at the cap.
    #[test]
    fn decide_loop_controller_until_cap() {
        let policy = SupervisorPolicy::default();
        let mut state = base_state();
        state.plan = Some(plan());
        state.design = Some(json!({}));
        state.execution = Some(Execution {
            status: ExecutionStatus::PartialFailure,
            results: Vec::new(),
        });
        state.audit = Some(audit(false, 5.5));
        state.max_iterations = 2;

        state.iteration = 0;
        assert_eq!(policy.decide(&state).route, Route::LoopController);
        state.iteration = 1;
        assert_eq!(policy.decide(&state).route, Route::LoopController);
        state.iteration = 2;
        assert_eq!(policy.decide(&state).route, Route::End);
    }

    /// **Scenario**: a high score withholds the loop even without approval.
    #[test]
    fn decide_high_score_ends_without_approval() {
        let policy = SupervisorPolicy::default();
        let mut state = base_state();
        state.plan = Some(plan());
        state.design = Some(json!({}));
        state.execution = Some(Execution {
            status: ExecutionStatus::Success,
            results: Vec::new(),
        });
        state.audit = Some(audit(false, 8.5));
        assert_eq!(policy.decide(&state).route, Route::End);
    }

    /// **Scenario**: an errored audit never routes to the loop controller.
    #[test]
    fn decide_audit_error_is_terminal() {
        let policy = SupervisorPolicy::default();
        let mut state = base_state();
        state.plan = Some(plan());
        state.design = Some(json!({}));
        state.execution = Some(Execution {
            status: ExecutionStatus::Failure,
            results: Vec::new(),
        });
        state.audit = Some(audit(false, 0.0));
        state.set_flag("audit_error", true);
        assert_eq!(policy.decide(&state).route, Route::End);
    }
}
