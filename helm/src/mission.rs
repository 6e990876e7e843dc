//! Mission domain model: the status DAG, task records, and the API view.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mission lifecycle status. Transitions form a DAG: pending → running →
/// {success, partial_success, failed}; terminal states are absorbing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Pending,
    Running,
    PartialSuccess,
    Success,
    Failed,
}

impl MissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MissionStatus::Pending => "pending",
            MissionStatus::Running => "running",
            MissionStatus::PartialSuccess => "partial_success",
            MissionStatus::Success => "success",
            MissionStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(MissionStatus::Pending),
            "running" => Some(MissionStatus::Running),
            "partial_success" => Some(MissionStatus::PartialSuccess),
            "success" => Some(MissionStatus::Success),
            "failed" => Some(MissionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MissionStatus::Success | MissionStatus::PartialSuccess | MissionStatus::Failed
        )
    }

    /// The single source of truth for the legal-transition DAG.
    pub fn can_transition_to(self, next: MissionStatus) -> bool {
        match self {
            MissionStatus::Pending => matches!(
                next,
                MissionStatus::Running
                    | MissionStatus::Success
                    | MissionStatus::PartialSuccess
                    | MissionStatus::Failed
            ),
            MissionStatus::Running => matches!(
                next,
                MissionStatus::Success | MissionStatus::PartialSuccess | MissionStatus::Failed
            ),
            MissionStatus::Success | MissionStatus::PartialSuccess | MissionStatus::Failed => false,
        }
    }
}

impl std::fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a finished mission ended, independent of the API status mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionOutcome {
    Success,
    PartialSuccess,
    Failed,
}

impl MissionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            MissionOutcome::Success => "success",
            MissionOutcome::PartialSuccess => "partial_success",
            MissionOutcome::Failed => "failed",
        }
    }

    pub fn terminal_status(self) -> MissionStatus {
        match self {
            MissionOutcome::Success => MissionStatus::Success,
            MissionOutcome::PartialSuccess => MissionStatus::PartialSuccess,
            MissionOutcome::Failed => MissionStatus::Failed,
        }
    }
}

/// A mission row as held by the store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Mission {
    pub id: i64,
    pub objective: String,
    pub initiator_id: i64,
    pub status: MissionStatus,
    pub outcome: Option<MissionOutcome>,
    pub result_summary: Option<String>,
    pub context: Value,
    pub idempotency_key: Option<String>,
    pub cancel_requested: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Task execution status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "success" => Some(TaskStatus::Success),
            "failed" => Some(TaskStatus::Failed),
            "skipped" => Some(TaskStatus::Skipped),
            _ => None,
        }
    }
}

/// One planned step of a mission, identified by `(mission_id, ordinal)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskRecord {
    pub mission_id: i64,
    pub ordinal: i64,
    pub name: String,
    pub description: String,
    pub tool_hint: Option<String>,
    pub inputs: Option<Value>,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// The mission shape served over HTTP and returned by the dispatch client.
///
/// `partial_success` is mapped to `status: "success"` with
/// `outcome: "partial_success"` so older UIs keep rendering a finished
/// mission as done.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MissionView {
    pub id: i64,
    pub objective: String,
    pub status: String,
    pub outcome: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub result: Option<Value>,
    #[serde(default)]
    pub steps: Vec<Value>,
}

impl MissionView {
    /// API status mapping for a raw mission status.
    pub fn status_payload(status: MissionStatus) -> (String, Option<String>) {
        if status == MissionStatus::PartialSuccess {
            ("success".to_string(), Some("partial_success".to_string()))
        } else {
            (status.as_str().to_string(), None)
        }
    }

    pub fn from_mission(mission: &Mission) -> Self {
        let (status, outcome) = Self::status_payload(mission.status);
        Self {
            id: mission.id,
            objective: mission.objective.clone(),
            status,
            outcome,
            created_at: mission.created_at.clone(),
            updated_at: mission.updated_at.clone(),
            result: mission
                .result_summary
                .as_ref()
                .map(|s| serde_json::json!({ "summary": s })),
            steps: Vec::new(),
        }
    }
}
