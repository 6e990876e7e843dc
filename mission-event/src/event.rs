//! Mission event types and the persisted event record.
//!
//! Event types form a closed set; producers only ever emit the named
//! variants. Consumers tolerate events from older producers by mapping any
//! unrecognised string to [`EventType::Unknown`] with the raw tag preserved,
//! so replays never fail on vocabulary drift.

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed enumeration of mission event types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventType {
    MissionCreated,
    StatusChange,
    RunStarted,
    PhaseStart,
    PhaseCompleted,
    PhaseError,
    LoopStart,
    TaskCompleted,
    MissionCompleted,
    MissionFailed,
    /// Event type from an older producer; raw tag kept verbatim.
    Unknown(String),
}

impl EventType {
    /// Canonical wire string for this event type.
    pub fn as_str(&self) -> &str {
        match self {
            EventType::MissionCreated => "mission_created",
            EventType::StatusChange => "status_change",
            EventType::RunStarted => "run_started",
            EventType::PhaseStart => "phase_start",
            EventType::PhaseCompleted => "phase_completed",
            EventType::PhaseError => "phase_error",
            EventType::LoopStart => "loop_start",
            EventType::TaskCompleted => "task_completed",
            EventType::MissionCompleted => "mission_completed",
            EventType::MissionFailed => "mission_failed",
            EventType::Unknown(raw) => raw.as_str(),
        }
    }

    /// True for the two event types that end a mission stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventType::MissionCompleted | EventType::MissionFailed)
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        match s {
            "mission_created" => EventType::MissionCreated,
            "status_change" => EventType::StatusChange,
            "run_started" => EventType::RunStarted,
            "phase_start" => EventType::PhaseStart,
            "phase_completed" => EventType::PhaseCompleted,
            "phase_error" => EventType::PhaseError,
            "loop_start" => EventType::LoopStart,
            "task_completed" => EventType::TaskCompleted,
            "mission_completed" => EventType::MissionCompleted,
            "mission_failed" => EventType::MissionFailed,
            other => EventType::Unknown(other.to_string()),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(EventType::from(s.as_str()))
    }
}

/// One persisted mission event as delivered to subscribers.
///
/// `seq` is strictly increasing and contiguous from 1 within a mission;
/// `(mission_id, seq)` is the idempotency key consumers deduplicate on.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredEvent {
    pub mission_id: i64,
    pub seq: i64,
    pub event_type: EventType,
    pub payload: Value,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

/// Payload for `phase_start` / `phase_completed` / `phase_error`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PhasePayload {
    pub phase: String,
    pub agent: String,
    /// Per-iteration run id, `<mission>:<iteration>`.
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload for `run_started`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunStartedPayload {
    pub run_id: String,
    pub iteration: u32,
}

/// Payload for `loop_start` (a re-plan boundary).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoopStartPayload {
    pub iteration: u32,
    pub run_id: String,
    pub chief_agent: String,
}

/// Payload for `status_change`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusChangePayload {
    pub from: String,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Payload for `task_completed`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskCompletedPayload {
    pub ordinal: i64,
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload for `mission_completed` / `mission_failed`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompletionPayload {
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
