//! Client-facing envelopes: every frame sent over a WebSocket is
//! `{ "type": <kind>, "payload": <object> }`.
//!
//! Mission events specifically nest as
//! `{ "type": "mission_event", "payload": { "event_type": …, "data": … } }`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::event::{EventType, StoredEvent};

/// One `{type, payload}` frame.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Wraps one persisted mission event for the wire.
    pub fn mission_event(event: &StoredEvent) -> Self {
        Self::new(
            "mission_event",
            json!({
                "event_type": event.event_type.as_str(),
                "data": event.payload,
            }),
        )
    }

    /// Mission status snapshot (`status` already mapped for the API).
    pub fn mission_status(status: &str, outcome: Option<&str>) -> Self {
        Self::new(
            "mission_status",
            json!({ "status": status, "outcome": outcome }),
        )
    }

    /// Error envelope with the protocol's `{details, status_code}` payload.
    pub fn error(details: impl Into<String>, status_code: u16) -> Self {
        Self::new(
            "error",
            json!({ "details": details.into(), "status_code": status_code }),
        )
    }

    /// The event type embedded in a `mission_event` envelope, if this is one.
    pub fn embedded_event_type(&self) -> Option<EventType> {
        if self.kind != "mission_event" {
            return None;
        }
        self.payload
            .get("event_type")
            .and_then(Value::as_str)
            .map(EventType::from)
    }
}

/// Chat stream envelope kinds (§6). `Error` doubles as the role-gate and
/// validation shape `{details, status_code}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatEventKind {
    AssistantDelta,
    AssistantFinal,
    AssistantError,
    ToolResultSummary,
    Status,
    Complete,
    ConversationInit,
    AssistantFallback,
    Error,
}

impl ChatEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatEventKind::AssistantDelta => "assistant_delta",
            ChatEventKind::AssistantFinal => "assistant_final",
            ChatEventKind::AssistantError => "assistant_error",
            ChatEventKind::ToolResultSummary => "tool_result_summary",
            ChatEventKind::Status => "status",
            ChatEventKind::Complete => "complete",
            ChatEventKind::ConversationInit => "conversation_init",
            ChatEventKind::AssistantFallback => "assistant_fallback",
            ChatEventKind::Error => "error",
        }
    }

    /// Content-bearing kinds satisfy the output guard; a stream that ends
    /// without one triggers the `assistant_fallback` apology.
    pub fn is_content_bearing(kind: &str) -> bool {
        matches!(
            kind,
            "assistant_delta" | "assistant_final" | "assistant_error" | "tool_result_summary"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: envelope serialises with the `type` key, not `kind`.
    #[test]
    fn envelope_uses_type_key() {
        let env = Envelope::new("status", json!({"state": "thinking"}));
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["type"], "status");
        assert_eq!(v["payload"]["state"], "thinking");
    }

    /// **Scenario**: a stored event wraps into the nested mission_event shape.
    #[test]
    fn mission_event_wire_shape() {
        let evt = StoredEvent {
            mission_id: 42,
            seq: 3,
            event_type: EventType::PhaseStart,
            payload: json!({"phase": "PLANNING", "agent": "Strategist"}),
            created_at: "2026-01-01T00:00:00Z".into(),
        };
        let env = Envelope::mission_event(&evt);
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["type"], "mission_event");
        assert_eq!(v["payload"]["event_type"], "phase_start");
        assert_eq!(v["payload"]["data"]["phase"], "PLANNING");
    }

    /// **Scenario**: embedded_event_type reads back the nested tag and is
    /// None for non-mission envelopes.
    #[test]
    fn embedded_event_type_extraction() {
        let evt = StoredEvent {
            mission_id: 1,
            seq: 1,
            event_type: EventType::MissionCompleted,
            payload: json!({}),
            created_at: String::new(),
        };
        let env = Envelope::mission_event(&evt);
        assert_eq!(env.embedded_event_type(), Some(EventType::MissionCompleted));
        assert_eq!(Envelope::error("nope", 403).embedded_event_type(), None);
    }

    /// **Scenario**: only the four assistant/tool kinds count as content.
    #[test]
    fn content_bearing_kinds() {
        assert!(ChatEventKind::is_content_bearing("assistant_delta"));
        assert!(ChatEventKind::is_content_bearing("tool_result_summary"));
        assert!(!ChatEventKind::is_content_bearing("status"));
        assert!(!ChatEventKind::is_content_bearing("conversation_init"));
        assert!(!ChatEventKind::is_content_bearing("mission_event"));
    }
}
