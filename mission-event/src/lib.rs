//! Mission event protocol: the wire vocabulary shared by the control plane,
//! the outbox bridge, and every WebSocket client.
//!
//! Three pieces:
//! - [`EventType`]: closed enumeration of mission event types, with an
//!   [`EventType::Unknown`] escape hatch for events from older producers.
//! - [`StoredEvent`]: one persisted mission event `(mission_id, seq)` as it
//!   travels from the store through the outbox to the bus and the sockets.
//! - [`Envelope`]: the `{type, payload}` JSON object sent to clients, plus
//!   the chat envelope kinds and WS close codes.

mod envelope;
mod event;

pub use envelope::{ChatEventKind, Envelope};
pub use event::{
    CompletionPayload, EventType, LoopStartPayload, PhasePayload, RunStartedPayload, StatusChangePayload,
    StoredEvent, TaskCompletedPayload,
};

/// WebSocket close codes used by the control plane (protocol §6).
pub mod close_code {
    /// Missing/invalid/expired credential; sent before `accept`.
    pub const AUTH: u16 = 4401;
    /// Authenticated but the route's role policy forbids the caller.
    pub const FORBIDDEN: u16 = 4403;
    /// Referenced entity (mission) does not exist.
    pub const NOT_FOUND: u16 = 4004;
    /// Unexpected internal error.
    pub const INTERNAL: u16 = 1011;
}
