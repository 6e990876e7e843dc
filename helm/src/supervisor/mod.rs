//! The cognitive supervisor: a state-machine graph routing between agent
//! roles, with bounded re-planning and plan-hash loop detection.
//!
//! The supervisor node is the only decision point; worker nodes are
//! one-shot functions over [`crate::MissionState`] that route back to it.

mod engine;
mod nodes;
mod plan_hash;
mod policy;

pub use engine::{
    CancelFlag, EngineConfig, MissionObserver, NullObserver, RunSeed, RunVerdict, SupervisorEngine,
};
pub use plan_hash::{canonical_plan_hash, is_repeat};
pub use policy::{Decision, Route, SupervisorPolicy};
