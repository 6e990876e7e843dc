//! # Helm
//!
//! Core of the Helm control plane: the mission domain model, the
//! supervisor state graph that routes between cooperating agents, the
//! agent contracts, and the in-process event bus.
//!
//! ## Design principles
//!
//! - **Single state type per graph**: one shared [`MissionState`] flows
//!   through every node; nodes receive state and return updated state.
//! - **Pure routing**: the supervisor's decision is a pure function of the
//!   shared state ([`supervisor::SupervisorPolicy::decide`]); the graph is a
//!   static transition table, not an object web.
//! - **Explicit dependencies**: bus, observer, and agents are constructed at
//!   process start and threaded through constructors; no global state.
//!
//! ## Main modules
//!
//! - [`graph`]: [`StateGraph`], [`CompiledGraph`], [`Node`]: build and run
//!   cyclic state graphs with a conditional router and a recursion limit.
//! - [`mission`]: [`Mission`], [`MissionStatus`] (the legal-transition DAG),
//!   [`TaskRecord`], [`MissionView`].
//! - [`state`]: [`MissionState`], the shared state carried through a run.
//! - [`agents`]: agent contracts ([`agents::Strategist`] …), typed
//!   artifacts, the collaboration context, and deterministic baselines.
//! - [`supervisor`]: decision policy, plan hashing and loop detection, and
//!   the engine that wires agents into a graph and emits brain events.
//! - [`bus`]: bounded drop-oldest topic fanout ([`bus::EventBus`]).
//! - [`dispatch`]: single-brain control-plane client ([`dispatch::ControlPlaneClient`]).

pub mod agents;
pub mod bus;
pub mod dispatch;
pub mod graph;
pub mod mission;
pub mod state;
pub mod supervisor;

pub use graph::{CompiledGraph, GraphError, Node, StateGraph, END, START};
pub use mission::{Mission, MissionOutcome, MissionStatus, MissionView, TaskRecord, TaskStatus};
pub use state::MissionState;
