//! State graph runtime: nodes plus explicit edges and one conditional
//! router, executed with a hard recursion limit.
//!
//! Unlike a linear pipeline, edges here may legally form cycles (worker
//! nodes route back to their supervisor); loop protection is the runtime
//! transition cap, not a compile-time acyclicity check.

mod compiled;
mod error;
mod node;
mod state_graph;

pub use compiled::CompiledGraph;
pub use error::GraphError;
pub use node::Node;
pub use state_graph::{RouterFn, StateGraph, END, START};
