//! Graph build and execution errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    /// An edge or router target references a node id that was never added.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// No edge from `START`.
    #[error("graph has no entry edge from START")]
    MissingEntry,

    /// Neither an edge nor a router path leads to `END`.
    #[error("graph has no path to END")]
    MissingExit,

    /// A node has both an unconditional edge and a conditional router.
    #[error("node has both an edge and conditional routing: {0}")]
    AmbiguousRouting(String),

    /// A node finished but no outgoing edge or router covers it.
    #[error("no route out of node: {0}")]
    DeadEnd(String),

    /// The transition cap was hit; protects against pathological cycles
    /// even inside a buggy routing policy.
    #[error("recursion limit of {limit} transitions exceeded at node {node}")]
    RecursionLimit { node: String, limit: usize },

    /// A node returned an error the graph could not absorb.
    #[error("node {node} failed: {message}")]
    NodeFailed { node: String, message: String },
}
