//! The node contract: one step over shared state.

use async_trait::async_trait;

use super::GraphError;

/// A graph node: receives the shared state, returns the updated state.
///
/// Routing is owned by the graph (edges and the conditional router), never
/// by the node itself, which keeps each node a one-shot function.
#[async_trait]
pub trait Node<S>: Send + Sync {
    /// Stable node id; used in edges and the router's return values.
    fn id(&self) -> &str;

    async fn run(&self, state: S) -> Result<S, GraphError>;
}
