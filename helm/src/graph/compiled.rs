//! Compiled graph: immutable structure, supports `invoke` only.
//!
//! Runs from the entry node; after each node, the outgoing edge or the
//! conditional router picks the next node. Every transition counts against
//! the recursion limit, which is what makes cyclic supervisor/worker
//! topologies safe to execute.

use std::collections::HashMap;
use std::sync::Arc;

use super::error::GraphError;
use super::node::Node;
use super::state_graph::{Router, END};

pub(super) enum NextEntry<S> {
    Edge(String),
    Router(Router<S>),
}

/// Executable graph produced by [`super::StateGraph::compile`].
pub struct CompiledGraph<S> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    entry: String,
    next: HashMap<String, NextEntry<S>>,
    recursion_limit: usize,
}

impl<S> CompiledGraph<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub(super) fn new(
        nodes: HashMap<String, Arc<dyn Node<S>>>,
        entry: String,
        next: HashMap<String, NextEntry<S>>,
        recursion_limit: usize,
    ) -> Self {
        Self {
            nodes,
            entry,
            next,
            recursion_limit,
        }
    }

    /// Runs the graph to `END` and returns the final state.
    pub async fn invoke(&self, state: S) -> Result<S, GraphError> {
        let mut state = state;
        let mut current = self.entry.clone();
        let mut transitions = 0usize;

        loop {
            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| GraphError::NodeNotFound(current.clone()))?
                .clone();

            tracing::debug!(node = %current, "graph step");
            state = node.run(state).await?;

            let next_id = match self.next.get(&current) {
                Some(NextEntry::Edge(to)) => to.clone(),
                Some(NextEntry::Router(router)) => {
                    let key = (router.path)(&state);
                    let target = router
                        .path_map
                        .as_ref()
                        .and_then(|m| m.get(&key).cloned())
                        .unwrap_or(key);
                    tracing::debug!(from = %current, to = %target, "conditional routing");
                    target
                }
                None => return Err(GraphError::DeadEnd(current)),
            };

            if next_id == END {
                return Ok(state);
            }

            transitions += 1;
            if transitions >= self.recursion_limit {
                return Err(GraphError::RecursionLimit {
                    node: next_id,
                    limit: self.recursion_limit,
                });
            }
            current = next_id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{StateGraph, START};
    use async_trait::async_trait;

    #[derive(Clone)]
    struct AddNode {
        id: &'static str,
        delta: i32,
    }

    #[async_trait]
    impl Node<i32> for AddNode {
        fn id(&self) -> &str {
            self.id
        }
        async fn run(&self, state: i32) -> Result<i32, GraphError> {
            Ok(state + self.delta)
        }
    }

    /// **Scenario**: linear two-node chain accumulates both deltas.
    #[tokio::test]
    async fn invoke_linear_chain() {
        let mut g = StateGraph::<i32>::new();
        g.add_node("first", Arc::new(AddNode { id: "first", delta: 1 }));
        g.add_node("second", Arc::new(AddNode { id: "second", delta: 2 }));
        g.add_edge(START, "first");
        g.add_edge("first", "second");
        g.add_edge("second", END);
        let compiled = g.compile().expect("graph compiles");
        assert_eq!(compiled.invoke(0).await.unwrap(), 3);
    }

    /// **Scenario**: the router picks the branch from state; path_map keys
    /// resolve to node ids.
    #[tokio::test]
    async fn invoke_conditional_routing() {
        let mut g = StateGraph::<i32>::new();
        g.add_node("decide", Arc::new(AddNode { id: "decide", delta: 0 }));
        g.add_node("even", Arc::new(AddNode { id: "even", delta: 10 }));
        g.add_node("odd", Arc::new(AddNode { id: "odd", delta: 100 }));
        g.add_edge(START, "decide");
        g.add_edge("even", END);
        g.add_edge("odd", END);
        g.add_conditional_edges(
            "decide",
            Arc::new(|s: &i32| if s % 2 == 0 { "even".into() } else { "odd".into() }),
            Some(
                [
                    ("even".to_string(), "even".to_string()),
                    ("odd".to_string(), "odd".to_string()),
                ]
                .into_iter()
                .collect(),
            ),
        );
        let compiled = g.compile().expect("graph compiles");
        assert_eq!(compiled.invoke(2).await.unwrap(), 12);
        assert_eq!(compiled.invoke(1).await.unwrap(), 101);
    }

    /// **Scenario**: a cycle supervisor→worker→supervisor runs until the
    /// router says END.
    #[tokio::test]
    async fn invoke_cycle_until_router_ends() {
        let mut g = StateGraph::<i32>::new();
        g.add_node("hub", Arc::new(AddNode { id: "hub", delta: 0 }));
        g.add_node("work", Arc::new(AddNode { id: "work", delta: 1 }));
        g.add_edge(START, "hub");
        g.add_edge("work", "hub");
        g.add_conditional_edges(
            "hub",
            Arc::new(|s: &i32| if *s < 5 { "work".into() } else { END.into() }),
            None,
        );
        let compiled = g.compile().expect("graph compiles");
        assert_eq!(compiled.invoke(0).await.unwrap(), 5);
    }

    /// **Scenario**: a router that never reaches END trips the recursion
    /// limit instead of spinning forever.
    #[tokio::test]
    async fn invoke_recursion_limit_stops_runaway_cycle() {
        let mut g = StateGraph::<i32>::new().with_recursion_limit(10);
        g.add_node("hub", Arc::new(AddNode { id: "hub", delta: 1 }));
        g.add_node("work", Arc::new(AddNode { id: "work", delta: 0 }));
        g.add_edge(START, "hub");
        g.add_edge("work", "hub");
        // Path map contains END so compile passes, but the router never picks it.
        g.add_conditional_edges(
            "hub",
            Arc::new(|_: &i32| "work".into()),
            Some(
                [
                    ("work".to_string(), "work".to_string()),
                    (END.to_string(), END.to_string()),
                ]
                .into_iter()
                .collect(),
            ),
        );
        let compiled = g.compile().expect("graph compiles");
        match compiled.invoke(0).await {
            Err(GraphError::RecursionLimit { limit, .. }) => assert_eq!(limit, 10),
            other => panic!("expected RecursionLimit, got {:?}", other),
        }
    }
}
