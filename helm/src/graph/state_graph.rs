//! Graph builder: `add_node` / `add_edge(from, to)` with `START` and `END`
//! sentinels, plus `add_conditional_edges` for state-based routing.
//!
//! A node has either one outgoing edge or a conditional router, not both.
//! Cycles are allowed; `compile` validates ids and entry/exit, and the
//! compiled graph bounds execution with a transition cap.

use std::collections::HashMap;
use std::sync::Arc;

use super::compiled::{CompiledGraph, NextEntry};
use super::error::GraphError;
use super::node::Node;

/// Sentinel for graph entry: `add_edge(START, first_node_id)`.
pub const START: &str = "__start__";

/// Sentinel for graph exit: route or edge target `END` stops the run.
pub const END: &str = "__end__";

/// Routing function for conditional edges: `(state) -> key`, where the key
/// is looked up in the path map (or used directly as the next node id).
pub type RouterFn<S> = Arc<dyn Fn(&S) -> String + Send + Sync>;

pub(super) struct Router<S> {
    pub(super) path: RouterFn<S>,
    pub(super) path_map: Option<HashMap<String, String>>,
}

impl<S> Clone for Router<S> {
    fn clone(&self) -> Self {
        Self {
            path: Arc::clone(&self.path),
            path_map: self.path_map.clone(),
        }
    }
}

/// State graph under construction. Generic over the state type `S`.
pub struct StateGraph<S> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    edges: Vec<(String, String)>,
    conditional: HashMap<String, Router<S>>,
    recursion_limit: usize,
}

impl<S> Default for StateGraph<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> StateGraph<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: Vec::new(),
            conditional: HashMap::new(),
            recursion_limit: 100,
        }
    }

    /// Caps the number of node transitions in one run (default 100).
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit.max(1);
        self
    }

    /// Adds a node; replaces any node with the same id.
    pub fn add_node(&mut self, id: impl Into<String>, node: Arc<dyn Node<S>>) -> &mut Self {
        self.nodes.insert(id.into(), node);
        self
    }

    /// Adds an unconditional edge. Use `START` / `END` for entry and exit.
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    /// Adds conditional routing from `source`: after the source node runs,
    /// `path(state)` yields a key resolved through `path_map` (when given)
    /// into the next node id, or `END`.
    pub fn add_conditional_edges(
        &mut self,
        source: impl Into<String>,
        path: RouterFn<S>,
        path_map: Option<HashMap<String, String>>,
    ) -> &mut Self {
        self.conditional
            .insert(source.into(), Router { path, path_map });
        self
    }

    /// Validates the graph and produces an executable [`CompiledGraph`].
    pub fn compile(self) -> Result<CompiledGraph<S>, GraphError> {
        for (from, to) in &self.edges {
            if from != START && !self.nodes.contains_key(from) {
                return Err(GraphError::NodeNotFound(from.clone()));
            }
            if to != END && !self.nodes.contains_key(to) {
                return Err(GraphError::NodeNotFound(to.clone()));
            }
        }
        for (source, router) in &self.conditional {
            if !self.nodes.contains_key(source) {
                return Err(GraphError::NodeNotFound(source.clone()));
            }
            if let Some(map) = &router.path_map {
                for target in map.values() {
                    if target != END && !self.nodes.contains_key(target) {
                        return Err(GraphError::NodeNotFound(target.clone()));
                    }
                }
            }
        }

        let mut entry = None;
        for (from, to) in &self.edges {
            if from == START {
                entry = Some(to.clone());
            }
        }
        let entry = entry.ok_or(GraphError::MissingEntry)?;

        let edge_reaches_end = self.edges.iter().any(|(_, to)| to == END);
        let router_reaches_end = self.conditional.values().any(|r| {
            r.path_map
                .as_ref()
                .map_or(true, |m| m.values().any(|v| v == END))
        });
        if !edge_reaches_end && !router_reaches_end {
            return Err(GraphError::MissingExit);
        }

        let mut next: HashMap<String, NextEntry<S>> = HashMap::new();
        for (from, to) in &self.edges {
            if from == START {
                continue;
            }
            if self.conditional.contains_key(from)
                || next.insert(from.clone(), NextEntry::Edge(to.clone())).is_some()
            {
                return Err(GraphError::AmbiguousRouting(from.clone()));
            }
        }
        for (source, router) in self.conditional {
            next.insert(source, NextEntry::Router(router));
        }

        Ok(CompiledGraph::new(
            self.nodes,
            entry,
            next,
            self.recursion_limit,
        ))
    }
}
