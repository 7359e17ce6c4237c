//! Graph description: nodes, edges, entry point and static interrupts.

use crate::error::{GraphError, Result};
use crate::node::Node;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Sentinel edge target that terminates the workflow.
pub const END: &str = "__end__";

/// Routing out of a node.
#[derive(Clone)]
pub enum Edge {
    /// Unconditional transition.
    Direct(String),
    /// State-dependent transition; the router returns the target node id
    /// (or [`END`]).
    Conditional(Arc<dyn Fn(&Value) -> String + Send + Sync>),
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct(to) => f.debug_tuple("Direct").field(to).finish(),
            Self::Conditional(_) => f.write_str("Conditional(..)"),
        }
    }
}

/// Mutable graph under construction. Call [`Graph::compile`] to validate
/// and freeze it for execution.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: HashMap<String, Node>,
    edges: HashMap<String, Edge>,
    entry: Option<String>,
    static_interrupts: HashSet<String>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) -> &mut Self {
        self.nodes.insert(node.id.clone(), node);
        self
    }

    /// Add an unconditional edge. One outgoing edge per node: the engine
    /// executes workflows strictly sequentially.
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.insert(from.into(), Edge::Direct(to.into()));
        self
    }

    /// Add a conditional edge whose router picks the next node from state.
    pub fn add_conditional_edge(
        &mut self,
        from: impl Into<String>,
        router: Arc<dyn Fn(&Value) -> String + Send + Sync>,
    ) -> &mut Self {
        self.edges.insert(from.into(), Edge::Conditional(router));
        self
    }

    pub fn set_entry(&mut self, node: impl Into<String>) -> &mut Self {
        self.entry = Some(node.into());
        self
    }

    /// Mark a node as a static interrupt: the runtime pauses immediately
    /// before executing it unless a resume command is queued.
    pub fn add_static_interrupt(&mut self, node: impl Into<String>) -> &mut Self {
        self.static_interrupts.insert(node.into());
        self
    }

    /// Validate shape: entry set and present, direct edge targets present,
    /// static interrupts name real nodes. Conditional routers are checked
    /// at runtime since their targets depend on state.
    pub fn validate(&self) -> Result<()> {
        let entry = self
            .entry
            .as_ref()
            .ok_or_else(|| GraphError::Validation("entry node not set".to_string()))?;
        if !self.nodes.contains_key(entry) {
            return Err(GraphError::Validation(format!(
                "entry node {} does not exist",
                entry
            )));
        }

        for (from, edge) in &self.edges {
            if !self.nodes.contains_key(from) {
                return Err(GraphError::Validation(format!(
                    "edge source {} does not exist",
                    from
                )));
            }
            if let Edge::Direct(to) = edge {
                if to != END && !self.nodes.contains_key(to) {
                    return Err(GraphError::Validation(format!(
                        "edge target {} does not exist",
                        to
                    )));
                }
            }
        }

        for node in &self.static_interrupts {
            if !self.nodes.contains_key(node) {
                return Err(GraphError::Validation(format!(
                    "static interrupt {} does not exist",
                    node
                )));
            }
        }

        Ok(())
    }

    /// Validate and freeze the graph for execution.
    pub fn compile(self) -> Result<CompiledGraph> {
        self.validate()?;
        Ok(CompiledGraph {
            inner: Arc::new(self),
        })
    }
}

/// An immutable, validated graph. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    inner: Arc<Graph>,
}

impl CompiledGraph {
    pub fn entry(&self) -> &str {
        self.inner.entry.as_deref().unwrap_or(END)
    }

    pub fn node(&self, id: &str) -> Result<&Node> {
        self.inner
            .nodes
            .get(id)
            .ok_or_else(|| GraphError::UnknownNode(id.to_string()))
    }

    pub fn is_static_interrupt(&self, id: &str) -> bool {
        self.inner.static_interrupts.contains(id)
    }

    /// Nodes whose direct edge leads to [`END`].
    pub fn terminal_nodes(&self) -> Vec<&str> {
        self.inner
            .edges
            .iter()
            .filter_map(|(from, edge)| match edge {
                Edge::Direct(to) if to == END => Some(from.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Resolve the nodes to run after `node_id` under the given state.
    /// Empty means the workflow is terminal.
    pub fn next_after(&self, node_id: &str, state: &Value) -> Result<Vec<String>> {
        let Some(edge) = self.inner.edges.get(node_id) else {
            // No outgoing edge is terminal.
            return Ok(Vec::new());
        };

        let target = match edge {
            Edge::Direct(to) => to.clone(),
            Edge::Conditional(router) => router(state),
        };

        if target == END {
            return Ok(Vec::new());
        }
        if !self.inner.nodes.contains_key(&target) {
            return Err(GraphError::UnknownNode(target));
        }
        Ok(vec![target])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeContext, NodeHandler, NodeKind, NodeOutcome};
    use async_trait::async_trait;
    use serde_json::json;

    struct NoopHandler;

    #[async_trait]
    impl NodeHandler for NoopHandler {
        async fn execute(
            &self,
            _ctx: Arc<NodeContext>,
            _state: Value,
        ) -> crate::error::Result<NodeOutcome> {
            Ok(NodeOutcome::empty())
        }
    }

    fn node(id: &str) -> Node {
        Node::new(id, NodeKind::Noop, Arc::new(NoopHandler))
    }

    #[test]
    fn validate_rejects_missing_entry() {
        let mut graph = Graph::new();
        graph.add_node(node("a"));
        assert!(matches!(graph.compile(), Err(GraphError::Validation(_))));
    }

    #[test]
    fn validate_rejects_dangling_edge() {
        let mut graph = Graph::new();
        graph.add_node(node("a"));
        graph.set_entry("a");
        graph.add_edge("a", "missing");
        assert!(matches!(graph.compile(), Err(GraphError::Validation(_))));
    }

    #[test]
    fn next_after_direct_and_end() {
        let mut graph = Graph::new();
        graph.add_node(node("a"));
        graph.add_node(node("b"));
        graph.set_entry("a");
        graph.add_edge("a", "b");
        graph.add_edge("b", END);
        let compiled = graph.compile().unwrap();

        assert_eq!(compiled.next_after("a", &json!({})).unwrap(), vec!["b"]);
        assert!(compiled.next_after("b", &json!({})).unwrap().is_empty());
        assert_eq!(compiled.terminal_nodes(), vec!["b"]);
    }

    #[test]
    fn next_after_conditional_routes_on_state() {
        let mut graph = Graph::new();
        graph.add_node(node("router"));
        graph.add_node(node("yes"));
        graph.add_node(node("no"));
        graph.set_entry("router");
        graph.add_conditional_edge(
            "router",
            Arc::new(|state: &Value| {
                if state["ok"].as_bool().unwrap_or(false) {
                    "yes".to_string()
                } else {
                    "no".to_string()
                }
            }),
        );
        let compiled = graph.compile().unwrap();

        assert_eq!(
            compiled.next_after("router", &json!({"ok": true})).unwrap(),
            vec!["yes"]
        );
        assert_eq!(
            compiled.next_after("router", &json!({"ok": false})).unwrap(),
            vec!["no"]
        );
    }

    #[test]
    fn conditional_to_unknown_node_is_error() {
        let mut graph = Graph::new();
        graph.add_node(node("router"));
        graph.set_entry("router");
        graph.add_conditional_edge("router", Arc::new(|_| "ghost".to_string()));
        let compiled = graph.compile().unwrap();

        assert!(matches!(
            compiled.next_after("router", &json!({})),
            Err(GraphError::UnknownNode(_))
        ));
    }

    #[test]
    fn no_outgoing_edge_is_terminal() {
        let mut graph = Graph::new();
        graph.add_node(node("only"));
        graph.set_entry("only");
        let compiled = graph.compile().unwrap();
        assert!(compiled.next_after("only", &json!({})).unwrap().is_empty());
    }
}
