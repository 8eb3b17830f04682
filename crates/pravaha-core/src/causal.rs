//! Causal graph over fault, propagation and observable variables.
//!
//! The graph is an arena: nodes and edges live in flat vectors and are
//! addressed by index. It is built once through [`GraphBuilder`], validated
//! (no cycles, nothing points into a root cause, nothing leaves an
//! observable) and never mutated afterwards, so a single instance can be
//! shared between streams behind an `Arc`.
//!
//! # Example
//! ```rust
//! use pravaha_core::causal::{GraphBuilder, Node, NodeKind};
//!
//! let graph = GraphBuilder::new()
//!     .node(Node::new("panel_fault", NodeKind::RootCause))
//!     .node(Node::new("array_power", NodeKind::Intermediate))
//!     .node(Node::new("array_power_measured", NodeKind::Observable))
//!     .edge("panel_fault", "array_power", 0.9, "Cells stop producing")
//!     .edge("array_power", "array_power_measured", 1.0, "Direct sensor")
//!     .build()
//!     .unwrap();
//!
//! let root = graph.id("panel_fault").unwrap();
//! assert_eq!(graph.reachable_observables(root).len(), 1);
//! ```

pub mod independence;
pub mod paths;
pub mod power;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use thiserror::Error;

pub use independence::{ClaimOutcome, IndependenceChecker, IndependenceClaim, Separation};
pub use paths::{CausalPath, PathCombination};

/// Index of a node inside its graph.
pub type NodeId = usize;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("duplicate node '{0}'")]
    DuplicateNode(String),
    #[error("unknown node '{0}'")]
    UnknownNode(String),
    #[error("duplicate edge {from} -> {to}")]
    DuplicateEdge { from: String, to: String },
    #[error("edge {from} -> {to} targets a root cause")]
    EdgeIntoRootCause { from: String, to: String },
    #[error("edge {from} -> {to} leaves an observable")]
    EdgeFromObservable { from: String, to: String },
    #[error("edge {from} -> {to} has weight {weight}, expected (0, 1]")]
    InvalidWeight {
        from: String,
        to: String,
        weight: f64,
    },
    #[error("cycle detected: {}", cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },
}

/// Role of a variable in the fault model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    /// Underlying fault. Never has parents.
    RootCause,
    /// Unmeasured physical state that propagates faults.
    Intermediate,
    /// Telemetry-backed measurement. Never has children.
    Observable,
}

/// Expected direction of the effect along an edge.
///
/// A root cause "activating" counts as an increase, so a fault that lowers
/// its child carries `Decrease`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Polarity {
    Increase,
    Decrease,
    #[default]
    Unspecified,
}

impl Polarity {
    /// Sign of the effect, `None` when unknown.
    pub fn sign(self) -> Option<f64> {
        match self {
            Polarity::Increase => Some(1.0),
            Polarity::Decrease => Some(-1.0),
            Polarity::Unspecified => None,
        }
    }

    /// Composes two consecutive edges. Unknown is absorbing.
    pub fn then(self, next: Polarity) -> Polarity {
        match (self, next) {
            (Polarity::Unspecified, _) | (_, Polarity::Unspecified) => Polarity::Unspecified,
            (a, b) if a == b => Polarity::Increase,
            _ => Polarity::Decrease,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    pub description: String,
    pub unit: String,
    /// Concrete ways this node is known to fail.
    #[serde(default)]
    pub degradation_modes: Vec<String>,
}

impl Node {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: String::new(),
            unit: String::new(),
            degradation_modes: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_degradation_modes<I, S>(mut self, modes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.degradation_modes = modes.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    /// Causal strength in (0, 1].
    pub weight: f64,
    /// Operator-facing text describing how the source drives the target.
    pub mechanism: String,
    #[serde(default)]
    pub polarity: Polarity,
}

#[derive(Debug, Clone)]
struct EdgeSpec {
    source: String,
    target: String,
    weight: f64,
    polarity: Polarity,
    mechanism: String,
}

/// Collects nodes and edges by name; validation happens in [`GraphBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    nodes: Vec<Node>,
    edges: Vec<EdgeSpec>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn edge(self, source: &str, target: &str, weight: f64, mechanism: &str) -> Self {
        self.signed_edge(source, target, weight, Polarity::Unspecified, mechanism)
    }

    pub fn signed_edge(
        mut self,
        source: &str,
        target: &str,
        weight: f64,
        polarity: Polarity,
        mechanism: &str,
    ) -> Self {
        self.edges.push(EdgeSpec {
            source: source.to_string(),
            target: target.to_string(),
            weight,
            polarity,
            mechanism: mechanism.to_string(),
        });
        self
    }

    /// Validates and freezes the graph.
    pub fn build(self) -> Result<CausalGraph, GraphError> {
        let mut index = HashMap::with_capacity(self.nodes.len());
        for (id, node) in self.nodes.iter().enumerate() {
            if index.insert(node.name.clone(), id).is_some() {
                return Err(GraphError::DuplicateNode(node.name.clone()));
            }
        }

        let n = self.nodes.len();
        let mut edges = Vec::with_capacity(self.edges.len());
        let mut outgoing = vec![Vec::new(); n];
        let mut incoming = vec![Vec::new(); n];
        let mut seen = BTreeSet::new();

        for spec in self.edges {
            let source = *index
                .get(&spec.source)
                .ok_or_else(|| GraphError::UnknownNode(spec.source.clone()))?;
            let target = *index
                .get(&spec.target)
                .ok_or_else(|| GraphError::UnknownNode(spec.target.clone()))?;

            if !spec.weight.is_finite() || spec.weight <= 0.0 || spec.weight > 1.0 {
                return Err(GraphError::InvalidWeight {
                    from: spec.source,
                    to: spec.target,
                    weight: spec.weight,
                });
            }
            if self.nodes[target].kind == NodeKind::RootCause {
                return Err(GraphError::EdgeIntoRootCause {
                    from: spec.source,
                    to: spec.target,
                });
            }
            if self.nodes[source].kind == NodeKind::Observable {
                return Err(GraphError::EdgeFromObservable {
                    from: spec.source,
                    to: spec.target,
                });
            }
            if !seen.insert((source, target)) {
                return Err(GraphError::DuplicateEdge {
                    from: spec.source,
                    to: spec.target,
                });
            }

            let edge_idx = edges.len();
            outgoing[source].push(edge_idx);
            incoming[target].push(edge_idx);
            edges.push(Edge {
                source,
                target,
                weight: spec.weight,
                mechanism: spec.mechanism,
                polarity: spec.polarity,
            });
        }

        let graph = CausalGraph {
            nodes: self.nodes,
            edges,
            index,
            outgoing,
            incoming,
        };

        if let Some(cycle) = graph.find_cycle() {
            return Err(GraphError::CycleDetected {
                cycle: cycle.iter().map(|&id| graph.name(id).to_string()).collect(),
            });
        }

        log::debug!(
            "Causal graph built: {} nodes ({} root causes, {} observables), {} edges",
            graph.len(),
            graph.root_causes().len(),
            graph.observables().len(),
            graph.edge_count()
        );
        Ok(graph)
    }
}

/// Immutable directed acyclic causal graph.
#[derive(Debug, Clone)]
pub struct CausalGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    index: HashMap<String, NodeId>,
    /// Edge indices leaving each node, in insertion order.
    outgoing: Vec<Vec<usize>>,
    /// Edge indices entering each node, in insertion order.
    incoming: Vec<Vec<usize>>,
}

impl CausalGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn id(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    /// Like [`CausalGraph::id`] but reports the missing name.
    pub fn require(&self, name: &str) -> Result<NodeId, GraphError> {
        self.id(name)
            .ok_or_else(|| GraphError::UnknownNode(name.to_string()))
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.id(name).map(|id| &self.nodes[id])
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.nodes[id].name
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.nodes[id].kind
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edge(&self, idx: usize) -> &Edge {
        &self.edges[idx]
    }

    pub fn outgoing_edges(&self, id: NodeId) -> impl Iterator<Item = (usize, &Edge)> + '_ {
        self.outgoing[id].iter().map(move |&e| (e, &self.edges[e]))
    }

    pub fn incoming_edges(&self, id: NodeId) -> impl Iterator<Item = (usize, &Edge)> + '_ {
        self.incoming[id].iter().map(move |&e| (e, &self.edges[e]))
    }

    pub fn parents(&self, id: NodeId) -> Vec<NodeId> {
        self.incoming[id]
            .iter()
            .map(|&e| self.edges[e].source)
            .collect()
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.outgoing[id]
            .iter()
            .map(|&e| self.edges[e].target)
            .collect()
    }

    pub fn has_edge(&self, source: NodeId, target: NodeId) -> bool {
        self.outgoing[source]
            .iter()
            .any(|&e| self.edges[e].target == target)
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> Vec<NodeId> {
        (0..self.nodes.len())
            .filter(|&id| self.nodes[id].kind == kind)
            .collect()
    }

    pub fn root_causes(&self) -> Vec<NodeId> {
        self.nodes_of_kind(NodeKind::RootCause)
    }

    pub fn intermediates(&self) -> Vec<NodeId> {
        self.nodes_of_kind(NodeKind::Intermediate)
    }

    pub fn observables(&self) -> Vec<NodeId> {
        self.nodes_of_kind(NodeKind::Observable)
    }

    /// Every node reachable through at least one edge, in id order.
    pub fn descendants(&self, id: NodeId) -> BTreeSet<NodeId> {
        self.walk(id, |g, n| g.children(n))
    }

    /// Every node with a directed path into `id`, in id order.
    pub fn ancestors(&self, id: NodeId) -> BTreeSet<NodeId> {
        self.walk(id, |g, n| g.parents(n))
    }

    pub fn reachable_observables(&self, root: NodeId) -> Vec<NodeId> {
        self.descendants(root)
            .into_iter()
            .filter(|&id| self.nodes[id].kind == NodeKind::Observable)
            .collect()
    }

    fn walk<F>(&self, start: NodeId, next: F) -> BTreeSet<NodeId>
    where
        F: Fn(&Self, NodeId) -> Vec<NodeId>,
    {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<NodeId> = next(self, start).into();
        while let Some(n) = queue.pop_front() {
            if seen.insert(n) {
                queue.extend(next(self, n));
            }
        }
        seen
    }

    /// Returns the nodes of one cycle, closed on its first node, if any exists.
    fn find_cycle(&self) -> Option<Vec<NodeId>> {
        let n = self.nodes.len();
        let mut visited = vec![false; n];
        let mut rec_stack = vec![false; n];
        let mut trail = Vec::new();

        for v in 0..n {
            if !visited[v] {
                if let Some(cycle) = self.cycle_from(v, &mut visited, &mut rec_stack, &mut trail) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn cycle_from(
        &self,
        v: NodeId,
        visited: &mut Vec<bool>,
        rec_stack: &mut Vec<bool>,
        trail: &mut Vec<NodeId>,
    ) -> Option<Vec<NodeId>> {
        visited[v] = true;
        rec_stack[v] = true;
        trail.push(v);

        for child in self.children(v) {
            if !visited[child] {
                if let Some(cycle) = self.cycle_from(child, visited, rec_stack, trail) {
                    return Some(cycle);
                }
            } else if rec_stack[child] {
                let start = trail.iter().position(|&t| t == child).unwrap_or(0);
                let mut cycle = trail[start..].to_vec();
                cycle.push(child);
                return Some(cycle);
            }
        }

        rec_stack[v] = false;
        trail.pop();
        None
    }
}
