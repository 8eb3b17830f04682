//! Directed path enumeration and path-strength combination.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use super::{CausalGraph, NodeId, Polarity};

/// A simple directed path, stored as its node sequence and the edges between them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CausalPath {
    pub nodes: Vec<NodeId>,
    pub edges: Vec<usize>,
    /// Product of edge weights.
    pub strength: f64,
    /// Composed edge polarity.
    pub polarity: Polarity,
}

impl CausalPath {
    pub fn source(&self) -> NodeId {
        self.nodes[0]
    }

    pub fn target(&self) -> NodeId {
        self.nodes[self.nodes.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Nodes strictly between source and target.
    pub fn interior(&self) -> &[NodeId] {
        if self.nodes.len() < 2 {
            return &[];
        }
        &self.nodes[1..self.nodes.len() - 1]
    }

    pub fn passes_through(&self, id: NodeId) -> bool {
        self.interior().contains(&id)
    }

    /// `a -> b -> c`
    pub fn describe(&self, graph: &CausalGraph) -> String {
        self.nodes
            .iter()
            .map(|&id| graph.name(id))
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// Edge mechanisms in traversal order.
    pub fn mechanisms<'g>(&self, graph: &'g CausalGraph) -> Vec<&'g str> {
        self.edges
            .iter()
            .map(|&e| graph.edge(e).mechanism.as_str())
            .filter(|m| !m.is_empty())
            .collect()
    }
}

/// How strengths of parallel paths between the same pair of nodes combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathCombination {
    /// Strongest route dominates.
    #[default]
    Maximum,
    /// `1 - prod(1 - s_i)`: independent routes reinforce each other.
    NoisyOr,
}

impl PathCombination {
    pub fn combine<I>(self, strengths: I) -> f64
    where
        I: IntoIterator<Item = f64>,
    {
        match self {
            PathCombination::Maximum => strengths.into_iter().fold(0.0, f64::max),
            PathCombination::NoisyOr => {
                1.0 - strengths
                    .into_iter()
                    .fold(1.0, |miss, s| miss * (1.0 - s.clamp(0.0, 1.0)))
            }
        }
    }
}

impl FromStr for PathCombination {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "maximum" | "max" => Ok(PathCombination::Maximum),
            "noisy_or" | "noisy-or" => Ok(PathCombination::NoisyOr),
            other => Err(format!("unknown path combination '{other}'")),
        }
    }
}

impl CausalGraph {
    /// Every simple directed path from `from` to `to`, in edge insertion order.
    ///
    /// Returns nothing when `from == to`.
    pub fn all_paths(&self, from: NodeId, to: NodeId) -> Vec<CausalPath> {
        let mut out = Vec::new();
        if from == to {
            return out;
        }
        let mut on_path = vec![false; self.len()];
        let mut nodes = vec![from];
        let mut edges = Vec::new();
        on_path[from] = true;
        self.extend_paths(Some(to), &mut on_path, &mut nodes, &mut edges, &mut |p| {
            out.push(p)
        });
        out
    }

    /// Every simple directed path leaving `from`, grouped by endpoint.
    pub fn paths_from(&self, from: NodeId) -> BTreeMap<NodeId, Vec<CausalPath>> {
        let mut out: BTreeMap<NodeId, Vec<CausalPath>> = BTreeMap::new();
        let mut on_path = vec![false; self.len()];
        let mut nodes = vec![from];
        let mut edges = Vec::new();
        on_path[from] = true;
        self.extend_paths(None, &mut on_path, &mut nodes, &mut edges, &mut |p| {
            out.entry(p.target()).or_default().push(p)
        });
        out
    }

    fn extend_paths<F>(
        &self,
        goal: Option<NodeId>,
        on_path: &mut Vec<bool>,
        nodes: &mut Vec<NodeId>,
        edges: &mut Vec<usize>,
        emit: &mut F,
    ) where
        F: FnMut(CausalPath),
    {
        let tail = nodes[nodes.len() - 1];
        for (edge_idx, edge) in self.outgoing_edges(tail) {
            let next = edge.target;
            if on_path[next] {
                continue;
            }
            nodes.push(next);
            edges.push(edge_idx);
            on_path[next] = true;

            if goal.map_or(true, |g| g == next) {
                emit(self.path_from_parts(nodes, edges));
            }
            if goal != Some(next) {
                self.extend_paths(goal, on_path, nodes, edges, emit);
            }

            on_path[next] = false;
            edges.pop();
            nodes.pop();
        }
    }

    fn path_from_parts(&self, nodes: &[NodeId], edges: &[usize]) -> CausalPath {
        let mut strength = 1.0;
        let mut polarity = Polarity::Increase;
        for &e in edges {
            let edge = self.edge(e);
            strength *= edge.weight;
            polarity = polarity.then(edge.polarity);
        }
        CausalPath {
            nodes: nodes.to_vec(),
            edges: edges.to_vec(),
            strength,
            polarity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::causal::{GraphBuilder, Node, NodeKind};
    use approx::assert_relative_eq;

    fn diamond() -> CausalGraph {
        GraphBuilder::new()
            .node(Node::new("r", NodeKind::RootCause))
            .node(Node::new("a", NodeKind::Intermediate))
            .node(Node::new("b", NodeKind::Intermediate))
            .node(Node::new("o", NodeKind::Observable))
            .signed_edge("r", "a", 0.9, Polarity::Decrease, "r lowers a")
            .signed_edge("r", "b", 0.5, Polarity::Increase, "r raises b")
            .signed_edge("a", "o", 0.8, Polarity::Increase, "a feeds o")
            .signed_edge("b", "o", 0.6, Polarity::Decrease, "b suppresses o")
            .build()
            .unwrap()
    }

    #[test]
    fn test_all_paths_diamond() {
        let g = diamond();
        let (r, o) = (g.id("r").unwrap(), g.id("o").unwrap());
        let paths = g.all_paths(r, o);

        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].describe(&g), "r -> a -> o");
        assert_eq!(paths[1].describe(&g), "r -> b -> o");
        assert_relative_eq!(paths[0].strength, 0.72, epsilon = 1e-12);
        assert_relative_eq!(paths[1].strength, 0.30, epsilon = 1e-12);
        assert_eq!(paths[0].polarity, Polarity::Decrease);
        assert_eq!(paths[1].polarity, Polarity::Decrease);
        assert_eq!(paths[0].mechanisms(&g), vec!["r lowers a", "a feeds o"]);
        assert!(paths[0].passes_through(g.id("a").unwrap()));
        assert!(!paths[0].passes_through(o));
    }

    #[test]
    fn test_no_path_to_self_or_upstream() {
        let g = diamond();
        let (r, o) = (g.id("r").unwrap(), g.id("o").unwrap());
        assert!(g.all_paths(r, r).is_empty());
        assert!(g.all_paths(o, r).is_empty());
    }

    #[test]
    fn test_paths_from_groups_by_target() {
        let g = diamond();
        let by_target = g.paths_from(g.id("r").unwrap());
        assert_eq!(by_target.len(), 3);
        assert_eq!(by_target[&g.id("o").unwrap()].len(), 2);
        assert_eq!(by_target[&g.id("a").unwrap()].len(), 1);
    }

    #[test]
    fn test_path_combination() {
        let strengths = [0.72, 0.30];
        assert_relative_eq!(PathCombination::Maximum.combine(strengths), 0.72);
        assert_relative_eq!(
            PathCombination::NoisyOr.combine(strengths),
            1.0 - 0.28 * 0.70,
            epsilon = 1e-12
        );
        assert_eq!(PathCombination::Maximum.combine(std::iter::empty()), 0.0);
        assert_eq!("noisy_or".parse::<PathCombination>(), Ok(PathCombination::NoisyOr));
        assert!("sum".parse::<PathCombination>().is_err());
    }
}
