//! Conditional independence via d-separation.
//!
//! Two nodes X and Z are d-separated by a conditioning set S when every
//! undirected path between them is blocked:
//! - at a non-collider that belongs to S, or
//! - at a collider (`-> v <-`) such that neither v nor any of its
//!   descendants belongs to S.
//!
//! Paths are enumerated inside the ancestral subgraph of {X, Z} ∪ S, which
//! is sufficient: a d-connecting path never leaves it. The moral-graph
//! criterion is provided as an independent cross-check.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

use super::{CausalGraph, GraphError, NodeId};

/// Outcome of a d-separation query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Separation {
    pub separated: bool,
    /// First blocking node of every blocked path, sorted and de-duplicated.
    pub blocking: Vec<String>,
    /// One unblocked path when the nodes are d-connected.
    pub open_path: Option<Vec<String>>,
}

/// A named independence assumption the fault model is expected to satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndependenceClaim {
    pub name: String,
    pub x: String,
    pub z: String,
    #[serde(default)]
    pub given: Vec<String>,
    /// Whether the claim asserts separation (`true`) or dependence.
    #[serde(default = "default_expect_separated")]
    pub expect_separated: bool,
}

fn default_expect_separated() -> bool {
    true
}

impl IndependenceClaim {
    pub fn separated(name: &str, x: &str, z: &str, given: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            x: x.to_string(),
            z: z.to_string(),
            given: given.iter().map(|s| s.to_string()).collect(),
            expect_separated: true,
        }
    }

    pub fn connected(name: &str, x: &str, z: &str, given: &[&str]) -> Self {
        Self {
            expect_separated: false,
            ..Self::separated(name, x, z, given)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimOutcome {
    pub name: String,
    pub holds: bool,
    pub separation: Separation,
}

pub struct IndependenceChecker<'g> {
    graph: &'g CausalGraph,
}

impl<'g> IndependenceChecker<'g> {
    pub fn new(graph: &'g CausalGraph) -> Self {
        Self { graph }
    }

    /// Name-based d-separation query.
    pub fn d_separated(&self, x: &str, z: &str, given: &[&str]) -> Result<Separation, GraphError> {
        let x = self.graph.require(x)?;
        let z = self.graph.require(z)?;
        let given = given
            .iter()
            .map(|name| self.graph.require(name))
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(self.d_separated_ids(x, z, &given))
    }

    pub fn d_separated_ids(&self, x: NodeId, z: NodeId, given: &BTreeSet<NodeId>) -> Separation {
        let g = self.graph;
        if x == z {
            return Separation {
                separated: false,
                blocking: Vec::new(),
                open_path: Some(vec![g.name(x).to_string()]),
            };
        }
        // Conditioning on an endpoint determines it.
        if let Some(&hit) = [x, z].iter().find(|id| given.contains(id)) {
            return Separation {
                separated: true,
                blocking: vec![g.name(hit).to_string()],
                open_path: None,
            };
        }

        let ancestral = self.ancestral_set(&[x, z], given);
        let mut blocking = BTreeSet::new();
        let mut open_path = None;

        let mut on_path = vec![false; g.len()];
        let mut path = vec![x];
        on_path[x] = true;
        self.walk_paths(z, &ancestral, &mut on_path, &mut path, &mut |p| {
            match self.first_blocker(p, given) {
                Some(b) => {
                    blocking.insert(g.name(b).to_string());
                    true
                }
                None => {
                    open_path = Some(p.iter().map(|&id| g.name(id).to_string()).collect());
                    false
                }
            }
        });

        let separated = open_path.is_none();
        log::trace!(
            "d-separation {} _||_ {} | {:?}: {}",
            g.name(x),
            g.name(z),
            given.iter().map(|&id| g.name(id)).collect::<Vec<_>>(),
            separated
        );
        Separation {
            separated,
            blocking: if separated {
                blocking.into_iter().collect()
            } else {
                Vec::new()
            },
            open_path,
        }
    }

    /// Moralized ancestral graph criterion: remove S, then X and Z must be
    /// disconnected.
    pub fn moral_separated(&self, x: NodeId, z: NodeId, given: &BTreeSet<NodeId>) -> bool {
        if x == z {
            return false;
        }
        if given.contains(&x) || given.contains(&z) {
            return true;
        }
        let g = self.graph;
        let ancestral = self.ancestral_set(&[x, z], given);
        let mut adjacency = vec![BTreeSet::new(); g.len()];
        for &v in &ancestral {
            let parents = g.parents(v);
            for &p in &parents {
                adjacency[p].insert(v);
                adjacency[v].insert(p);
            }
            for (i, &a) in parents.iter().enumerate() {
                for &b in &parents[i + 1..] {
                    adjacency[a].insert(b);
                    adjacency[b].insert(a);
                }
            }
        }

        let mut seen = vec![false; g.len()];
        let mut queue = VecDeque::from([x]);
        seen[x] = true;
        while let Some(v) = queue.pop_front() {
            if v == z {
                return false;
            }
            for &n in &adjacency[v] {
                if !seen[n] && !given.contains(&n) && ancestral.contains(&n) {
                    seen[n] = true;
                    queue.push_back(n);
                }
            }
        }
        true
    }

    /// Evaluates a list of independence assumptions.
    pub fn audit(&self, claims: &[IndependenceClaim]) -> Result<Vec<ClaimOutcome>, GraphError> {
        claims
            .iter()
            .map(|claim| {
                let given: Vec<&str> = claim.given.iter().map(String::as_str).collect();
                let separation = self.d_separated(&claim.x, &claim.z, &given)?;
                let holds = separation.separated == claim.expect_separated;
                if !holds {
                    log::warn!("Causal assumption '{}' does not hold", claim.name);
                }
                Ok(ClaimOutcome {
                    name: claim.name.clone(),
                    holds,
                    separation,
                })
            })
            .collect()
    }

    fn ancestral_set(&self, endpoints: &[NodeId], given: &BTreeSet<NodeId>) -> BTreeSet<NodeId> {
        let mut set: BTreeSet<NodeId> = endpoints.iter().copied().collect();
        set.extend(given.iter().copied());
        let seeds: Vec<NodeId> = set.iter().copied().collect();
        for id in seeds {
            set.extend(self.graph.ancestors(id));
        }
        set
    }

    /// Depth-first enumeration of undirected simple paths ending at `goal`.
    /// The visitor returns `false` to stop the search.
    fn walk_paths<F>(
        &self,
        goal: NodeId,
        allowed: &BTreeSet<NodeId>,
        on_path: &mut Vec<bool>,
        path: &mut Vec<NodeId>,
        visit: &mut F,
    ) -> bool
    where
        F: FnMut(&[NodeId]) -> bool,
    {
        let g = self.graph;
        let tail = path[path.len() - 1];
        let neighbours = g.parents(tail).into_iter().chain(g.children(tail));
        for next in neighbours {
            if on_path[next] || !allowed.contains(&next) {
                continue;
            }
            path.push(next);
            let keep_going = if next == goal {
                visit(path)
            } else {
                on_path[next] = true;
                let go = self.walk_paths(goal, allowed, on_path, path, visit);
                on_path[next] = false;
                go
            };
            path.pop();
            if !keep_going {
                return false;
            }
        }
        true
    }

    fn first_blocker(&self, path: &[NodeId], given: &BTreeSet<NodeId>) -> Option<NodeId> {
        let g = self.graph;
        for window in path.windows(3) {
            let (prev, v, next) = (window[0], window[1], window[2]);
            let collider = g.has_edge(prev, v) && g.has_edge(next, v);
            let blocked = if collider {
                !given.contains(&v) && !g.descendants(v).iter().any(|d| given.contains(d))
            } else {
                given.contains(&v)
            };
            if blocked {
                return Some(v);
            }
        }
        None
    }
}
