//! Per-root-cause hypothesis scoring.
//!
//! For a root cause R with evidence-bearing descendants T(R):
//! - an anomalous node in T(R) is *explained* unless its deviation runs
//!   against the sign every path from R predicts,
//! - consistency = confidence mass of explained nodes / confidence mass of
//!   T(R), scaled by `1 - penalty * (share of anomalies R cannot reach)`,
//! - path strength of an explained node combines its directed paths; when
//!   every path crosses a stable intermediate the route is d-separated and
//!   only `blocked_route_weight` of the strength survives. A root whose
//!   explained evidence is all blocked scores zero,
//! - severity = mean fractional deviation of explained nodes,
//! - raw = mean(strength x evidence confidence) x severity x
//!   (floor + (1 - floor) x consistency).

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::anomaly::Deviation;
use crate::causal::{CausalGraph, CausalPath, IndependenceChecker, NodeId, NodeKind};
use crate::config::ScoringConfig;

/// Deviations keyed by the graph node they provide evidence for.
pub type EvidenceMap = BTreeMap<NodeId, Deviation>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evidence {
    pub node: String,
    /// Combined path strength times evidence confidence.
    pub strength: f64,
    pub fractional_delta: f64,
    pub signed_fractional: f64,
    pub confidence: f64,
    /// Every route runs through a stable intermediate.
    pub blocked: bool,
    pub synthetic: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RootScore {
    pub root: NodeId,
    pub name: String,
    pub raw_score: f64,
    pub consistency: f64,
    pub severity: f64,
    pub mean_path_strength: f64,
    /// Mean confidence of the explained evidence; 1.0 when there is none.
    pub evidence_confidence: f64,
    /// Ordered by strength, strongest first.
    pub evidence: Vec<Evidence>,
    /// Anomalies reachable from the root that deviate the wrong way.
    pub contradicted: Vec<String>,
    pub mechanisms: Vec<String>,
    pub blocked_by: Vec<String>,
}

impl RootScore {
    fn empty(root: NodeId, name: &str) -> Self {
        Self {
            root,
            name: name.to_string(),
            raw_score: 0.0,
            consistency: 0.0,
            severity: 0.0,
            mean_path_strength: 0.0,
            evidence_confidence: 1.0,
            evidence: Vec::new(),
            contradicted: Vec::new(),
            mechanisms: Vec::new(),
            blocked_by: Vec::new(),
        }
    }
}

struct Explained<'a> {
    node: NodeId,
    strength: f64,
    best: &'a CausalPath,
    deviation: &'a Deviation,
    blocked: bool,
}

#[derive(Debug, Clone, Default)]
pub struct HypothesisScorer {
    config: ScoringConfig,
}

impl HypothesisScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Scores every root cause, in node order.
    pub fn score(&self, graph: &CausalGraph, evidence: &EvidenceMap) -> Vec<RootScore> {
        let anomalous: BTreeSet<NodeId> = evidence
            .iter()
            .filter(|(_, d)| d.anomalous)
            .map(|(&id, _)| id)
            .collect();
        let stable: BTreeSet<NodeId> = evidence
            .iter()
            .filter(|(id, d)| !d.anomalous && graph.kind(**id) == NodeKind::Intermediate)
            .map(|(&id, _)| id)
            .collect();
        let checker = IndependenceChecker::new(graph);

        graph
            .root_causes()
            .into_iter()
            .map(|root| self.score_root(graph, &checker, root, evidence, &anomalous, &stable))
            .collect()
    }

    fn score_root(
        &self,
        graph: &CausalGraph,
        checker: &IndependenceChecker<'_>,
        root: NodeId,
        evidence: &EvidenceMap,
        anomalous: &BTreeSet<NodeId>,
        stable: &BTreeSet<NodeId>,
    ) -> RootScore {
        let name = graph.name(root);
        let paths = graph.paths_from(root);
        let reachable: Vec<NodeId> = paths
            .keys()
            .copied()
            .filter(|id| evidence.contains_key(id))
            .collect();
        if reachable.is_empty() {
            return RootScore::empty(root, name);
        }

        let mut explained = Vec::new();
        let mut contradicted = Vec::new();
        let mut blocked_by = BTreeSet::new();

        for &target in &reachable {
            let deviation = &evidence[&target];
            if !deviation.anomalous {
                continue;
            }
            let routes = &paths[&target];

            if self.config.check_direction {
                if let Some(expected) = expected_sign(routes) {
                    let observed = deviation.direction();
                    if observed != 0.0 && observed != expected {
                        contradicted.push(graph.name(target).to_string());
                        continue;
                    }
                }
            }

            let open: Vec<&CausalPath> = routes
                .iter()
                .filter(|p| !p.interior().iter().any(|n| stable.contains(n)))
                .collect();

            let (strength, best, blocked) = if let Some(best) = strongest(&open) {
                let strength = self
                    .config
                    .path_combination
                    .combine(open.iter().map(|p| p.strength));
                (strength, best, false)
            } else {
                let all: Vec<&CausalPath> = routes.iter().collect();
                let Some(best) = strongest(&all) else { continue };
                let separation = checker.d_separated_ids(root, target, stable);
                if separation.separated {
                    blocked_by.extend(
                        separation
                            .blocking
                            .into_iter()
                            .filter(|b| graph.id(b).map_or(false, |id| stable.contains(&id))),
                    );
                } else {
                    for path in &all {
                        blocked_by.extend(
                            path.interior()
                                .iter()
                                .filter(|n| stable.contains(*n))
                                .map(|&n| graph.name(n).to_string()),
                        );
                    }
                }
                let strength = self
                    .config
                    .path_combination
                    .combine(all.iter().map(|p| p.strength))
                    * self.config.blocked_route_weight;
                (strength, best, true)
            };

            explained.push(Explained {
                node: target,
                strength: strength * deviation.confidence,
                best,
                deviation,
                blocked,
            });
        }

        if explained.iter().all(|e| e.blocked) {
            if !explained.is_empty() {
                log::debug!("Root {name}: every route to its evidence is blocked");
            }
            let mut score = RootScore::empty(root, name);
            score.contradicted = contradicted;
            score.blocked_by = blocked_by.into_iter().collect();
            return score;
        }

        explained.sort_by(|a, b| {
            b.strength
                .total_cmp(&a.strength)
                .then_with(|| graph.name(a.node).cmp(graph.name(b.node)))
        });

        let reachable_mass: f64 = reachable.iter().map(|id| evidence[id].confidence).sum();
        let explained_mass: f64 = explained.iter().map(|e| e.deviation.confidence).sum();
        let unreachable = anomalous.iter().filter(|id| !paths.contains_key(id)).count();
        let unreachable_share = if anomalous.is_empty() {
            0.0
        } else {
            unreachable as f64 / anomalous.len() as f64
        };
        let coverage = if reachable_mass > 0.0 {
            explained_mass / reachable_mass
        } else {
            0.0
        };
        let consistency =
            (coverage * (1.0 - self.config.unreachable_penalty * unreachable_share)).clamp(0.0, 1.0);

        let n = explained.len() as f64;
        let mean_path_strength = explained.iter().map(|e| e.strength).sum::<f64>() / n;
        let severity = explained
            .iter()
            .map(|e| e.deviation.fractional_delta)
            .sum::<f64>()
            / n;
        let evidence_confidence = explained.iter().map(|e| e.deviation.confidence).sum::<f64>() / n;
        let floor = self.config.consistency_floor;
        let raw_score = mean_path_strength * severity * (floor + (1.0 - floor) * consistency);

        let mut mechanisms: Vec<String> = Vec::new();
        for e in &explained {
            for m in e.best.mechanisms(graph) {
                if !mechanisms.iter().any(|existing| existing == m) {
                    mechanisms.push(m.to_string());
                }
            }
        }

        log::debug!(
            "Root {}: raw {:.4} (strength {:.3}, severity {:.3}, consistency {:.3}, {} explained)",
            name,
            raw_score,
            mean_path_strength,
            severity,
            consistency,
            explained.len()
        );

        RootScore {
            root,
            name: name.to_string(),
            raw_score,
            consistency,
            severity,
            mean_path_strength,
            evidence_confidence,
            evidence: explained
                .iter()
                .map(|e| Evidence {
                    node: graph.name(e.node).to_string(),
                    strength: e.strength,
                    fractional_delta: e.deviation.fractional_delta,
                    signed_fractional: e.deviation.signed_fractional,
                    confidence: e.deviation.confidence,
                    blocked: e.blocked,
                    synthetic: e.deviation.synthetic,
                })
                .collect(),
            contradicted,
            mechanisms,
            blocked_by: blocked_by.into_iter().collect(),
        }
    }
}

/// Sign every route agrees on, if all are signed and agree.
fn expected_sign(routes: &[CausalPath]) -> Option<f64> {
    let mut sign = None;
    for path in routes {
        let s = path.polarity.sign()?;
        match sign {
            None => sign = Some(s),
            Some(prev) if prev != s => return None,
            _ => {}
        }
    }
    sign
}

fn strongest<'a>(paths: &[&'a CausalPath]) -> Option<&'a CausalPath> {
    paths
        .iter()
        .copied()
        .fold(None, |best: Option<&CausalPath>, p| match best {
            Some(b) if b.strength >= p.strength => Some(b),
            _ => Some(p),
        })
}
