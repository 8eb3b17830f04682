//! Root-cause ranking: detection, scoring, confidence and normalisation.
//!
//! `probability(R) = raw(R) / sum(raw)` over the hypotheses that survive
//! the confidence filter, so the returned probabilities always sum to 1.
//! Hypotheses are ordered by probability, then confidence, then name.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::anomaly::{AnomalyDetector, AnomalyReport};
use crate::causal::{CausalGraph, GraphError, NodeId, NodeKind};
use crate::config::{ConfigError, DetectorConfig, PravahaConfig, RankingConfig};
use crate::estimators::{EstimatorError, GapEstimate};
use crate::scoring::{EvidenceMap, HypothesisScorer, RootScore};
use crate::telemetry::{TelemetryError, TelemetrySeries};

#[derive(Error, Debug)]
pub enum DiagnosisError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Estimator(#[from] EstimatorError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Maps telemetry channel names onto graph nodes.
///
/// Channels without an explicit entry resolve to the node of the same name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelMap {
    map: BTreeMap<String, String>,
}

impl ChannelMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, C, N>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (C, N)>,
        C: Into<String>,
        N: Into<String>,
    {
        Self {
            map: pairs
                .into_iter()
                .map(|(c, n)| (c.into(), n.into()))
                .collect(),
        }
    }

    pub fn insert(&mut self, channel: impl Into<String>, node: impl Into<String>) {
        self.map.insert(channel.into(), node.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(c, n)| (c.as_str(), n.as_str()))
    }

    pub fn resolve(&self, channel: &str, graph: &CausalGraph) -> Option<NodeId> {
        match self.map.get(channel) {
            Some(node) => graph.id(node),
            None => graph.id(channel),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub root_cause: String,
    pub raw_score: f64,
    pub probability: f64,
    pub confidence: f64,
    pub consistency: f64,
    pub severity: f64,
    /// Explained anomalous nodes, strongest first.
    pub evidence: Vec<String>,
    pub mechanisms: Vec<String>,
    /// Stable intermediates that cut every route to some evidence.
    pub blocked_by: Vec<String>,
    pub explanation: String,
}

/// Everything one analysis produced, not only the surviving hypotheses.
#[derive(Debug, Clone)]
pub struct Diagnosis {
    pub hypotheses: Vec<Hypothesis>,
    pub anomalies: AnomalyReport,
    pub scores: Vec<RootScore>,
}

#[derive(Debug, Clone)]
pub struct RootCauseRanker {
    graph: Arc<CausalGraph>,
    channels: ChannelMap,
    detector: DetectorConfig,
    scorer: HypothesisScorer,
    ranking: RankingConfig,
}

impl RootCauseRanker {
    pub fn new(graph: Arc<CausalGraph>, config: &PravahaConfig) -> Self {
        Self {
            graph,
            channels: ChannelMap::default(),
            detector: config.detector.clone(),
            scorer: HypothesisScorer::new(config.scoring.clone()),
            ranking: config.ranking.clone(),
        }
    }

    pub fn with_channels(mut self, channels: ChannelMap) -> Self {
        self.channels = channels;
        self
    }

    pub fn graph(&self) -> &Arc<CausalGraph> {
        &self.graph
    }

    pub fn channels(&self) -> &ChannelMap {
        &self.channels
    }

    pub fn analyze(
        &self,
        nominal: &TelemetrySeries,
        current: &TelemetrySeries,
        deviation_threshold: f64,
        confidence_threshold: f64,
    ) -> Result<Vec<Hypothesis>, DiagnosisError> {
        self.analyze_with_estimates(nominal, current, &[], deviation_threshold, confidence_threshold)
    }

    /// Like [`RootCauseRanker::analyze`], with gap estimates filling the
    /// holes in `current` and contributing hidden-state evidence.
    pub fn analyze_with_estimates(
        &self,
        nominal: &TelemetrySeries,
        current: &TelemetrySeries,
        gaps: &[GapEstimate],
        deviation_threshold: f64,
        confidence_threshold: f64,
    ) -> Result<Vec<Hypothesis>, DiagnosisError> {
        Ok(self
            .diagnose(nominal, current, gaps, deviation_threshold, confidence_threshold)?
            .hypotheses)
    }

    pub fn diagnose(
        &self,
        nominal: &TelemetrySeries,
        current: &TelemetrySeries,
        gaps: &[GapEstimate],
        deviation_threshold: f64,
        confidence_threshold: f64,
    ) -> Result<Diagnosis, DiagnosisError> {
        if !deviation_threshold.is_finite() || deviation_threshold <= 0.0 {
            return Err(DiagnosisError::InvalidParameter(format!(
                "deviation threshold must be positive, got {deviation_threshold}"
            )));
        }
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(DiagnosisError::InvalidParameter(format!(
                "confidence threshold must be in [0, 1], got {confidence_threshold}"
            )));
        }

        let current = if gaps.iter().any(|g| !g.is_empty()) {
            let mut filled = current.clone();
            for gap in gaps {
                filled.fill_missing(gap.filled_samples())?;
            }
            Cow::Owned(filled)
        } else {
            Cow::Borrowed(current)
        };

        let mut anomalies = AnomalyDetector::new(self.detector.clone())
            .with_threshold(deviation_threshold)
            .detect(nominal, &current);
        for gap in gaps.iter().rev() {
            for deviation in gap.synthetic_deviations(nominal, deviation_threshold) {
                anomalies.merge_synthetic(deviation);
            }
        }

        let evidence = self.evidence(&anomalies);
        let scores = self.scorer.score(&self.graph, &evidence);
        let hypotheses = self.rank(&scores, confidence_threshold);

        log::debug!(
            "Diagnosis: {} anomalies, {} of {} root causes above confidence {:.2}",
            anomalies.anomaly_count(),
            hypotheses.len(),
            scores.len(),
            confidence_threshold
        );

        Ok(Diagnosis {
            hypotheses,
            anomalies,
            scores,
        })
    }

    /// Measured channels first; estimates only for nodes nothing measured.
    fn evidence(&self, anomalies: &AnomalyReport) -> EvidenceMap {
        let mut evidence = EvidenceMap::new();
        for (channel, deviation) in &anomalies.deviations {
            let Some(id) = self.channels.resolve(channel, &self.graph) else {
                log::debug!("Channel {channel} has no node in the causal graph");
                continue;
            };
            if self.graph.kind(id) == NodeKind::RootCause {
                continue;
            }
            if evidence.contains_key(&id) {
                log::debug!(
                    "Channel {channel} duplicates evidence for {}",
                    self.graph.name(id)
                );
                continue;
            }
            evidence.insert(id, deviation.clone());
        }
        for (node, deviation) in &anomalies.estimated {
            match self.graph.id(node) {
                Some(id) if self.graph.kind(id) != NodeKind::RootCause => {
                    evidence.entry(id).or_insert_with(|| deviation.clone());
                }
                _ => {}
            }
        }
        evidence
    }

    /// Ranking confidence of one scored root cause, in `[0, 1]`.
    pub fn confidence(&self, score: &RootScore) -> f64 {
        let r = &self.ranking;
        let saturation = r.evidence_saturation.max(1);
        let support = score.evidence.len().min(saturation) as f64 / saturation as f64;
        let structural = r.base_confidence
            + r.consistency_weight * score.consistency
            + r.evidence_weight * support
            + r.path_strength_weight * score.mean_path_strength;
        structural.clamp(0.0, 1.0) * score.evidence_confidence.clamp(0.0, 1.0)
    }

    /// Filters, normalises and orders scored root causes.
    pub fn rank(&self, scores: &[RootScore], confidence_threshold: f64) -> Vec<Hypothesis> {
        let survivors: Vec<(&RootScore, f64)> = scores
            .iter()
            .filter(|s| s.raw_score.is_finite() && s.raw_score > 0.0)
            .map(|s| (s, self.confidence(s)))
            .filter(|(_, c)| *c >= confidence_threshold)
            .collect();
        let total: f64 = survivors.iter().map(|(s, _)| s.raw_score).sum();
        if total <= 0.0 {
            return Vec::new();
        }

        let mut hypotheses: Vec<Hypothesis> = survivors
            .into_iter()
            .map(|(s, confidence)| Hypothesis {
                root_cause: s.name.clone(),
                raw_score: s.raw_score,
                probability: s.raw_score / total,
                confidence,
                consistency: s.consistency,
                severity: s.severity,
                evidence: s.evidence.iter().map(|e| e.node.clone()).collect(),
                mechanisms: s.mechanisms.clone(),
                blocked_by: s.blocked_by.clone(),
                explanation: self.explain(s),
            })
            .collect();

        hypotheses.sort_by(|a, b| {
            b.probability
                .total_cmp(&a.probability)
                .then_with(|| b.confidence.total_cmp(&a.confidence))
                .then_with(|| a.root_cause.cmp(&b.root_cause))
        });
        hypotheses
    }

    fn explain(&self, score: &RootScore) -> String {
        let node = self.graph.node(score.root);
        let mut lines = Vec::new();
        let mut headline = if node.description.is_empty() {
            node.name.clone()
        } else {
            node.description.clone()
        };
        if !node.degradation_modes.is_empty() {
            headline.push_str(&format!(
                " (modes: {})",
                node.degradation_modes.join(", ")
            ));
        }
        lines.push(headline);

        let evidence: Vec<String> = score
            .evidence
            .iter()
            .map(|e| {
                let tag = if e.synthetic { ", estimated" } else { "" };
                format!("{} {:+.1}%{}", e.node, e.signed_fractional * 100.0, tag)
            })
            .collect();
        lines.push(format!("Evidence: {}", evidence.join(", ")));
        if !score.blocked_by.is_empty() {
            lines.push(format!(
                "Routes blocked by stable readings at: {}",
                score.blocked_by.join(", ")
            ));
        }
        lines.join("\n")
    }
}
