//! Serializable summaries for operators and downstream tooling.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::anomaly::Deviation;
use crate::estimators::GapEstimate;
use crate::ranking::{Diagnosis, Hypothesis};
use crate::telemetry::TelemetrySample;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HiddenStateSummary {
    pub estimated_value: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapReport {
    pub gap_start_us: i64,
    pub gap_end_us: i64,
    pub gap_duration_samples: usize,
    pub confidence_factor: f64,
    /// Hidden nodes as estimated at the last missing instant.
    pub hidden_states: BTreeMap<String, HiddenStateSummary>,
    pub filled_samples: Vec<TelemetrySample>,
}

impl GapReport {
    pub fn from_estimate(estimate: &GapEstimate) -> Self {
        let hidden_states = estimate
            .ticks
            .last()
            .map(|tick| {
                tick.estimates
                    .iter()
                    .map(|e| {
                        (
                            e.node.clone(),
                            HiddenStateSummary {
                                estimated_value: e.estimated_value,
                                lower_bound: e.lower_bound,
                                upper_bound: e.upper_bound,
                                confidence: e.confidence,
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            gap_start_us: estimate.start_us,
            gap_end_us: estimate.end_us,
            gap_duration_samples: estimate.len(),
            confidence_factor: estimate.confidence_factor,
            hidden_states,
            filled_samples: estimate.filled_samples().cloned().collect(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl From<&GapEstimate> for GapReport {
    fn from(estimate: &GapEstimate) -> Self {
        Self::from_estimate(estimate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisReport {
    pub severity: f64,
    pub anomalous_channels: Vec<String>,
    pub estimated_anomalies: Vec<String>,
    pub excluded_channels: Vec<String>,
    pub hypotheses: Vec<Hypothesis>,
    pub gaps: Vec<GapReport>,
}

impl DiagnosisReport {
    pub fn new(diagnosis: &Diagnosis, gaps: &[GapEstimate]) -> Self {
        let anomalies = &diagnosis.anomalies;
        let flagged = |map: &BTreeMap<String, Deviation>| {
            map.iter()
                .filter(|(_, d)| d.anomalous)
                .map(|(name, _)| name.clone())
                .collect::<Vec<_>>()
        };
        Self {
            severity: anomalies.severity,
            anomalous_channels: flagged(&anomalies.deviations),
            estimated_anomalies: flagged(&anomalies.estimated),
            excluded_channels: anomalies.excluded.clone(),
            hypotheses: diagnosis.hypotheses.clone(),
            gaps: gaps.iter().map(GapReport::from_estimate).collect(),
        }
    }

    pub fn top(&self) -> Option<&Hypothesis> {
        self.hypotheses.first()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
