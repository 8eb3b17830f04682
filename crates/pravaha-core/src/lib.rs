//! Pravaha core: causal root-cause diagnosis for spacecraft telemetry.
//!
//! The diagnosis pipeline:
//! - `telemetry`: timestamped samples, series and gap detection
//! - `anomaly`: smoothed fractional deviation against a nominal baseline
//! - `causal`: validated fault DAG, directed paths and d-separation
//! - `estimators`: physics EKF that predicts hidden power state through gaps
//! - `scoring` / `ranking`: per-root-cause scores, confidence and probabilities
//! - `engine`: streaming monitor tying the above together

// Lints allowed crate-wide:
// - too_many_arguments: scoring helpers thread graph, checker and evidence sets
// - needless_range_loop: matrix code indexes several arrays at once
// - manual_clamp: explicit min/max where NaN must fall through
// - new_without_default: new() takes configuration
#![allow(clippy::too_many_arguments)]
#![allow(clippy::needless_range_loop)]
#![allow(clippy::manual_clamp)]
#![allow(clippy::new_without_default)]

pub mod anomaly;
pub mod causal;
pub mod config;
pub mod engine; // Streaming front end
pub mod estimators; // EKF hidden-state estimation
pub mod ranking;
pub mod report;
pub mod scoring;
pub mod telemetry;

#[cfg(test)]
pub mod tests_config;
#[cfg(test)]
pub mod tests_determinism;
#[cfg(test)]
pub mod tests_proptest;

// ============================================================================
// CURATED PUBLIC API EXPORTS
// ============================================================================

// Causal graph
pub use causal::power::{power_thermal_channels, power_thermal_claims, power_thermal_graph};
pub use causal::{
    CausalGraph, CausalPath, GraphBuilder, GraphError, IndependenceChecker, IndependenceClaim,
    Node, NodeId, NodeKind, PathCombination, Polarity, Separation,
};

// Telemetry and detection
pub use anomaly::{AnomalyDetector, AnomalyReport, Deviation};
pub use telemetry::{Gap, TelemetryError, TelemetrySample, TelemetrySeries};

// Configuration
pub use config::{
    ConfigError, DetectorConfig, EstimatorConfig, PravahaConfig, RankingConfig, ScoringConfig,
    TelemetryConfig,
};

// Estimation
pub use estimators::{
    EstimatorError, EstimatorPhase, GapEstimate, HiddenStateEstimate, HiddenStateEstimator,
    StateBinding,
};

// Diagnosis
pub use engine::StreamMonitor;
pub use ranking::{ChannelMap, Diagnosis, DiagnosisError, Hypothesis, RootCauseRanker};
pub use report::{DiagnosisReport, GapReport};
pub use scoring::{HypothesisScorer, RootScore};
