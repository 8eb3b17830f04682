//! Gap-bridging estimation of intermediate graph nodes.
//!
//! Lifecycle: `Idle -> Predicting -> Correcting -> Idle`.
//!
//! A gap of `n` expected samples opens `Predicting`. Each tick runs one
//! filter prediction and decays confidence as `c0 * exp(-lambda * k / n)`,
//! so confidence is strictly decreasing across the gap. After the last
//! tick the estimator waits in `Correcting` for resumed telemetry; the
//! update raises confidence by the relative variance reduction it achieved.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::kalman::{KalmanState, PowerKalmanFilter, StateMeasurement, StepOutcome};
use super::physics::{StateComponent, StateVector};
use super::EstimatorError;
use crate::anomaly::Deviation;
use crate::config::EstimatorConfig;
use crate::telemetry::{Gap, TelemetrySample, TelemetrySeries};

/// 95% two-sided normal quantile.
const BOUND_Z: f64 = 1.96;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EstimatorPhase {
    Idle,
    Predicting { tick: usize, total: usize },
    Correcting,
}

/// Ties a state component to the graph node it estimates and the telemetry
/// channel that measures it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateBinding {
    pub component: StateComponent,
    /// Intermediate node receiving hidden-state estimates.
    pub node: Option<String>,
    /// Telemetry channel carrying a direct measurement.
    pub channel: Option<String>,
    /// Reference value when no nominal channel exists.
    pub nominal: Option<f64>,
}

impl StateBinding {
    pub fn new(component: StateComponent) -> Self {
        Self {
            component,
            node: None,
            channel: None,
            nominal: None,
        }
    }

    pub fn node(mut self, node: &str) -> Self {
        self.node = Some(node.to_string());
        self
    }

    pub fn channel(mut self, channel: &str) -> Self {
        self.channel = Some(channel.to_string());
        self
    }

    pub fn nominal(mut self, value: f64) -> Self {
        self.nominal = Some(value);
        self
    }

    /// Bindings for the built-in power/thermal graph.
    pub fn power_defaults(nominal_efficiency: f64) -> Vec<StateBinding> {
        vec![
            StateBinding::new(StateComponent::Charge)
                .node("battery_state")
                .channel("battery_charge"),
            StateBinding::new(StateComponent::Voltage).channel("battery_voltage"),
            StateBinding::new(StateComponent::Solar)
                .node("solar_input")
                .channel("solar_input"),
            StateBinding::new(StateComponent::Efficiency)
                .node("battery_efficiency")
                .nominal(nominal_efficiency),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HiddenStateEstimate {
    pub node: String,
    pub timestamp_us: i64,
    /// 1-based tick inside the gap.
    pub tick: usize,
    pub estimated_value: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub confidence: f64,
}

impl HiddenStateEstimate {
    pub fn width(&self) -> f64 {
        self.upper_bound - self.lower_bound
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapTick {
    pub tick: usize,
    pub timestamp_us: i64,
    pub confidence: f64,
    pub estimates: Vec<HiddenStateEstimate>,
    /// Filled telemetry sample; quality equals the tick confidence.
    pub sample: TelemetrySample,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapEstimate {
    pub start_us: i64,
    pub end_us: i64,
    pub ticks: Vec<GapTick>,
    /// Filter state after the last prediction.
    pub final_state: KalmanState,
    /// Confidence at the last tick.
    pub confidence_factor: f64,
    pub bindings: Vec<StateBinding>,
}

impl GapEstimate {
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn estimates(&self) -> impl Iterator<Item = &HiddenStateEstimate> {
        self.ticks.iter().flat_map(|t| t.estimates.iter())
    }

    pub fn estimates_for<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a HiddenStateEstimate> {
        self.estimates().filter(move |e| e.node == node)
    }

    pub fn filled_samples(&self) -> impl Iterator<Item = &TelemetrySample> {
        self.ticks.iter().map(|t| &t.sample)
    }

    /// Deviations of the estimated intermediate nodes from their nominal
    /// reference, averaged over the gap and weighted by tick confidence.
    pub fn synthetic_deviations(&self, nominal: &TelemetrySeries, threshold: f64) -> Vec<Deviation> {
        let mut out = Vec::new();
        for binding in &self.bindings {
            let Some(node) = &binding.node else { continue };
            let reference = binding
                .channel
                .as_deref()
                .and_then(|c| nominal.mean(c))
                .or(binding.nominal);
            let Some(reference) = reference.filter(|r| r.abs() > f64::EPSILON) else {
                continue;
            };

            let estimates: Vec<&HiddenStateEstimate> = self.estimates_for(node).collect();
            if estimates.is_empty() {
                continue;
            }
            let n = estimates.len() as f64;
            let mut onset_us = None;
            let mut max_frac: f64 = 0.0;
            let (mut sum_abs, mut sum_frac, mut sum_signed, mut sum_conf) = (0.0, 0.0, 0.0, 0.0);
            for e in &estimates {
                let delta = e.estimated_value - reference;
                let frac = delta.abs() / reference.abs();
                if onset_us.is_none() && frac > threshold {
                    onset_us = Some(e.timestamp_us);
                }
                sum_abs += delta.abs();
                sum_frac += frac;
                sum_signed += delta / reference.abs();
                sum_conf += e.confidence;
                max_frac = max_frac.max(frac);
            }
            out.push(Deviation {
                observable: node.clone(),
                absolute_delta: sum_abs / n,
                fractional_delta: sum_frac / n,
                signed_fractional: sum_signed / n,
                max_fractional: max_frac,
                onset_us,
                anomalous: sum_frac / n > threshold,
                confidence: sum_conf / n,
                synthetic: true,
            });
        }
        out
    }
}

/// Owns one filter; one instance per telemetry stream.
#[derive(Debug, Clone)]
pub struct HiddenStateEstimator {
    filter: PowerKalmanFilter,
    bindings: Vec<StateBinding>,
    phase: EstimatorPhase,
    confidence: f64,
    /// Confidence when the current gap opened.
    gap_confidence: f64,
    /// Product of clamp penalties during the current gap.
    penalty: f64,
    decay_lambda: f64,
    clamp_penalty: f64,
    sample_interval_us: i64,
}

impl HiddenStateEstimator {
    pub fn new(config: &EstimatorConfig) -> Self {
        Self {
            filter: PowerKalmanFilter::new(config),
            bindings: StateBinding::power_defaults(config.initial_state[3]),
            phase: EstimatorPhase::Idle,
            confidence: 1.0,
            gap_confidence: 1.0,
            penalty: 1.0,
            decay_lambda: config.decay_lambda,
            clamp_penalty: config.clamp_confidence_penalty,
            sample_interval_us: (config.dt_seconds * 1e6).round() as i64,
        }
    }

    pub fn with_bindings(mut self, bindings: Vec<StateBinding>) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn with_sample_interval(mut self, interval_us: i64) -> Self {
        self.sample_interval_us = interval_us.max(1);
        self
    }

    /// Resets the mean to a known operating point.
    pub fn initialize(&mut self, mean: [f64; 4]) {
        self.filter.set_mean(StateVector::from(mean));
        self.phase = EstimatorPhase::Idle;
        self.confidence = 1.0;
    }

    pub fn phase(&self) -> EstimatorPhase {
        self.phase
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn state(&self) -> &KalmanState {
        self.filter.state()
    }

    pub fn bindings(&self) -> &[StateBinding] {
        &self.bindings
    }

    pub fn sample_interval_us(&self) -> i64 {
        self.sample_interval_us
    }

    /// Starts predicting through `ticks` missing samples. Zero is a no-op.
    pub fn open_gap(&mut self, ticks: usize) -> Result<(), EstimatorError> {
        if let EstimatorPhase::Predicting { tick, total } = self.phase {
            return Err(EstimatorError::GapInProgress {
                remaining: total - tick,
            });
        }
        if ticks == 0 {
            return Ok(());
        }
        self.gap_confidence = self.confidence;
        self.penalty = 1.0;
        self.phase = EstimatorPhase::Predicting {
            tick: 0,
            total: ticks,
        };
        log::info!(
            "Gap opened: {} ticks from confidence {:.3}",
            ticks,
            self.gap_confidence
        );
        Ok(())
    }

    /// Predicts the next missing instant.
    pub fn tick<R: Rng + ?Sized>(
        &mut self,
        timestamp_us: i64,
        load_power: f64,
        rng: &mut R,
    ) -> Result<GapTick, EstimatorError> {
        let EstimatorPhase::Predicting { tick, total } = self.phase else {
            return Err(EstimatorError::NotPredicting);
        };

        let outcome = self.filter.predict(load_power, rng);
        if !outcome.clamped.is_empty() {
            self.penalty *= self.clamp_penalty;
        }

        let k = tick + 1;
        let decay = (-self.decay_lambda * k as f64 / total as f64).exp();
        self.confidence = (self.gap_confidence * self.penalty * decay).clamp(0.0, 1.0);
        self.phase = if k == total {
            log::debug!("Gap prediction finished; awaiting correction");
            EstimatorPhase::Correcting
        } else {
            EstimatorPhase::Predicting { tick: k, total }
        };

        Ok(self.snapshot(k, timestamp_us))
    }

    /// Predicts one interval ahead of live telemetry, ahead of the next
    /// [`observe`](Self::observe). Confidence is left to the update.
    pub fn advance<R: Rng + ?Sized>(
        &mut self,
        load_power: f64,
        rng: &mut R,
    ) -> Result<StepOutcome, EstimatorError> {
        if let EstimatorPhase::Predicting { tick, total } = self.phase {
            return Err(EstimatorError::GapInProgress {
                remaining: total - tick,
            });
        }
        Ok(self.filter.predict(load_power, rng))
    }

    /// Measurement update from resumed telemetry. Returns the new confidence.
    pub fn update(&mut self, z: &StateMeasurement) -> Result<f64, EstimatorError> {
        if let EstimatorPhase::Predicting { tick, total } = self.phase {
            log::debug!("Telemetry resumed after {tick} of {total} predicted ticks");
        }
        let outcome = self.filter.update(z)?;
        let mut gain = outcome.variance_reduction;
        if !outcome.clamped.is_empty() {
            gain *= self.clamp_penalty;
        }
        if self.phase != EstimatorPhase::Idle {
            log::debug!(
                "Correction: confidence {:.3} -> {:.3}",
                self.confidence,
                self.confidence + (1.0 - self.confidence) * gain
            );
        }
        self.confidence = (self.confidence + (1.0 - self.confidence) * gain).clamp(0.0, 1.0);
        self.phase = EstimatorPhase::Idle;
        Ok(self.confidence)
    }

    /// Extracts bound channels from a sample and applies them as a measurement.
    pub fn observe(&mut self, sample: &TelemetrySample) -> Result<f64, EstimatorError> {
        let z = self.measurement_from(sample);
        self.update(&z)
    }

    pub fn measurement_from(&self, sample: &TelemetrySample) -> StateMeasurement {
        let mut z = StateMeasurement::default();
        for binding in &self.bindings {
            if let Some(value) = binding.channel.as_deref().and_then(|c| sample.get(c)) {
                z.set(binding.component, value);
            }
        }
        z
    }

    /// Predicts across every expected instant strictly between the two
    /// timestamps. Leaves the estimator in `Correcting` unless the gap is empty.
    pub fn estimate_during_gap<R: Rng + ?Sized>(
        &mut self,
        gap_start_us: i64,
        gap_end_us: i64,
        load_power: f64,
        rng: &mut R,
    ) -> Result<GapEstimate, EstimatorError> {
        let gap = Gap::between(gap_start_us, gap_end_us, self.sample_interval_us);
        self.open_gap(gap.missing)?;

        let mut ticks = Vec::with_capacity(gap.missing);
        for timestamp_us in gap.expected_timestamps(self.sample_interval_us) {
            ticks.push(self.tick(timestamp_us, load_power, rng)?);
        }
        if !ticks.is_empty() {
            log::info!(
                "Gap {}..{} bridged with {} ticks, confidence {:.3}",
                gap_start_us,
                gap_end_us,
                ticks.len(),
                self.confidence
            );
        }

        Ok(GapEstimate {
            start_us: gap_start_us,
            end_us: gap_end_us,
            ticks,
            final_state: self.filter.state().clone(),
            confidence_factor: self.confidence,
            bindings: self.bindings.clone(),
        })
    }

    fn snapshot(&self, tick: usize, timestamp_us: i64) -> GapTick {
        let state = self.filter.state();
        let mut estimates = Vec::new();
        let mut sample = TelemetrySample::new(timestamp_us).with_quality(self.confidence);

        for binding in &self.bindings {
            let value = state.value(binding.component);
            let half_width = BOUND_Z * state.std_dev(binding.component);
            if let Some(node) = &binding.node {
                estimates.push(HiddenStateEstimate {
                    node: node.clone(),
                    timestamp_us,
                    tick,
                    estimated_value: value,
                    lower_bound: value - half_width,
                    upper_bound: value + half_width,
                    confidence: self.confidence,
                });
            }
            if let Some(channel) = &binding.channel {
                sample.values.insert(channel.clone(), value);
            }
        }

        GapTick {
            tick,
            timestamp_us,
            confidence: self.confidence,
            estimates,
            sample,
        }
    }
}
