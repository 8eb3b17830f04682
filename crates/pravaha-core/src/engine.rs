use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::causal::power::{power_thermal_channels, power_thermal_graph};
use crate::causal::CausalGraph;
use crate::config::PravahaConfig;
use crate::estimators::{GapEstimate, HiddenStateEstimator};
use crate::ranking::{ChannelMap, Diagnosis, DiagnosisError, Hypothesis, RootCauseRanker};
use crate::report::DiagnosisReport;
use crate::telemetry::{Gap, TelemetryError, TelemetrySample, TelemetrySeries};

/// Streaming front end: keeps a bounded window of live telemetry, bridges
/// gaps with the hidden-state estimator and diagnoses on demand.
///
/// Every sample after the first is preceded by one filter prediction, so
/// the covariance keeps the process noise it accumulates between readings.
/// Each gap is predicted with its own RNG seeded from the configured seed
/// and the gap start, so replaying a stream reproduces every estimate.
pub struct StreamMonitor {
    ranker: RootCauseRanker,
    estimator: HiddenStateEstimator,
    /// Drives the per-sample predictions outside gaps.
    rng: StdRng,
    nominal: TelemetrySeries,
    window: TelemetrySeries,
    gaps: VecDeque<GapEstimate>,
    config: PravahaConfig,
    load_power_w: f64,
}

impl StreamMonitor {
    pub fn new(
        graph: Arc<CausalGraph>,
        nominal: TelemetrySeries,
        config: PravahaConfig,
    ) -> Result<Self, DiagnosisError> {
        config.validate()?;
        let estimator = HiddenStateEstimator::new(&config.estimator)
            .with_sample_interval(config.telemetry.sample_interval_us);
        log::info!(
            "Stream monitor ready: {} nodes, {} nominal samples, window {}",
            graph.len(),
            nominal.len(),
            config.telemetry.max_window_samples
        );
        Ok(Self {
            ranker: RootCauseRanker::new(graph, &config),
            estimator,
            rng: StdRng::seed_from_u64(config.estimator.seed),
            nominal,
            window: TelemetrySeries::new(),
            gaps: VecDeque::new(),
            load_power_w: config.estimator.default_load_power_w,
            config,
        })
    }

    /// Monitor over the built-in power and thermal fault model.
    pub fn power_thermal(
        nominal: TelemetrySeries,
        config: PravahaConfig,
    ) -> Result<Self, DiagnosisError> {
        let graph = Arc::new(power_thermal_graph()?);
        Ok(Self::new(graph, nominal, config)?.with_channels(power_thermal_channels()))
    }

    pub fn with_channels(mut self, channels: ChannelMap) -> Self {
        self.ranker = self.ranker.with_channels(channels);
        self
    }

    pub fn with_estimator(mut self, estimator: HiddenStateEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    /// Bus load assumed while predicting through the next gap.
    pub fn set_load_power(&mut self, watts: f64) {
        self.load_power_w = watts;
    }

    /// Ingests one sample. Returns the gap estimate when the sample ends a
    /// telemetry gap.
    pub fn push(&mut self, sample: TelemetrySample) -> Result<Option<GapEstimate>, DiagnosisError> {
        let previous = self.window.last().map(|s| s.timestamp_us);
        if let Some(prev) = previous {
            if sample.timestamp_us <= prev {
                return Err(TelemetryError::NonMonotonicTimestamp {
                    previous: prev,
                    got: sample.timestamp_us,
                }
                .into());
            }
        }
        self.window.push(sample.clone())?;

        let mut bridged = None;
        if let Some(start) = previous {
            let interval = self.config.telemetry.sample_interval_us;
            let gap = Gap::between(start, sample.timestamp_us, interval);
            if gap.missing > 0 {
                log::warn!(
                    "Telemetry gap {}..{}: {} samples missing",
                    start,
                    sample.timestamp_us,
                    gap.missing
                );
                let mut rng =
                    StdRng::seed_from_u64(self.config.estimator.seed.wrapping_add(start as u64));
                let estimate = self.estimator.estimate_during_gap(
                    start,
                    sample.timestamp_us,
                    self.load_power_w,
                    &mut rng,
                )?;
                self.window.fill_missing(estimate.filled_samples())?;
                self.gaps.push_back(estimate.clone());
                bridged = Some(estimate);
            }
        }

        if previous.is_some() {
            self.estimator.advance(self.load_power_w, &mut self.rng)?;
        }
        self.estimator.observe(&sample)?;
        self.window
            .retain_last(self.config.telemetry.max_window_samples);
        if let Some(oldest) = self.window.first().map(|s| s.timestamp_us) {
            while self.gaps.front().map_or(false, |g| g.end_us < oldest) {
                self.gaps.pop_front();
            }
        }
        Ok(bridged)
    }

    pub fn diagnosis(&self) -> Result<Diagnosis, DiagnosisError> {
        let gaps: Vec<GapEstimate> = self.gaps.iter().cloned().collect();
        self.ranker.diagnose(
            &self.nominal,
            &self.window,
            &gaps,
            self.config.detector.deviation_threshold,
            self.config.ranking.confidence_threshold,
        )
    }

    pub fn diagnose(&self) -> Result<Vec<Hypothesis>, DiagnosisError> {
        Ok(self.diagnosis()?.hypotheses)
    }

    pub fn report(&self) -> Result<DiagnosisReport, DiagnosisError> {
        let diagnosis = self.diagnosis()?;
        let gaps: Vec<GapEstimate> = self.gaps.iter().cloned().collect();
        Ok(DiagnosisReport::new(&diagnosis, &gaps))
    }

    pub fn window(&self) -> &TelemetrySeries {
        &self.window
    }

    pub fn nominal(&self) -> &TelemetrySeries {
        &self.nominal
    }

    pub fn estimator(&self) -> &HiddenStateEstimator {
        &self.estimator
    }

    pub fn ranker(&self) -> &RootCauseRanker {
        &self.ranker
    }

    pub fn config(&self) -> &PravahaConfig {
        &self.config
    }

    /// Gap estimates still overlapping the live window, oldest first.
    pub fn gap_estimates(&self) -> impl Iterator<Item = &GapEstimate> {
        self.gaps.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimators::{EstimatorPhase, StateComponent};

    const STEP: i64 = 10_000_000;

    fn sample(i: i64) -> TelemetrySample {
        TelemetrySample::new(i * STEP)
            .with("solar_input", 420.0)
            .with("battery_charge", 80.0)
            .with("battery_voltage", 28.0)
            .with("bus_voltage", 28.0)
    }

    fn nominal(n: i64) -> TelemetrySeries {
        TelemetrySeries::from_samples((0..n).map(sample).collect()).unwrap()
    }

    #[test]
    fn test_push_without_gap() {
        let mut monitor = StreamMonitor::power_thermal(nominal(30), PravahaConfig::default()).unwrap();
        for i in 0..10 {
            assert!(monitor.push(sample(i)).unwrap().is_none());
        }
        assert_eq!(monitor.window().len(), 10);
        assert_eq!(monitor.gap_estimates().count(), 0);
        assert!(monitor.diagnose().unwrap().is_empty());
    }

    #[test]
    fn test_gap_is_bridged_and_corrected() {
        let mut monitor = StreamMonitor::power_thermal(nominal(30), PravahaConfig::default()).unwrap();
        for i in 0..5 {
            monitor.push(sample(i)).unwrap();
        }
        let estimate = monitor.push(sample(10)).unwrap().unwrap();

        assert_eq!(estimate.len(), 5);
        assert_eq!(monitor.window().len(), 11);
        assert!(monitor.window().detect_gaps(STEP).unwrap().is_empty());
        assert_eq!(monitor.estimator().phase(), EstimatorPhase::Idle);
        assert!(monitor.estimator().confidence() > estimate.confidence_factor);
    }

    #[test]
    fn test_rejects_out_of_order_sample() {
        let mut monitor = StreamMonitor::power_thermal(nominal(30), PravahaConfig::default()).unwrap();
        monitor.push(sample(3)).unwrap();
        assert!(matches!(
            monitor.push(sample(3)),
            Err(DiagnosisError::Telemetry(TelemetryError::NonMonotonicTimestamp { .. }))
        ));
        assert_eq!(monitor.window().len(), 1);
    }

    #[test]
    fn test_window_and_gaps_are_bounded() {
        let mut config = PravahaConfig::default();
        config.telemetry.max_window_samples = 8;
        let mut monitor = StreamMonitor::power_thermal(nominal(30), config).unwrap();
        monitor.push(sample(0)).unwrap();
        monitor.push(sample(3)).unwrap();
        assert_eq!(monitor.gap_estimates().count(), 1);
        for i in 4..20 {
            monitor.push(sample(i)).unwrap();
        }
        assert_eq!(monitor.window().len(), 8);
        assert_eq!(monitor.gap_estimates().count(), 0);
    }

    #[test]
    fn test_filter_follows_step_change() {
        let mut monitor = StreamMonitor::power_thermal(nominal(30), PravahaConfig::default()).unwrap();
        monitor.set_load_power(420.0 * 0.9);
        for i in 0..400 {
            let charge = if i < 200 { 90.0 } else { 50.0 };
            monitor.push(sample(i).with("battery_charge", charge)).unwrap();
        }
        let state = monitor.estimator().state();
        assert!((state.value(StateComponent::Charge) - 50.0).abs() < 1.0);
        assert!(state.variance(StateComponent::Charge) > 0.01);

        let estimate = monitor
            .push(sample(410).with("battery_charge", 50.0))
            .unwrap()
            .unwrap();
        let first = estimate.estimates_for("battery_state").next().unwrap();
        assert!(
            (first.estimated_value - 50.0).abs() < 2.0,
            "gap started from {}",
            first.estimated_value
        );
    }

    #[test]
    fn test_window_beyond_baseline_is_still_compared() {
        let mut monitor = StreamMonitor::power_thermal(nominal(30), PravahaConfig::default()).unwrap();
        for i in 100..130 {
            monitor
                .push(sample(i).with("solar_input", 294.0).with("battery_charge", 56.0))
                .unwrap();
        }
        let diagnosis = monitor.diagnosis().unwrap();
        assert!(diagnosis.anomalies.excluded.is_empty());
        assert!(diagnosis.anomalies.is_anomalous("solar_input"));
        assert!(diagnosis.anomalies.is_anomalous("battery_charge"));
        assert!(!diagnosis.anomalies.is_anomalous("bus_voltage"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = PravahaConfig::default();
        config.detector.deviation_threshold = -1.0;
        assert!(matches!(
            StreamMonitor::power_thermal(nominal(5), config),
            Err(DiagnosisError::Config(_))
        ));
    }
}
