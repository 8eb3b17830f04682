use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::causal::PathCombination;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PravahaConfig {
    pub detector: DetectorConfig,
    pub scoring: ScoringConfig,
    pub ranking: RankingConfig,
    pub estimator: EstimatorConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Mean fractional deviation above which a channel is anomalous
    pub deviation_threshold: f64,
    /// Trailing moving-average window, in samples
    pub smoothing_window: usize,
    /// Nominal values smaller than this are not used as a denominator
    pub min_nominal_magnitude: f64,
    /// Per-channel weight in the overall severity; missing channels weigh 1.0
    pub channel_weights: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub path_combination: PathCombination,
    /// Strength multiplier for routes that only pass through stable intermediates
    pub blocked_route_weight: f64,
    /// Consistency penalty per unit fraction of anomalies the root cannot reach
    pub unreachable_penalty: f64,
    /// rawScore uses (floor + (1 - floor) * consistency)
    pub consistency_floor: f64,
    /// Discard evidence that deviates against the path polarity
    pub check_direction: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub confidence_threshold: f64,
    pub base_confidence: f64,
    pub consistency_weight: f64,
    pub evidence_weight: f64,
    pub path_strength_weight: f64,
    /// Evidence count at which the evidence term saturates
    pub evidence_saturation: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Seconds per predict step
    pub dt_seconds: f64,
    pub battery_capacity_wh: f64,
    /// Open-circuit voltage at 0% and 100% charge
    pub voltage_empty: f64,
    pub voltage_full: f64,
    /// Knee of the open-circuit voltage curve, as a charge fraction
    pub ocv_curvature: f64,
    /// Load drawn during gaps when the caller does not supply one
    pub default_load_power_w: f64,
    /// [charge %, voltage V, solar W, efficiency]
    pub initial_state: [f64; 4],
    pub initial_covariance: [f64; 4],
    pub process_noise: [f64; 4],
    pub measurement_noise: [f64; 4],
    pub lower_limits: [f64; 4],
    pub upper_limits: [f64; 4],
    /// Confidence decay rate across a gap
    pub decay_lambda: f64,
    pub eigen_floor: f64,
    /// Confidence multiplier applied when a state component hits a physical limit
    pub clamp_confidence_penalty: f64,
    /// Sample the solar/efficiency random walk instead of propagating the mean
    pub inject_process_noise: bool,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub sample_interval_us: i64,
    /// Samples kept per stream for diagnosis
    pub max_window_samples: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            deviation_threshold: 0.15,
            smoothing_window: 5,
            min_nominal_magnitude: 1e-9,
            channel_weights: BTreeMap::new(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            path_combination: PathCombination::Maximum,
            blocked_route_weight: 0.1,
            unreachable_penalty: 0.5,
            consistency_floor: 0.5,
            check_direction: true,
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.3,
            base_confidence: 0.2,
            consistency_weight: 0.35,
            evidence_weight: 0.2,
            path_strength_weight: 0.25,
            evidence_saturation: 3,
        }
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            dt_seconds: 10.0,
            battery_capacity_wh: 100.0,
            voltage_empty: 22.4,
            voltage_full: 28.5,
            ocv_curvature: 0.35,
            default_load_power_w: 300.0,
            initial_state: [80.0, 28.0, 400.0, 0.9],
            initial_covariance: [10.0, 2.0, 50.0, 0.1],
            process_noise: [0.5, 0.3, 20.0, 0.02],
            measurement_noise: [0.1, 0.2, 15.0, 0.01],
            lower_limits: [0.0, 20.0, 0.0, 0.5],
            upper_limits: [100.0, 32.0, 600.0, 1.0],
            decay_lambda: 1.0,
            eigen_floor: 1e-9,
            clamp_confidence_penalty: 0.8,
            inject_process_noise: false,
            seed: 0,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            sample_interval_us: 10_000_000,
            max_window_samples: 8640,
        }
    }
}

impl PravahaConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: PravahaConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    /// Variables are prefixed with PRAVAHA_, e.g. PRAVAHA_DETECTOR_DEVIATION_THRESHOLD=0.2
    pub fn from_file_with_env<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. User config file (if exists)
    /// 3. Default config file
    /// 4. Built-in defaults (lowest priority)
    pub fn load_layered(
        default_path: Option<&Path>,
        user_path: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let mut config = PravahaConfig::default();

        if let Some(path) = default_path {
            if path.exists() {
                config = Self::from_file(path)?;
            }
        }

        if let Some(path) = user_path {
            if path.exists() {
                let content = fs::read_to_string(path)?;
                let overlay: toml::Value = toml::from_str(&content)?;
                config = config.merge(overlay)?;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Overlay the keys present in `overlay` onto this config.
    fn merge(self, overlay: toml::Value) -> Result<Self, ConfigError> {
        let base = toml::Value::try_from(&self)
            .map_err(|e| ConfigError::Validation(format!("TOML serialization error: {}", e)))?;
        let merged = merge_values(base, overlay);
        merged.try_into().map_err(ConfigError::TomlParse)
    }

    pub(crate) fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        use std::env;

        fn parse<T: std::str::FromStr>(key: &str, val: &str) -> Result<T, ConfigError> {
            val.trim()
                .parse()
                .map_err(|_| ConfigError::Validation(format!("Invalid {}", key)))
        }

        if let Ok(val) = env::var("PRAVAHA_DETECTOR_DEVIATION_THRESHOLD") {
            self.detector.deviation_threshold =
                parse("PRAVAHA_DETECTOR_DEVIATION_THRESHOLD", &val)?;
        }
        if let Ok(val) = env::var("PRAVAHA_DETECTOR_SMOOTHING_WINDOW") {
            self.detector.smoothing_window = parse("PRAVAHA_DETECTOR_SMOOTHING_WINDOW", &val)?;
        }
        if let Ok(val) = env::var("PRAVAHA_SCORING_PATH_COMBINATION") {
            self.scoring.path_combination = parse("PRAVAHA_SCORING_PATH_COMBINATION", &val)?;
        }
        if let Ok(val) = env::var("PRAVAHA_RANKING_CONFIDENCE_THRESHOLD") {
            self.ranking.confidence_threshold =
                parse("PRAVAHA_RANKING_CONFIDENCE_THRESHOLD", &val)?;
        }
        if let Ok(val) = env::var("PRAVAHA_ESTIMATOR_DT_SECONDS") {
            self.estimator.dt_seconds = parse("PRAVAHA_ESTIMATOR_DT_SECONDS", &val)?;
        }
        if let Ok(val) = env::var("PRAVAHA_ESTIMATOR_SEED") {
            self.estimator.seed = parse("PRAVAHA_ESTIMATOR_SEED", &val)?;
        }
        if let Ok(val) = env::var("PRAVAHA_TELEMETRY_SAMPLE_INTERVAL_US") {
            self.telemetry.sample_interval_us =
                parse("PRAVAHA_TELEMETRY_SAMPLE_INTERVAL_US", &val)?;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::Validation(msg.to_string()));

        let d = &self.detector;
        if !(d.deviation_threshold > 0.0 && d.deviation_threshold.is_finite()) {
            return fail("detector.deviation_threshold must be positive");
        }
        if d.smoothing_window == 0 {
            return fail("detector.smoothing_window must be > 0");
        }
        if d.min_nominal_magnitude < 0.0 {
            return fail("detector.min_nominal_magnitude must be non-negative");
        }
        if d.channel_weights.values().any(|&w| !(w >= 0.0) || !w.is_finite()) {
            return fail("detector.channel_weights must be non-negative");
        }

        let s = &self.scoring;
        if !(0.0..=1.0).contains(&s.blocked_route_weight) {
            return fail("scoring.blocked_route_weight must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&s.unreachable_penalty) {
            return fail("scoring.unreachable_penalty must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&s.consistency_floor) {
            return fail("scoring.consistency_floor must be in [0, 1]");
        }

        let r = &self.ranking;
        if !(0.0..=1.0).contains(&r.confidence_threshold) {
            return fail("ranking.confidence_threshold must be in [0, 1]");
        }
        let weights = [
            r.base_confidence,
            r.consistency_weight,
            r.evidence_weight,
            r.path_strength_weight,
        ];
        if weights.iter().any(|&w| !(w >= 0.0)) {
            return fail("ranking confidence weights must be non-negative");
        }
        if r.evidence_saturation == 0 {
            return fail("ranking.evidence_saturation must be > 0");
        }

        let e = &self.estimator;
        if !(e.dt_seconds > 0.0) {
            return fail("estimator.dt_seconds must be positive");
        }
        if !(e.battery_capacity_wh > 0.0) {
            return fail("estimator.battery_capacity_wh must be positive");
        }
        if !(e.voltage_full > e.voltage_empty) {
            return fail("estimator.voltage_full must be > voltage_empty");
        }
        if !(e.ocv_curvature > 0.0) {
            return fail("estimator.ocv_curvature must be positive");
        }
        if e.initial_covariance.iter().any(|&v| !(v > 0.0)) {
            return fail("estimator.initial_covariance must be positive");
        }
        if e.process_noise.iter().any(|&v| !(v >= 0.0)) {
            return fail("estimator.process_noise must be non-negative");
        }
        if e.measurement_noise.iter().any(|&v| !(v > 0.0)) {
            return fail("estimator.measurement_noise must be positive");
        }
        if e
            .lower_limits
            .iter()
            .zip(e.upper_limits.iter())
            .any(|(lo, hi)| !(lo < hi))
        {
            return fail("estimator.lower_limits must be below upper_limits");
        }
        if !(e.decay_lambda >= 0.0) {
            return fail("estimator.decay_lambda must be non-negative");
        }
        if !(e.eigen_floor > 0.0) {
            return fail("estimator.eigen_floor must be positive");
        }
        if !(e.clamp_confidence_penalty > 0.0 && e.clamp_confidence_penalty <= 1.0) {
            return fail("estimator.clamp_confidence_penalty must be in (0, 1]");
        }

        let t = &self.telemetry;
        if t.sample_interval_us <= 0 {
            return fail("telemetry.sample_interval_us must be positive");
        }
        if t.max_window_samples < d.smoothing_window {
            return fail("telemetry.max_window_samples must be >= detector.smoothing_window");
        }

        Ok(())
    }

    /// Export configuration to TOML string
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = self
            .to_toml_string()
            .map_err(|e| ConfigError::Validation(format!("TOML serialization error: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }
}

fn merge_values(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            toml::Value::Table(base)
        }
        (_, overlay) => overlay,
    }
}
