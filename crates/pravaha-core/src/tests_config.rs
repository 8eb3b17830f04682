#[cfg(test)]
mod tests {
    use crate::causal::PathCombination;
    use crate::config::*;
    use std::env;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Tests that read or write PRAVAHA_* variables hold this lock.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config_valid() {
        let config = PravahaConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_detector() {
        let mut config = PravahaConfig::default();

        config.detector.deviation_threshold = 0.0;
        assert!(config.validate().is_err());

        config.detector.deviation_threshold = f64::NAN;
        assert!(config.validate().is_err());

        config.detector.deviation_threshold = 0.15;
        config.detector.smoothing_window = 0;
        assert!(config.validate().is_err());

        config.detector.smoothing_window = 5;
        config.detector.channel_weights.insert("bus_voltage".into(), -1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_ranking() {
        let mut config = PravahaConfig::default();

        config.ranking.confidence_threshold = 1.2;
        assert!(config.validate().is_err());

        config.ranking.confidence_threshold = 0.3;
        config.ranking.evidence_saturation = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_estimator() {
        let mut config = PravahaConfig::default();

        // voltage_full must be above voltage_empty
        config.estimator.voltage_full = 20.0;
        assert!(config.validate().is_err());

        config.estimator = EstimatorConfig::default();
        config.estimator.measurement_noise[2] = 0.0;
        assert!(config.validate().is_err());

        config.estimator = EstimatorConfig::default();
        config.estimator.lower_limits[0] = 100.0;
        assert!(config.validate().is_err());

        config.estimator = EstimatorConfig::default();
        config.estimator.clamp_confidence_penalty = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_window_covers_smoothing() {
        let mut config = PravahaConfig::default();
        config.telemetry.max_window_samples = 4;
        assert!(config.validate().is_err());
        config.telemetry.max_window_samples = 5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_to_toml_string() {
        let config = PravahaConfig::default();
        let toml_str = config.to_toml_string().unwrap();

        assert!(toml_str.contains("[detector]"));
        assert!(toml_str.contains("[estimator]"));
        assert!(toml_str.contains("deviation_threshold"));
        assert!(toml_str.contains("path_combination = \"maximum\""));
    }

    #[test]
    fn test_config_from_toml_string() {
        let toml_str = r#"
            [detector]
            deviation_threshold = 0.2
            smoothing_window = 3

            [detector.channel_weights]
            bus_voltage = 2.0

            [scoring]
            path_combination = "noisy_or"
            blocked_route_weight = 0.05

            [ranking]
            confidence_threshold = 0.4

            [estimator]
            dt_seconds = 5.0
            initial_state = [70.0, 27.0, 380.0, 0.88]
            seed = 42

            [telemetry]
            sample_interval_us = 5000000
        "#;

        let config: PravahaConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_ok());

        assert_eq!(config.detector.deviation_threshold, 0.2);
        assert_eq!(config.detector.channel_weights["bus_voltage"], 2.0);
        assert_eq!(config.scoring.path_combination, PathCombination::NoisyOr);
        assert_eq!(config.estimator.initial_state, [70.0, 27.0, 380.0, 0.88]);
        assert_eq!(config.estimator.seed, 42);
        // Untouched fields keep their defaults
        assert_eq!(config.ranking.evidence_saturation, 3);
        assert_eq!(config.estimator.battery_capacity_wh, 100.0);
    }

    #[test]
    fn test_config_save_and_load() {
        let mut config = PravahaConfig::default();
        config.scoring.path_combination = PathCombination::NoisyOr;

        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();
        config.save_to_file(path).unwrap();

        let loaded = PravahaConfig::from_file(path).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_config_env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        env::set_var("PRAVAHA_DETECTOR_DEVIATION_THRESHOLD", "0.25");
        env::set_var("PRAVAHA_SCORING_PATH_COMBINATION", "noisy-or");
        env::set_var("PRAVAHA_ESTIMATOR_SEED", "1234");

        let mut config = PravahaConfig::default();
        let result = config.apply_env_overrides();

        env::remove_var("PRAVAHA_DETECTOR_DEVIATION_THRESHOLD");
        env::remove_var("PRAVAHA_SCORING_PATH_COMBINATION");
        env::remove_var("PRAVAHA_ESTIMATOR_SEED");

        result.unwrap();
        assert_eq!(config.detector.deviation_threshold, 0.25);
        assert_eq!(config.scoring.path_combination, PathCombination::NoisyOr);
        assert_eq!(config.estimator.seed, 1234);
    }

    #[test]
    fn test_config_layered_loading() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let default_file = NamedTempFile::new().unwrap();
        let user_file = NamedTempFile::new().unwrap();

        let mut defaults = PravahaConfig::default();
        defaults.ranking.confidence_threshold = 0.4;
        defaults.estimator.battery_capacity_wh = 120.0;
        defaults.save_to_file(default_file.path()).unwrap();

        // The user file names only what it changes.
        fs::write(
            user_file.path(),
            "[estimator]\nbattery_capacity_wh = 80.0\n\n[detector]\nsmoothing_window = 7\n",
        )
        .unwrap();

        let loaded =
            PravahaConfig::load_layered(Some(default_file.path()), Some(user_file.path())).unwrap();

        assert_eq!(loaded.estimator.battery_capacity_wh, 80.0);
        assert_eq!(loaded.detector.smoothing_window, 7);
        assert_eq!(loaded.ranking.confidence_threshold, 0.4);
    }

    #[test]
    fn test_layered_loading_skips_missing_files() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let missing = std::path::Path::new("does-not-exist.toml");
        let loaded = PravahaConfig::load_layered(Some(missing), Some(missing)).unwrap();
        assert_eq!(loaded, PravahaConfig::default());
    }

    #[test]
    fn test_invalid_env_var_handling() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        env::set_var("PRAVAHA_ESTIMATOR_DT_SECONDS", "invalid");

        let mut config = PravahaConfig::default();
        let result = config.apply_env_overrides();

        env::remove_var("PRAVAHA_ESTIMATOR_DT_SECONDS");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_config_file_not_found() {
        let result = PravahaConfig::from_file("nonexistent.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_invalid_toml_syntax() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "invalid toml: syntax").unwrap();

        let result = PravahaConfig::from_file(temp_file.path());
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_file_values_are_validated() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "[ranking]\nconfidence_threshold = 3.0\n").unwrap();

        let result = PravahaConfig::from_file(temp_file.path());
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_config_roundtrip() {
        let original = PravahaConfig::default();
        let toml_str = original.to_toml_string().unwrap();
        let roundtrip: PravahaConfig = toml::from_str(&toml_str).unwrap();

        assert!(roundtrip.validate().is_ok());
        assert_eq!(original, roundtrip);
    }
}
