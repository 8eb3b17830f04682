use proptest::prelude::*;

/// Property-based tests for the structural and numerical invariants of the
/// diagnosis pipeline.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::causal::power::{power_thermal_channels, power_thermal_graph};
    use crate::causal::{
        CausalGraph, GraphBuilder, GraphError, IndependenceChecker, Node, NodeKind,
    };
    use crate::config::{EstimatorConfig, PravahaConfig};
    use crate::estimators::{HiddenStateEstimator, PowerKalmanFilter, StateMeasurement};
    use crate::ranking::RootCauseRanker;
    use crate::telemetry::{TelemetrySample, TelemetrySeries};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    /// Forward edges `(i, j)` with `i < j` over `n` nodes.
    fn dag_strategy() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
        (3usize..9).prop_flat_map(|n| {
            let pairs: Vec<(usize, usize)> = (0..n)
                .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
                .collect();
            let len = pairs.len();
            (
                Just(n),
                proptest::sample::subsequence(pairs, 0..=len.min(12)),
            )
        })
    }

    fn build(n: usize, edges: &[(usize, usize)]) -> Result<CausalGraph, GraphError> {
        let names: Vec<String> = (0..n).map(|i| format!("v{i}")).collect();
        let mut builder = GraphBuilder::new();
        for name in &names {
            builder = builder.node(Node::new(name.as_str(), NodeKind::Intermediate));
        }
        for &(i, j) in edges {
            builder = builder.edge(&names[i], &names[j], 0.5, "");
        }
        builder.build()
    }

    // =========================================================================
    // Graph construction
    // =========================================================================
    proptest! {
        #[test]
        fn test_forward_edges_always_build((n, edges) in dag_strategy()) {
            let g = build(n, &edges).unwrap();
            prop_assert_eq!(g.len(), n);
            prop_assert_eq!(g.edge_count(), edges.len());
            for &(i, j) in &edges {
                prop_assert!(g.descendants(i).contains(&j));
                prop_assert!(!g.descendants(j).contains(&i));
            }
        }

        #[test]
        fn test_back_edge_is_rejected((n, edges) in dag_strategy(), pick in any::<prop::sample::Index>()) {
            prop_assume!(!edges.is_empty());
            let &(i, j) = pick.get(&edges);
            let mut with_back = edges.clone();
            with_back.push((j, i));
            let is_cycle = matches!(build(n, &with_back), Err(GraphError::CycleDetected { .. }));
            prop_assert!(is_cycle);
        }
    }

    // =========================================================================
    // d-separation agrees with the moralised ancestral graph criterion
    // =========================================================================
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn test_d_separation_matches_moral_criterion(
            (n, edges) in dag_strategy(),
            x in 0usize..9,
            z in 0usize..9,
            mask in any::<u16>(),
        ) {
            let g = build(n, &edges).unwrap();
            let (x, z) = (x % n, z % n);
            prop_assume!(x != z);
            let given: BTreeSet<usize> = (0..n)
                .filter(|&v| v != x && v != z && mask & (1 << v) != 0)
                .collect();

            let checker = IndependenceChecker::new(&g);
            let separation = checker.d_separated_ids(x, z, &given);
            prop_assert_eq!(separation.separated, checker.moral_separated(x, z, &given));
            prop_assert_eq!(separation.separated, separation.open_path.is_none());
            // Symmetric in its endpoints
            prop_assert_eq!(separation.separated, checker.d_separated_ids(z, x, &given).separated);
        }
    }

    // =========================================================================
    // EKF covariance stays symmetric positive semi-definite
    // =========================================================================
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_covariance_stays_psd(
            steps in prop::collection::vec(
                (0.0f64..900.0, prop::option::of(0.0f64..100.0), prop::option::of(20.0f64..32.0), any::<bool>()),
                1..40,
            ),
            seed in any::<u64>(),
        ) {
            let config = EstimatorConfig { inject_process_noise: true, ..Default::default() };
            let mut filter = PowerKalmanFilter::new(&config);
            let mut rng = StdRng::seed_from_u64(seed);
            for (load, charge, voltage, correct) in steps {
                filter.predict(load, &mut rng);
                if correct {
                    let z = StateMeasurement { charge, voltage, ..Default::default() };
                    filter.update(&z).unwrap();
                }
                let state = filter.state();
                prop_assert!(state.is_finite());
                prop_assert!(state.min_eigenvalue() >= -1e-9);
                let asym = (state.covariance - state.covariance.transpose()).abs().max();
                prop_assert!(asym < 1e-9);
                for (i, (lo, hi)) in config.lower_limits.iter().zip(config.upper_limits.iter()).enumerate() {
                    prop_assert!(state.mean[i] >= *lo && state.mean[i] <= *hi);
                }
            }
        }

        #[test]
        fn test_gap_confidence_never_rises(ticks in 1i64..30, load in 0.0f64..900.0) {
            let mut estimator = HiddenStateEstimator::new(&EstimatorConfig::default());
            let mut rng = StdRng::seed_from_u64(0);
            let estimate = estimator
                .estimate_during_gap(0, (ticks + 1) * 10_000_000, load, &mut rng)
                .unwrap();
            prop_assert_eq!(estimate.len() as i64, ticks);
            let mut previous = 1.0;
            for tick in &estimate.ticks {
                prop_assert!(tick.confidence < previous);
                prop_assert!(tick.confidence > 0.0);
                previous = tick.confidence;
            }
        }
    }

    // =========================================================================
    // Ranking probabilities form a distribution
    // =========================================================================
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_probabilities_sum_to_one(
            factors in prop::collection::vec(0.3f64..1.7, 8),
            threshold in 0.0f64..0.9,
        ) {
            let channels = [
                ("solar_input", 420.0),
                ("battery_voltage", 28.0),
                ("battery_charge", 90.0),
                ("bus_voltage", 28.0),
                ("solar_panel_temp", 40.0),
                ("battery_temp", 15.0),
                ("payload_temp", 25.0),
                ("bus_current", 10.0),
            ];
            let make = |scale: &dyn Fn(usize) -> f64| {
                let samples = (0..12)
                    .map(|t| {
                        channels.iter().enumerate().fold(
                            TelemetrySample::new(t * 10_000_000),
                            |s, (i, (c, v))| s.with(c, v * scale(i)),
                        )
                    })
                    .collect();
                TelemetrySeries::from_samples(samples).unwrap()
            };
            let nominal = make(&|_| 1.0);
            let current = make(&|i| factors[i]);

            let ranker = RootCauseRanker::new(
                Arc::new(power_thermal_graph().unwrap()),
                &PravahaConfig::default(),
            )
            .with_channels(power_thermal_channels());
            let hypotheses = ranker.analyze(&nominal, &current, 0.15, threshold).unwrap();

            if !hypotheses.is_empty() {
                let total: f64 = hypotheses.iter().map(|h| h.probability).sum();
                prop_assert!((total - 1.0).abs() < 1e-9);
            }
            for h in &hypotheses {
                prop_assert!(h.raw_score > 0.0);
                prop_assert!(h.confidence >= threshold && h.confidence <= 1.0);
                prop_assert!((0.0..=1.0).contains(&h.probability));
            }
            for pair in hypotheses.windows(2) {
                prop_assert!(pair[0].probability >= pair[1].probability);
            }
        }
    }
}
