use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pravaha_core::causal::power::{power_thermal_channels, power_thermal_graph};
use pravaha_core::causal::IndependenceChecker;
use pravaha_core::config::{EstimatorConfig, PravahaConfig};
use pravaha_core::estimators::HiddenStateEstimator;
use pravaha_core::ranking::RootCauseRanker;
use pravaha_core::telemetry::{TelemetrySample, TelemetrySeries};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

const STEP: i64 = 10_000_000;

fn series(n: i64, solar: f64, charge: f64) -> TelemetrySeries {
    let samples = (0..n)
        .map(|i| {
            TelemetrySample::new(i * STEP)
                .with("solar_input", solar)
                .with("battery_charge", charge)
                .with("battery_voltage", 28.4)
                .with("bus_voltage", 28.0)
                .with("battery_temp", 15.0)
                .with("payload_temp", 25.0)
        })
        .collect();
    TelemetrySeries::from_samples(samples).unwrap()
}

fn benchmark_analyze(c: &mut Criterion) {
    let ranker = RootCauseRanker::new(
        Arc::new(power_thermal_graph().unwrap()),
        &PravahaConfig::default(),
    )
    .with_channels(power_thermal_channels());

    let mut group = c.benchmark_group("analyze");
    // One hour, six hours and a full day at 10 s cadence
    for n in [360i64, 2160, 8640] {
        let nominal = series(n, 420.0, 90.0);
        let current = series(n, 294.0, 72.0);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                ranker
                    .analyze(black_box(&nominal), black_box(&current), 0.15, 0.3)
                    .unwrap()
            })
        });
    }
    group.finish();
}

fn benchmark_d_separation(c: &mut Criterion) {
    let graph = power_thermal_graph().unwrap();
    let checker = IndependenceChecker::new(&graph);

    c.bench_function("d_separation_power_graph", |b| {
        b.iter(|| {
            checker
                .d_separated(
                    black_box("solar_degradation"),
                    black_box("bus_voltage_measured"),
                    &["battery_state"],
                )
                .unwrap()
        })
    });
}

fn benchmark_gap_estimation(c: &mut Criterion) {
    let config = EstimatorConfig {
        inject_process_noise: true,
        ..Default::default()
    };

    c.bench_function("estimate_60_tick_gap", |b| {
        b.iter(|| {
            let mut estimator = HiddenStateEstimator::new(&config);
            let mut rng = StdRng::seed_from_u64(42);
            estimator
                .estimate_during_gap(0, black_box(61 * STEP), 300.0, &mut rng)
                .unwrap()
        })
    });
}

criterion_group!(
    benches,
    benchmark_analyze,
    benchmark_d_separation,
    benchmark_gap_estimation
);
criterion_main!(benches);
