//! Deviation-based anomaly detection against a nominal baseline.
//!
//! For every channel present in both series:
//! 1. pair nominal and current samples: on equal timestamps when the
//!    nominal run covers every current sample, otherwise by position
//!    counted back from the newest sample of each series,
//! 2. smooth both with a trailing moving average of `w` samples,
//! 3. compute the pointwise fractional deviation `|cur - nom| / |nom|`,
//! 4. flag the channel when the mean deviation exceeds the threshold.
//!
//! Channels with fewer than `w` joined samples are excluded rather than
//! reported as a zero deviation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::DetectorConfig;
use crate::telemetry::TelemetrySeries;

/// How one channel differs from its baseline over the analysis window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deviation {
    pub observable: String,
    /// Mean `|cur - nom|` in channel units.
    pub absolute_delta: f64,
    /// Mean `|cur - nom| / |nom|`.
    pub fractional_delta: f64,
    /// Mean `(cur - nom) / |nom|`; the sign gives the direction.
    pub signed_fractional: f64,
    pub max_fractional: f64,
    /// First smoothed instant whose deviation exceeds the threshold.
    pub onset_us: Option<i64>,
    pub anomalous: bool,
    /// Mean sample quality over the window; below 1.0 for estimated data.
    pub confidence: f64,
    /// Produced by the state estimator rather than measured.
    #[serde(default)]
    pub synthetic: bool,
}

impl Deviation {
    /// +1.0 above baseline, -1.0 below, 0.0 when flat.
    pub fn direction(&self) -> f64 {
        if self.signed_fractional > 0.0 {
            1.0
        } else if self.signed_fractional < 0.0 {
            -1.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub deviations: BTreeMap<String, Deviation>,
    /// Channels without enough paired samples.
    pub excluded: Vec<String>,
    /// Weighted mean fractional deviation over analysed channels.
    pub severity: f64,
    pub threshold: f64,
    /// Estimator-derived deviations, keyed by graph node rather than channel.
    #[serde(default)]
    pub estimated: BTreeMap<String, Deviation>,
}

impl AnomalyReport {
    pub fn get(&self, channel: &str) -> Option<&Deviation> {
        self.deviations.get(channel)
    }

    pub fn is_anomalous(&self, channel: &str) -> bool {
        self.get(channel).map_or(false, |d| d.anomalous)
    }

    pub fn estimated(&self, node: &str) -> Option<&Deviation> {
        self.estimated.get(node)
    }

    /// Measured and estimated deviations above the threshold.
    pub fn anomalous(&self) -> impl Iterator<Item = &Deviation> {
        self.deviations
            .values()
            .chain(self.estimated.values())
            .filter(|d| d.anomalous)
    }

    pub fn anomaly_count(&self) -> usize {
        self.anomalous().count()
    }

    /// Records an estimator-derived deviation. The first one merged for a
    /// node wins; returns false when the node already had one.
    pub fn merge_synthetic(&mut self, deviation: Deviation) -> bool {
        if self.estimated.contains_key(&deviation.observable) {
            return false;
        }
        self.estimated.insert(deviation.observable.clone(), deviation);
        true
    }
}

#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    config: DetectorConfig,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

struct AlignedPoint {
    timestamp_us: i64,
    nominal: f64,
    current: f64,
    quality: f64,
}

impl AnomalyDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.config.deviation_threshold = threshold;
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn detect(&self, nominal: &TelemetrySeries, current: &TelemetrySeries) -> AnomalyReport {
        let threshold = self.config.deviation_threshold;
        let mut report = AnomalyReport {
            threshold,
            ..Default::default()
        };

        let nominal_channels = nominal.channels();
        let mut weighted = 0.0;
        let mut total_weight = 0.0;

        for channel in current.channels() {
            if !nominal_channels.contains(&channel) {
                continue;
            }
            match self.channel_deviation(&channel, nominal, current) {
                Some(deviation) => {
                    let weight = self
                        .config
                        .channel_weights
                        .get(&channel)
                        .copied()
                        .unwrap_or(1.0);
                    weighted += weight * deviation.fractional_delta;
                    total_weight += weight;
                    log::debug!(
                        "Channel {}: deviation {:.4} (max {:.4}) anomalous={}",
                        channel,
                        deviation.fractional_delta,
                        deviation.max_fractional,
                        deviation.anomalous
                    );
                    report.deviations.insert(channel, deviation);
                }
                None => {
                    log::warn!(
                        "Channel {} excluded: fewer than {} aligned samples",
                        channel,
                        self.config.smoothing_window
                    );
                    report.excluded.push(channel);
                }
            }
        }

        report.severity = if total_weight > 0.0 {
            weighted / total_weight
        } else {
            0.0
        };
        report
    }

    fn channel_deviation(
        &self,
        channel: &str,
        nominal: &TelemetrySeries,
        current: &TelemetrySeries,
    ) -> Option<Deviation> {
        let w = self.config.smoothing_window.max(1);
        let aligned = align(channel, nominal, current);
        if aligned.len() < w {
            return None;
        }

        let threshold = self.config.deviation_threshold;
        let mut count = 0usize;
        let mut sum_abs = 0.0;
        let mut sum_frac = 0.0;
        let mut sum_signed = 0.0;
        let mut sum_quality = 0.0;
        let mut max_frac: f64 = 0.0;
        let mut onset_us = None;

        for window in aligned.windows(w) {
            let n = w as f64;
            let nom = window.iter().map(|p| p.nominal).sum::<f64>() / n;
            let cur = window.iter().map(|p| p.current).sum::<f64>() / n;
            let quality = window.iter().map(|p| p.quality).sum::<f64>() / n;
            if nom.abs() < self.config.min_nominal_magnitude {
                continue;
            }

            let frac = (cur - nom).abs() / nom.abs();
            let timestamp_us = window[w - 1].timestamp_us;
            if onset_us.is_none() && frac > threshold {
                onset_us = Some(timestamp_us);
            }
            count += 1;
            sum_abs += (cur - nom).abs();
            sum_frac += frac;
            sum_signed += (cur - nom) / nom.abs();
            sum_quality += quality;
            max_frac = max_frac.max(frac);
        }

        if count == 0 {
            return None;
        }
        let n = count as f64;
        let fractional_delta = sum_frac / n;
        Some(Deviation {
            observable: channel.to_string(),
            absolute_delta: sum_abs / n,
            fractional_delta,
            signed_fractional: sum_signed / n,
            max_fractional: max_frac,
            onset_us,
            anomalous: fractional_delta > threshold,
            confidence: sum_quality / n,
            synthetic: false,
        })
    }
}

/// Pairs the channel's samples from both series. A baseline recorded on
/// the same clock joins on timestamp; any other baseline (a different run,
/// or a live window that has moved past it) pairs the newest samples of
/// each side.
fn align(channel: &str, nominal: &TelemetrySeries, current: &TelemetrySeries) -> Vec<AlignedPoint> {
    let joined = join_on_timestamp(channel, nominal, current);
    let wanted = current
        .samples()
        .iter()
        .filter(|s| s.get(channel).is_some())
        .count();
    if joined.len() == wanted {
        return joined;
    }
    log::debug!(
        "Channel {}: {} of {} samples share a timestamp with the baseline; pairing by position",
        channel,
        joined.len(),
        wanted
    );
    pair_from_newest(channel, nominal, current)
}

/// Inner join on timestamp. Both series are sorted.
fn join_on_timestamp(
    channel: &str,
    nominal: &TelemetrySeries,
    current: &TelemetrySeries,
) -> Vec<AlignedPoint> {
    let nom = nominal.samples();
    let cur = current.samples();
    let (mut i, mut j) = (0, 0);
    let mut out = Vec::new();
    while i < nom.len() && j < cur.len() {
        let (a, b) = (&nom[i], &cur[j]);
        if a.timestamp_us < b.timestamp_us {
            i += 1;
        } else if a.timestamp_us > b.timestamp_us {
            j += 1;
        } else {
            if let (Some(n), Some(c)) = (a.get(channel), b.get(channel)) {
                out.push(AlignedPoint {
                    timestamp_us: b.timestamp_us,
                    nominal: n,
                    current: c,
                    quality: a.quality * b.quality,
                });
            }
            i += 1;
            j += 1;
        }
    }
    out
}

/// The last `k` readings of each side, paired in order, where `k` is the
/// shorter side's reading count.
fn pair_from_newest(
    channel: &str,
    nominal: &TelemetrySeries,
    current: &TelemetrySeries,
) -> Vec<AlignedPoint> {
    let nom: Vec<(f64, f64)> = nominal
        .samples()
        .iter()
        .filter_map(|s| s.get(channel).map(|v| (v, s.quality)))
        .collect();
    let cur: Vec<(i64, f64, f64)> = current
        .samples()
        .iter()
        .filter_map(|s| s.get(channel).map(|v| (s.timestamp_us, v, s.quality)))
        .collect();
    let k = nom.len().min(cur.len());
    nom[nom.len() - k..]
        .iter()
        .zip(&cur[cur.len() - k..])
        .map(|(&(n, nq), &(timestamp_us, c, cq))| AlignedPoint {
            timestamp_us,
            nominal: n,
            current: c,
            quality: nq * cq,
        })
        .collect()
}
