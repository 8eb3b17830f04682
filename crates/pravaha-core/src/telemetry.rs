//! Timestamped telemetry samples and ordered series.
//!
//! Timestamps are microseconds (`i64`), matching the rest of the crate.
//! A series only accepts strictly increasing timestamps; gaps are runs of
//! expected sample instants with nothing recorded.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TelemetryError {
    #[error("timestamp {got} is not after previous sample at {previous}")]
    NonMonotonicTimestamp { previous: i64, got: i64 },
    #[error("channel '{channel}' at {timestamp_us} is not finite")]
    NonFiniteValue { channel: String, timestamp_us: i64 },
    #[error("sample quality {0} outside [0, 1]")]
    InvalidQuality(f64),
    #[error("sample interval must be positive, got {0}")]
    InvalidInterval(i64),
}

fn full_quality() -> f64 {
    1.0
}

/// One instant of telemetry: channel name to value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub timestamp_us: i64,
    pub values: BTreeMap<String, f64>,
    /// 1.0 for real measurements, lower for estimator-filled samples.
    #[serde(default = "full_quality")]
    pub quality: f64,
}

impl TelemetrySample {
    pub fn new(timestamp_us: i64) -> Self {
        Self {
            timestamp_us,
            values: BTreeMap::new(),
            quality: 1.0,
        }
    }

    pub fn with(mut self, channel: &str, value: f64) -> Self {
        self.values.insert(channel.to_string(), value);
        self
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = quality;
        self
    }

    pub fn get(&self, channel: &str) -> Option<f64> {
        self.values.get(channel).copied()
    }

    fn validate(&self) -> Result<(), TelemetryError> {
        if !(0.0..=1.0).contains(&self.quality) {
            return Err(TelemetryError::InvalidQuality(self.quality));
        }
        for (channel, value) in &self.values {
            if !value.is_finite() {
                return Err(TelemetryError::NonFiniteValue {
                    channel: channel.clone(),
                    timestamp_us: self.timestamp_us,
                });
            }
        }
        Ok(())
    }
}

/// Run of missing samples between two recorded ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    /// Last sample before the gap.
    pub start_us: i64,
    /// First sample after the gap.
    pub end_us: i64,
    /// Expected instants with no data.
    pub missing: usize,
}

impl Gap {
    /// Number of whole sampling intervals missing between two timestamps.
    pub fn between(start_us: i64, end_us: i64, interval_us: i64) -> Self {
        let missing = if interval_us <= 0 || end_us <= start_us {
            0
        } else {
            let steps = (end_us - start_us + interval_us / 2) / interval_us;
            (steps - 1).max(0) as usize
        };
        Self {
            start_us,
            end_us,
            missing,
        }
    }

    /// Expected instants inside the gap, evenly spaced from the start.
    pub fn expected_timestamps(&self, interval_us: i64) -> Vec<i64> {
        (1..=self.missing as i64)
            .map(|k| self.start_us + k * interval_us)
            .collect()
    }
}

/// Ordered samples with strictly increasing timestamps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySeries {
    samples: Vec<TelemetrySample>,
}

impl TelemetrySeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_samples(samples: Vec<TelemetrySample>) -> Result<Self, TelemetryError> {
        let mut series = Self::new();
        for sample in samples {
            series.push(sample)?;
        }
        Ok(series)
    }

    pub fn push(&mut self, sample: TelemetrySample) -> Result<(), TelemetryError> {
        sample.validate()?;
        if let Some(last) = self.samples.last() {
            if sample.timestamp_us <= last.timestamp_us {
                return Err(TelemetryError::NonMonotonicTimestamp {
                    previous: last.timestamp_us,
                    got: sample.timestamp_us,
                });
            }
        }
        self.samples.push(sample);
        Ok(())
    }

    /// Inserts samples at timestamps the series does not already cover.
    /// Returns how many were inserted.
    pub fn fill_missing<'a, I>(&mut self, samples: I) -> Result<usize, TelemetryError>
    where
        I: IntoIterator<Item = &'a TelemetrySample>,
    {
        let mut inserted = 0;
        for sample in samples {
            sample.validate()?;
            match self
                .samples
                .binary_search_by_key(&sample.timestamp_us, |s| s.timestamp_us)
            {
                Ok(_) => {}
                Err(pos) => {
                    self.samples.insert(pos, sample.clone());
                    inserted += 1;
                }
            }
        }
        Ok(inserted)
    }

    /// Drops the oldest samples so at most `max` remain.
    pub fn retain_last(&mut self, max: usize) {
        if self.samples.len() > max {
            let excess = self.samples.len() - max;
            self.samples.drain(..excess);
        }
    }

    pub fn samples(&self) -> &[TelemetrySample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> Option<&TelemetrySample> {
        self.samples.first()
    }

    pub fn last(&self) -> Option<&TelemetrySample> {
        self.samples.last()
    }

    /// Union of channel names over all samples.
    pub fn channels(&self) -> BTreeSet<String> {
        self.samples
            .iter()
            .flat_map(|s| s.values.keys().cloned())
            .collect()
    }

    /// `(timestamp, value)` pairs for one channel.
    pub fn values(&self, channel: &str) -> Vec<(i64, f64)> {
        self.samples
            .iter()
            .filter_map(|s| s.get(channel).map(|v| (s.timestamp_us, v)))
            .collect()
    }

    pub fn mean(&self, channel: &str) -> Option<f64> {
        let values = self.values(channel);
        if values.is_empty() {
            return None;
        }
        Some(values.iter().map(|(_, v)| v).sum::<f64>() / values.len() as f64)
    }

    /// Every gap of at least one missing expected sample.
    pub fn detect_gaps(&self, interval_us: i64) -> Result<Vec<Gap>, TelemetryError> {
        if interval_us <= 0 {
            return Err(TelemetryError::InvalidInterval(interval_us));
        }
        Ok(self
            .samples
            .windows(2)
            .map(|w| Gap::between(w[0].timestamp_us, w[1].timestamp_us, interval_us))
            .filter(|gap| gap.missing > 0)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: i64 = 1_000_000;

    fn series(timestamps: &[i64]) -> TelemetrySeries {
        TelemetrySeries::from_samples(
            timestamps
                .iter()
                .map(|&t| TelemetrySample::new(t).with("v", t as f64))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_non_monotonic() {
        let mut s = series(&[0, SEC]);
        let err = s.push(TelemetrySample::new(SEC)).unwrap_err();
        assert_eq!(
            err,
            TelemetryError::NonMonotonicTimestamp {
                previous: SEC,
                got: SEC
            }
        );
    }

    #[test]
    fn test_rejects_non_finite_and_bad_quality() {
        let mut s = TelemetrySeries::new();
        assert!(matches!(
            s.push(TelemetrySample::new(0).with("v", f64::NAN)),
            Err(TelemetryError::NonFiniteValue { .. })
        ));
        assert_eq!(
            s.push(TelemetrySample::new(0).with_quality(1.5)),
            Err(TelemetryError::InvalidQuality(1.5))
        );
        assert!(s.is_empty());
    }

    #[test]
    fn test_detect_gaps() {
        let s = series(&[0, 10 * SEC, 20 * SEC, 60 * SEC, 70 * SEC, 91 * SEC]);
        let gaps = s.detect_gaps(10 * SEC).unwrap();
        assert_eq!(
            gaps,
            vec![
                Gap {
                    start_us: 20 * SEC,
                    end_us: 60 * SEC,
                    missing: 3
                },
                Gap {
                    start_us: 70 * SEC,
                    end_us: 91 * SEC,
                    missing: 1
                },
            ]
        );
        assert_eq!(
            gaps[0].expected_timestamps(10 * SEC),
            vec![30 * SEC, 40 * SEC, 50 * SEC]
        );
        assert!(s.detect_gaps(0).is_err());
    }

    #[test]
    fn test_jitter_is_not_a_gap() {
        let s = series(&[0, 10 * SEC, 24 * SEC]);
        assert!(s.detect_gaps(10 * SEC).unwrap().is_empty());
    }

    #[test]
    fn test_fill_missing_keeps_order_and_skips_present() {
        let mut s = series(&[0, 30 * SEC]);
        let filler = vec![
            TelemetrySample::new(10 * SEC).with("v", 1.0).with_quality(0.5),
            TelemetrySample::new(30 * SEC).with("v", 99.0),
            TelemetrySample::new(20 * SEC).with("v", 2.0).with_quality(0.4),
        ];
        assert_eq!(s.fill_missing(&filler).unwrap(), 2);
        let stamps: Vec<i64> = s.samples().iter().map(|x| x.timestamp_us).collect();
        assert_eq!(stamps, vec![0, 10 * SEC, 20 * SEC, 30 * SEC]);
        assert_eq!(s.last().unwrap().get("v"), Some(30.0 * SEC as f64));
    }

    #[test]
    fn test_retain_last_and_channels() {
        let mut s = series(&[0, SEC, 2 * SEC, 3 * SEC]);
        s.retain_last(2);
        assert_eq!(s.len(), 2);
        assert_eq!(s.first().unwrap().timestamp_us, 2 * SEC);
        assert_eq!(s.channels().into_iter().collect::<Vec<_>>(), vec!["v"]);
        assert_eq!(s.mean("v"), Some(2.5 * SEC as f64));
    }
}
