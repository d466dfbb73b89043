// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded-memory latency statistics.
//!
//! Mean and variance are exact and maintained with Welford's online update. Quantiles come
//! from an agent-style DDSketch: at most 4096 logarithmic bins, with each estimate within
//! roughly 1% of the true value (the sketch uses gamma = 1 + 1/128). Estimates are clamped to
//! the exact observed min and max, so a report never shows a p99 above the slowest request.

use ddsketch_agent::DDSketch;
use serde::Serialize;

/// Running latency state. Each insert is O(1) time and the state never grows past the sketch's
/// bin limit.
#[derive(Debug, Clone, Default)]
pub struct LatencySummary {
    count: u64,
    min: u64,
    max: u64,
    mean: f64,
    m2: f64,
    sketch: DDSketch,
}

/// Point-in-time view of a [`LatencySummary`]. All statistics are `None` until the first
/// sample arrives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub count: u64,
    pub min_ms: Option<u64>,
    pub max_ms: Option<u64>,
    pub mean_ms: Option<f64>,
    /// Population standard deviation.
    pub stddev_ms: Option<f64>,
    pub p50_ms: Option<f64>,
    pub p90_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

impl LatencySummary {
    pub fn insert(&mut self, latency_ms: u64) {
        if self.count == 0 {
            self.min = latency_ms;
            self.max = latency_ms;
        } else {
            self.min = self.min.min(latency_ms);
            self.max = self.max.max(latency_ms);
        }
        self.count += 1;

        #[allow(clippy::cast_precision_loss)]
        let value = latency_ms as f64;
        #[allow(clippy::cast_precision_loss)]
        let n = self.count as f64;
        let delta = value - self.mean;
        self.mean += delta / n;
        self.m2 += delta * (value - self.mean);

        self.sketch.insert(value);
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    #[must_use]
    pub fn stats(&self) -> LatencyStats {
        if self.count == 0 {
            return LatencyStats::default();
        }

        #[allow(clippy::cast_precision_loss)]
        let variance = self.m2 / self.count as f64;

        LatencyStats {
            count: self.count,
            min_ms: Some(self.min),
            max_ms: Some(self.max),
            mean_ms: Some(self.mean),
            stddev_ms: Some(variance.max(0.0).sqrt()),
            p50_ms: self.quantile(0.5),
            p90_ms: self.quantile(0.9),
            p95_ms: self.quantile(0.95),
            p99_ms: self.quantile(0.99),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn quantile(&self, q: f64) -> Option<f64> {
        self.sketch
            .quantile(q)
            .map(|v| v.clamp(self.min as f64, self.max as f64))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn summary_of(values: &[u64]) -> LatencySummary {
        let mut summary = LatencySummary::default();
        for v in values {
            summary.insert(*v);
        }
        summary
    }

    fn assert_within(actual: f64, expected: f64, relative: f64) {
        let tolerance = expected.abs() * relative;
        assert!(
            (actual - expected).abs() <= tolerance,
            "{actual} not within {relative} of {expected}"
        );
    }

    #[test]
    fn empty_summary_has_no_stats() {
        let stats = LatencySummary::default().stats();
        assert_eq!(stats, LatencyStats::default());
        assert_eq!(stats.count, 0);
        assert!(stats.mean_ms.is_none());
        assert!(stats.p99_ms.is_none());
    }

    #[test]
    fn single_sample() {
        let stats = summary_of(&[42]).stats();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.min_ms, Some(42));
        assert_eq!(stats.max_ms, Some(42));
        assert_eq!(stats.mean_ms, Some(42.0));
        assert_eq!(stats.stddev_ms, Some(0.0));
        assert_eq!(stats.p50_ms, Some(42.0));
        assert_eq!(stats.p99_ms, Some(42.0));
    }

    #[test]
    fn mean_and_stddev_are_exact() {
        let stats = summary_of(&[2, 4, 4, 4, 5, 5, 7, 9]).stats();
        assert_eq!(stats.min_ms, Some(2));
        assert_eq!(stats.max_ms, Some(9));
        assert_within(stats.mean_ms.unwrap(), 5.0, 1e-12);
        assert_within(stats.stddev_ms.unwrap(), 2.0, 1e-12);
    }

    #[test]
    fn zero_latency_is_reported_as_zero() {
        let stats = summary_of(&[0, 0, 0]).stats();
        assert_eq!(stats.min_ms, Some(0));
        assert_eq!(stats.p50_ms, Some(0.0));
        assert_eq!(stats.mean_ms, Some(0.0));
    }

    #[test]
    fn quantiles_within_sketch_error() {
        let values: Vec<u64> = (1..=10_000).collect();
        let stats = summary_of(&values).stats();
        assert_within(stats.p50_ms.unwrap(), 5_000.0, 0.02);
        assert_within(stats.p90_ms.unwrap(), 9_000.0, 0.02);
        assert_within(stats.p95_ms.unwrap(), 9_500.0, 0.02);
        assert_within(stats.p99_ms.unwrap(), 9_900.0, 0.02);
        assert!(stats.p99_ms.unwrap() <= 10_000.0);
    }

    #[test]
    fn quantiles_never_leave_observed_range() {
        let stats = summary_of(&[100, 101, 102, 103]).stats();
        for q in [stats.p50_ms, stats.p90_ms, stats.p95_ms, stats.p99_ms] {
            let q = q.unwrap();
            assert!((100.0..=103.0).contains(&q), "{q}");
        }
    }

    #[test]
    fn same_inputs_same_stats() {
        let values: Vec<u64> = (0..5_000).map(|i| (i * 7919) % 1_000).collect();
        assert_eq!(summary_of(&values).stats(), summary_of(&values).stats());
    }
}
