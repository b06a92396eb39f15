//! Summary statistics
//!
//! Percentiles use linear interpolation on the sorted vector:
//! `P_k = sorted[floor(r)] + frac(r) * (sorted[ceil(r)] - sorted[floor(r)])`
//! with `r = k/100 * (n-1)`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PERCENTILE_POINTS: &[(&str, f64)] = &[
    ("p1", 1.0),
    ("p5", 5.0),
    ("p10", 10.0),
    ("p25", 25.0),
    ("p50", 50.0),
    ("p75", 75.0),
    ("p90", 90.0),
    ("p95", 95.0),
    ("p99", 99.0),
];

/// Linear-interpolated percentile over an ascending-sorted slice.
pub fn percentile(sorted: &[f64], k: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = k / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}

/// Final statistics of one record metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub tag: String,
    pub unit: String,
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
    pub percentiles: BTreeMap<String, f64>,
}

impl MetricSummary {
    /// `(stat name, value)` rows in canonical order, for tabular export.
    pub fn stat_rows(&self) -> Vec<(&'static str, f64)> {
        let mut rows = vec![
            ("count", self.count as f64),
            ("min", self.min),
            ("max", self.max),
            ("mean", self.mean),
            ("std", self.std),
        ];
        for (name, _) in PERCENTILE_POINTS {
            if let Some(value) = self.percentiles.get(*name) {
                rows.push((name, *value));
            }
        }
        rows
    }
}

/// Summarize a metric's observed values; `None` when nothing was observed.
pub fn summarize(tag: &str, unit: &str, values: &[f64]) -> Option<MetricSummary> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let n = sorted.len();
    let mean = sorted.iter().sum::<f64>() / n as f64;
    let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;

    let percentiles = PERCENTILE_POINTS
        .iter()
        .map(|(name, k)| (name.to_string(), percentile(&sorted, *k)))
        .collect();

    Some(MetricSummary {
        tag: tag.to_string(),
        unit: unit.to_string(),
        count: n,
        min: sorted[0],
        max: sorted[n - 1],
        mean,
        std: variance.sqrt(),
        percentiles,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_match_linear_interpolation_reference() {
        // Reference values computed offline with numpy.percentile
        // (linear interpolation) on 1..=100.
        let values: Vec<f64> = (1..=100).map(|i| i as f64).collect();
        let summary = summarize("m", "ms", &values).unwrap();
        let close = |a: f64, b: f64| (a - b).abs() < 1e-9;
        assert!(close(summary.percentiles["p50"], 50.5));
        assert!(close(summary.percentiles["p90"], 90.1));
        assert!(close(summary.percentiles["p99"], 99.01));
        assert!(close(summary.percentiles["p1"], 1.99));
        assert!(close(summary.percentiles["p25"], 25.75));
    }

    #[test]
    fn interpolation_between_two_points() {
        let sorted = [10.0, 20.0];
        assert!((percentile(&sorted, 50.0) - 15.0).abs() < 1e-12);
        assert!((percentile(&sorted, 0.0) - 10.0).abs() < 1e-12);
        assert!((percentile(&sorted, 100.0) - 20.0).abs() < 1e-12);
    }

    #[test]
    fn single_value_is_every_percentile() {
        let summary = summarize("m", "ms", &[7.5]).unwrap();
        assert_eq!(summary.percentiles["p1"], 7.5);
        assert_eq!(summary.percentiles["p99"], 7.5);
        assert_eq!(summary.min, 7.5);
        assert_eq!(summary.max, 7.5);
    }

    #[test]
    fn population_std() {
        let summary = summarize("m", "ms", &[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((summary.mean - 5.0).abs() < 1e-12);
        assert!((summary.std - 2.0).abs() < 1e-12);
    }

    #[test]
    fn empty_input_yields_none() {
        assert!(summarize("m", "ms", &[]).is_none());
    }

    #[test]
    fn stat_rows_are_canonically_ordered() {
        let summary = summarize("m", "ms", &[1.0, 2.0]).unwrap();
        let names: Vec<&str> = summary.stat_rows().iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec![
                "count", "min", "max", "mean", "std", "p1", "p5", "p10", "p25", "p50", "p75",
                "p90", "p95", "p99"
            ]
        );
    }
}
