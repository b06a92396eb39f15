//! Final run results

use crate::stats::MetricSummary;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use velobench_records::MetricRecord;

/// Statistics of one timeslice window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimesliceReport {
    pub index: u64,
    pub start_ns: u64,
    pub end_ns: u64,
    pub metrics: Vec<MetricSummary>,
}

/// Everything the aggregator knows once the run seals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileResults {
    /// Completed (non-error) profiling requests.
    pub completed_requests: u64,
    pub error_requests: u64,
    /// Records accepted exactly once, warmup included.
    pub records_in: u64,
    pub warmup_records: u64,
    pub total_output_tokens: u64,

    /// Measurement window in seconds and the rule that produced it.
    pub duration_secs: f64,
    pub benchmark_duration_rule: String,

    pub request_throughput: f64,
    pub output_token_throughput: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goodput: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goodput_request_count: Option<u64>,

    /// Per-metric statistics over profiling records.
    pub metrics: Vec<MetricSummary>,
    /// API error summary: error kind → count.
    pub error_summary: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeslices: Option<Vec<TimesliceReport>>,

    /// Every accepted record, in acceptance order. Exported line by line
    /// as `profile_export.jsonl`, not embedded in the aggregate artifact.
    #[serde(skip)]
    pub records: Vec<MetricRecord>,
}
