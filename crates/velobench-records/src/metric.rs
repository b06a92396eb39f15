//! The metric registry
//!
//! Metrics are values, not classes. Each record metric names an extractor
//! over a [`MetricView`]; aggregate and derived metrics carry no extractor
//! and are resolved by the aggregator (derived ones in dependency order at
//! finalization).

use crate::record::MetricValue;
use std::collections::HashMap;
use velobench_core::types::{RawRequestRecord, ResponseChunk};

pub mod tags {
    pub const INPUT_SEQUENCE_LENGTH: &str = "input_sequence_length";
    pub const ERROR_ISL: &str = "error_isl";
    pub const REQUEST_LATENCY: &str = "request_latency";
    pub const TIME_TO_FIRST_TOKEN: &str = "time_to_first_token";
    pub const TIME_TO_FIRST_OUTPUT_TOKEN: &str = "time_to_first_output_token";
    pub const TIME_TO_SECOND_TOKEN: &str = "time_to_second_token";
    pub const INTER_CHUNK_LATENCY: &str = "inter_chunk_latency";
    pub const INTER_TOKEN_LATENCY: &str = "inter_token_latency";
    pub const OUTPUT_TOKEN_COUNT: &str = "output_token_count";
    pub const REASONING_TOKEN_COUNT: &str = "reasoning_token_count";
    pub const OUTPUT_SEQUENCE_LENGTH: &str = "output_sequence_length";
    pub const OUTPUT_TOKEN_THROUGHPUT_PER_USER: &str = "output_token_throughput_per_user";

    pub const REQUEST_COUNT: &str = "request_count";
    pub const ERROR_REQUEST_COUNT: &str = "error_request_count";
    pub const REQUEST_THROUGHPUT: &str = "request_throughput";
    pub const OUTPUT_TOKEN_THROUGHPUT: &str = "output_token_throughput";
    pub const GOODPUT: &str = "goodput";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Extracted per request; summarized with percentile statistics.
    Record,
    /// A single accumulator across records.
    Aggregate,
    /// Computed at finalization from other metric results.
    Derived,
}

/// A record with its token counts resolved, ready for extraction.
pub struct MetricView<'a> {
    pub record: &'a RawRequestRecord,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub reasoning_tokens: u32,
}

impl<'a> MetricView<'a> {
    fn chunks(&self) -> &[ResponseChunk] {
        self.record
            .response
            .as_ref()
            .map(|r| r.chunks.as_slice())
            .unwrap_or(&[])
    }

    /// Receive times of chunks that carried any delta, in order.
    fn content_times(&self) -> Vec<u64> {
        self.chunks()
            .iter()
            .filter(|c| c.has_content())
            .map(|c| c.received_ns)
            .collect()
    }

    fn first_output_time(&self) -> Option<u64> {
        self.chunks()
            .iter()
            .find(|c| c.has_output_content())
            .map(|c| c.received_ns)
    }

    fn ms_since_start(&self, at_ns: u64) -> f64 {
        (at_ns.saturating_sub(self.record.start_ns)) as f64 / 1e6
    }
}

pub type Extractor = fn(&MetricView<'_>) -> Option<MetricValue>;

/// One metric definition.
pub struct MetricSpec {
    pub tag: &'static str,
    pub unit: &'static str,
    pub kind: MetricKind,
    pub dependencies: &'static [&'static str],
    pub extractor: Option<Extractor>,
}

pub struct MetricRegistry {
    specs: Vec<MetricSpec>,
    by_tag: HashMap<&'static str, usize>,
}

impl MetricRegistry {
    fn new(specs: Vec<MetricSpec>) -> Self {
        let by_tag = specs.iter().enumerate().map(|(i, s)| (s.tag, i)).collect();
        Self { specs, by_tag }
    }

    pub fn specs(&self) -> &[MetricSpec] {
        &self.specs
    }

    pub fn get(&self, tag: &str) -> Option<&MetricSpec> {
        self.by_tag.get(tag).map(|&i| &self.specs[i])
    }

    pub fn unit_of(&self, tag: &str) -> &'static str {
        self.get(tag).map(|s| s.unit).unwrap_or("")
    }

    pub fn record_specs(&self) -> impl Iterator<Item = &MetricSpec> {
        self.specs.iter().filter(|s| s.kind == MetricKind::Record)
    }
}

fn extract_input_sequence_length(view: &MetricView<'_>) -> Option<MetricValue> {
    Some(MetricValue::Scalar(view.input_tokens as f64))
}

fn extract_request_latency(view: &MetricView<'_>) -> Option<MetricValue> {
    Some(MetricValue::Scalar(view.ms_since_start(view.record.end_ns)))
}

fn extract_time_to_first_token(view: &MetricView<'_>) -> Option<MetricValue> {
    let first = *view.content_times().first()?;
    Some(MetricValue::Scalar(view.ms_since_start(first)))
}

fn extract_time_to_first_output_token(view: &MetricView<'_>) -> Option<MetricValue> {
    let first = view.first_output_time()?;
    Some(MetricValue::Scalar(view.ms_since_start(first)))
}

fn extract_time_to_second_token(view: &MetricView<'_>) -> Option<MetricValue> {
    let second = *view.content_times().get(1)?;
    Some(MetricValue::Scalar(view.ms_since_start(second)))
}

fn extract_inter_chunk_latency(view: &MetricView<'_>) -> Option<MetricValue> {
    let times = view.content_times();
    if times.len() < 2 {
        return None;
    }
    let deltas = times
        .windows(2)
        .map(|w| (w[1].saturating_sub(w[0])) as f64 / 1e6)
        .collect();
    Some(MetricValue::Series(deltas))
}

/// Total decode time over `output_sequence_length - 1` tokens, which is the
/// token-count-weighted mean of the inter-chunk latencies.
fn extract_inter_token_latency(view: &MetricView<'_>) -> Option<MetricValue> {
    let times = view.content_times();
    let osl = view.output_tokens + view.reasoning_tokens;
    if times.len() < 2 || osl < 2 {
        return None;
    }
    let total_ms = (times[times.len() - 1].saturating_sub(times[0])) as f64 / 1e6;
    Some(MetricValue::Scalar(total_ms / (osl - 1) as f64))
}

fn extract_output_token_count(view: &MetricView<'_>) -> Option<MetricValue> {
    Some(MetricValue::Scalar(view.output_tokens as f64))
}

fn extract_reasoning_token_count(view: &MetricView<'_>) -> Option<MetricValue> {
    Some(MetricValue::Scalar(view.reasoning_tokens as f64))
}

fn extract_output_sequence_length(view: &MetricView<'_>) -> Option<MetricValue> {
    Some(MetricValue::Scalar(
        (view.output_tokens + view.reasoning_tokens) as f64,
    ))
}

fn extract_output_token_throughput_per_user(view: &MetricView<'_>) -> Option<MetricValue> {
    let ack = view.record.ack_ns?;
    let decode_secs = (view.record.end_ns.saturating_sub(ack)) as f64 / 1e9;
    if decode_secs <= 0.0 || view.output_tokens == 0 {
        return None;
    }
    Some(MetricValue::Scalar(view.output_tokens as f64 / decode_secs))
}

/// The built-in metric set.
pub fn registry() -> MetricRegistry {
    MetricRegistry::new(vec![
        MetricSpec {
            tag: tags::INPUT_SEQUENCE_LENGTH,
            unit: "tokens",
            kind: MetricKind::Record,
            dependencies: &[],
            extractor: Some(extract_input_sequence_length),
        },
        MetricSpec {
            tag: tags::REQUEST_LATENCY,
            unit: "ms",
            kind: MetricKind::Record,
            dependencies: &[],
            extractor: Some(extract_request_latency),
        },
        MetricSpec {
            tag: tags::TIME_TO_FIRST_TOKEN,
            unit: "ms",
            kind: MetricKind::Record,
            dependencies: &[],
            extractor: Some(extract_time_to_first_token),
        },
        MetricSpec {
            tag: tags::TIME_TO_FIRST_OUTPUT_TOKEN,
            unit: "ms",
            kind: MetricKind::Record,
            dependencies: &[],
            extractor: Some(extract_time_to_first_output_token),
        },
        MetricSpec {
            tag: tags::TIME_TO_SECOND_TOKEN,
            unit: "ms",
            kind: MetricKind::Record,
            dependencies: &[],
            extractor: Some(extract_time_to_second_token),
        },
        MetricSpec {
            tag: tags::INTER_CHUNK_LATENCY,
            unit: "ms",
            kind: MetricKind::Record,
            dependencies: &[],
            extractor: Some(extract_inter_chunk_latency),
        },
        MetricSpec {
            tag: tags::INTER_TOKEN_LATENCY,
            unit: "ms",
            kind: MetricKind::Record,
            dependencies: &[],
            extractor: Some(extract_inter_token_latency),
        },
        MetricSpec {
            tag: tags::OUTPUT_TOKEN_COUNT,
            unit: "tokens",
            kind: MetricKind::Record,
            dependencies: &[],
            extractor: Some(extract_output_token_count),
        },
        MetricSpec {
            tag: tags::REASONING_TOKEN_COUNT,
            unit: "tokens",
            kind: MetricKind::Record,
            dependencies: &[],
            extractor: Some(extract_reasoning_token_count),
        },
        MetricSpec {
            tag: tags::OUTPUT_SEQUENCE_LENGTH,
            unit: "tokens",
            kind: MetricKind::Record,
            dependencies: &[],
            extractor: Some(extract_output_sequence_length),
        },
        MetricSpec {
            tag: tags::OUTPUT_TOKEN_THROUGHPUT_PER_USER,
            unit: "tokens/sec/user",
            kind: MetricKind::Record,
            dependencies: &[],
            extractor: Some(extract_output_token_throughput_per_user),
        },
        MetricSpec {
            tag: tags::ERROR_ISL,
            unit: "tokens",
            kind: MetricKind::Aggregate,
            dependencies: &[],
            extractor: None,
        },
        MetricSpec {
            tag: tags::REQUEST_COUNT,
            unit: "requests",
            kind: MetricKind::Aggregate,
            dependencies: &[],
            extractor: None,
        },
        MetricSpec {
            tag: tags::ERROR_REQUEST_COUNT,
            unit: "requests",
            kind: MetricKind::Aggregate,
            dependencies: &[],
            extractor: None,
        },
        MetricSpec {
            tag: tags::REQUEST_THROUGHPUT,
            unit: "requests/sec",
            kind: MetricKind::Derived,
            dependencies: &[tags::REQUEST_COUNT],
            extractor: None,
        },
        MetricSpec {
            tag: tags::OUTPUT_TOKEN_THROUGHPUT,
            unit: "tokens/sec",
            kind: MetricKind::Derived,
            dependencies: &[tags::OUTPUT_TOKEN_COUNT],
            extractor: None,
        },
        MetricSpec {
            tag: tags::GOODPUT,
            unit: "requests/sec",
            kind: MetricKind::Derived,
            dependencies: &[tags::REQUEST_COUNT],
            extractor: None,
        },
    ])
}
