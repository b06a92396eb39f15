//! Per-request metric records

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use velobench_core::error::ErrorDetails;
use velobench_core::types::{ConversationId, CreditId, CreditPhase, RawRequestRecord, WorkerId};

/// A metric value: a scalar, or a per-event series (e.g. inter-chunk
/// latencies).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Scalar(f64),
    Series(Vec<f64>),
}

impl MetricValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            MetricValue::Scalar(v) => Some(*v),
            MetricValue::Series(_) => None,
        }
    }

    /// All values, one for a scalar, each element for a series.
    pub fn values(&self) -> &[f64] {
        match self {
            MetricValue::Scalar(v) => std::slice::from_ref(v),
            MetricValue::Series(vs) => vs,
        }
    }
}

/// Identity and timing carried alongside the metric values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub x_request_id: String,
    pub x_correlation_id: String,
    pub conversation_id: ConversationId,
    pub turn_index: usize,
    pub session_num: u64,
    pub worker_id: WorkerId,
    pub credit_id: CreditId,
    pub phase: CreditPhase,
    pub final_turn: bool,
    pub start_ns: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack_ns: Option<u64>,
    pub end_ns: u64,
    pub was_cancelled: bool,
}

impl From<&RawRequestRecord> for RecordMetadata {
    fn from(record: &RawRequestRecord) -> Self {
        Self {
            x_request_id: record.x_request_id.clone(),
            x_correlation_id: record.x_correlation_id.clone(),
            conversation_id: record.conversation_id.clone(),
            turn_index: record.turn_index,
            session_num: record.session_num,
            worker_id: record.worker_id,
            credit_id: record.credit_id,
            phase: record.phase,
            final_turn: record.final_turn,
            start_ns: record.start_ns,
            ack_ns: record.ack_ns,
            end_ns: record.end_ns,
            was_cancelled: record.was_cancelled,
        }
    }
}

/// One processed record: metadata plus `metric tag → value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub metadata: RecordMetadata,
    pub metrics: BTreeMap<String, MetricValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

impl MetricRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub fn scalar(&self, tag: &str) -> Option<f64> {
        self.metrics.get(tag).and_then(MetricValue::as_scalar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_and_series_serialize_untagged() {
        let scalar = serde_json::to_value(MetricValue::Scalar(1.5)).unwrap();
        assert_eq!(scalar, serde_json::json!(1.5));
        let series = serde_json::to_value(MetricValue::Series(vec![1.0, 2.0])).unwrap();
        assert_eq!(series, serde_json::json!([1.0, 2.0]));
    }

    #[test]
    fn values_view_is_uniform() {
        assert_eq!(MetricValue::Scalar(3.0).values(), &[3.0]);
        assert_eq!(MetricValue::Series(vec![1.0, 2.0]).values(), &[1.0, 2.0]);
    }
}
