//! Record processing
//!
//! Transforms raw request records into per-metric values. The metric set is
//! a registry of plain values (tag, unit, kind, dependencies, extractor),
//! not a type hierarchy: record metrics extract per request, aggregate
//! metrics accumulate, derived metrics are computed at finalization by the
//! aggregator from their named dependencies.

pub mod metric;
pub mod processor;
pub mod record;

pub use metric::{registry, MetricKind, MetricRegistry, MetricSpec, MetricView, tags};
pub use processor::{ProcessorPoolService, RecordProcessor};
pub use record::{MetricRecord, MetricValue, RecordMetadata};
