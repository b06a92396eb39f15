//! Aggregator
//!
//! Centralized collection of processed metric records: exactly-once per
//! request (dedupe on `x_request_id`), warmup isolated from profiling
//! statistics, optional wall-clock timeslice snapshots, and derived metrics
//! computed once the run seals. Publishes the credit-freed signal the
//! scheduler's concurrency gate waits on.

pub mod aggregator;
pub mod results;
pub mod stats;
pub mod timeslice;

pub use aggregator::{Aggregator, AggregatorService, SharedResults};
pub use results::{ProfileResults, TimesliceReport};
pub use stats::{percentile, summarize, MetricSummary, PERCENTILE_POINTS};
