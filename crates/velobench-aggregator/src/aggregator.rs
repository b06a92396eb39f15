//! Aggregation state and the aggregator service

use crate::results::ProfileResults;
use crate::stats::summarize;
use crate::timeslice::TimesliceTracker;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use velobench_bus::{BusEvent, Puller, Topic};
use velobench_core::config::SloPredicate;
use velobench_core::types::CreditPhase;
use velobench_core::Result;
use velobench_records::{tags, MetricRecord, MetricRegistry};
use velobench_service::{Service, ServiceContext};

const DURATION_RULE_LAST_RECORD: &str = "first_profiling_request_start_to_last_profiling_record_end";
const DURATION_RULE_WINDOW_END: &str = "first_profiling_request_start_to_measurement_window_end";

pub struct Aggregator {
    registry: Arc<MetricRegistry>,
    slos: Vec<SloPredicate>,

    seen: HashSet<String>,
    records: Vec<MetricRecord>,

    profiling_values: BTreeMap<String, Vec<f64>>,
    completed_requests: u64,
    error_requests: u64,
    warmup_records: u64,
    goodput_requests: u64,
    total_output_tokens: u64,
    error_summary: BTreeMap<String, u64>,
    timeslices: Option<TimesliceTracker>,

    first_profiling_start_ns: Option<u64>,
    last_profiling_end_ns: Option<u64>,
}

impl Aggregator {
    pub fn new(
        registry: Arc<MetricRegistry>,
        slos: Vec<SloPredicate>,
        slice_duration_ns: Option<u64>,
    ) -> Self {
        Self {
            registry,
            slos,
            seen: HashSet::new(),
            records: Vec::new(),
            profiling_values: BTreeMap::new(),
            completed_requests: 0,
            error_requests: 0,
            warmup_records: 0,
            goodput_requests: 0,
            total_output_tokens: 0,
            error_summary: BTreeMap::new(),
            timeslices: slice_duration_ns.map(TimesliceTracker::new),
            first_profiling_start_ns: None,
            last_profiling_end_ns: None,
        }
    }

    pub fn records_in(&self) -> u64 {
        self.records.len() as u64
    }

    fn meets_slos(&self, record: &MetricRecord) -> bool {
        self.slos.iter().all(|slo| {
            record
                .scalar(&slo.metric_tag)
                .is_some_and(|value| value <= slo.threshold)
        })
    }

    /// Accept one record; returns the seal event to publish, or `None` for
    /// a duplicate delivery.
    pub fn accept(&mut self, record: MetricRecord) -> Option<BusEvent> {
        if !self.seen.insert(record.metadata.x_request_id.clone()) {
            warn!(
                x_request_id = %record.metadata.x_request_id,
                "duplicate record delivery dropped"
            );
            return None;
        }

        let sealed = BusEvent::RecordSealed {
            x_request_id: record.metadata.x_request_id.clone(),
            conversation_id: record.metadata.conversation_id.clone(),
            turn_index: record.metadata.turn_index,
            session_num: record.metadata.session_num,
            worker_id: record.metadata.worker_id,
            phase: record.metadata.phase,
            final_turn: record.metadata.final_turn,
            had_error: !record.succeeded(),
            end_ns: record.metadata.end_ns,
        };

        match record.metadata.phase {
            CreditPhase::Warmup => {
                // Warmup records count toward drain but never toward
                // profiling statistics.
                self.warmup_records += 1;
            }
            CreditPhase::Profiling => {
                if record.succeeded() {
                    self.completed_requests += 1;
                    self.first_profiling_start_ns = Some(
                        self.first_profiling_start_ns
                            .map_or(record.metadata.start_ns, |v| v.min(record.metadata.start_ns)),
                    );
                    self.last_profiling_end_ns = Some(
                        self.last_profiling_end_ns
                            .map_or(record.metadata.end_ns, |v| v.max(record.metadata.end_ns)),
                    );
                    if let Some(output) = record.scalar(tags::OUTPUT_TOKEN_COUNT) {
                        self.total_output_tokens += output as u64;
                    }
                    if !self.slos.is_empty() && self.meets_slos(&record) {
                        self.goodput_requests += 1;
                    }
                    for (tag, value) in &record.metrics {
                        // Aggregate-kind tags (error_isl) stay out of the
                        // percentile vectors.
                        let is_record_metric = self
                            .registry
                            .get(tag)
                            .map(|s| s.kind == velobench_records::MetricKind::Record)
                            .unwrap_or(false);
                        if is_record_metric {
                            self.profiling_values
                                .entry(tag.clone())
                                .or_default()
                                .extend_from_slice(value.values());
                        }
                    }
                    if let Some(tracker) = &mut self.timeslices {
                        tracker.set_anchor(record.metadata.start_ns);
                        tracker.observe(record.metadata.end_ns, &record.metrics);
                    }
                } else {
                    self.error_requests += 1;
                    let kind = record
                        .error
                        .as_ref()
                        .map(|e| e.kind.clone())
                        .unwrap_or_else(|| "UnknownError".to_string());
                    *self.error_summary.entry(kind).or_insert(0) += 1;
                }
            }
        }

        self.records.push(record);
        Some(sealed)
    }

    /// Seal the run and compute final statistics and derived metrics.
    ///
    /// `window_end_ns` is the duration-mode measurement deadline; when
    /// absent the window closes at the last profiling record.
    pub fn finalize(self, window_end_ns: Option<u64>) -> ProfileResults {
        let start = self.first_profiling_start_ns.unwrap_or(0);
        let (end, rule) = match window_end_ns {
            Some(deadline) => (deadline, DURATION_RULE_WINDOW_END),
            None => (
                self.last_profiling_end_ns.unwrap_or(start),
                DURATION_RULE_LAST_RECORD,
            ),
        };
        let duration_secs = (end.saturating_sub(start)) as f64 / 1e9;
        let safe_duration = duration_secs.max(f64::EPSILON);

        let metrics = self
            .registry
            .record_specs()
            .filter_map(|spec| {
                self.profiling_values
                    .get(spec.tag)
                    .and_then(|values| summarize(spec.tag, spec.unit, values))
            })
            .collect();

        let goodput = (!self.slos.is_empty())
            .then(|| self.goodput_requests as f64 / safe_duration);

        debug!(
            completed = self.completed_requests,
            errors = self.error_requests,
            duration_secs,
            "aggregation sealed"
        );

        ProfileResults {
            completed_requests: self.completed_requests,
            error_requests: self.error_requests,
            records_in: self.records.len() as u64,
            warmup_records: self.warmup_records,
            total_output_tokens: self.total_output_tokens,
            duration_secs,
            benchmark_duration_rule: rule.to_string(),
            request_throughput: self.completed_requests as f64 / safe_duration,
            output_token_throughput: self.total_output_tokens as f64 / safe_duration,
            goodput,
            goodput_request_count: (!self.slos.is_empty()).then_some(self.goodput_requests),
            metrics,
            error_summary: self.error_summary,
            timeslices: self.timeslices.map(|t| t.finalize(&self.registry)),
            records: self.records,
        }
    }
}

pub type SharedResults = Arc<Mutex<Option<ProfileResults>>>;

/// The aggregator service: pulls metric records until the queue closes or
/// shutdown, then finalizes into the shared results slot.
pub struct AggregatorService {
    aggregator: Option<Aggregator>,
    input: Puller<MetricRecord>,
    events: Topic<BusEvent>,
    results: SharedResults,
}

impl AggregatorService {
    pub fn new(
        aggregator: Aggregator,
        input: Puller<MetricRecord>,
        events: Topic<BusEvent>,
    ) -> (Self, SharedResults) {
        let results: SharedResults = Arc::new(Mutex::new(None));
        (
            Self {
                aggregator: Some(aggregator),
                input,
                events,
                results: Arc::clone(&results),
            },
            results,
        )
    }
}

#[async_trait]
impl Service for AggregatorService {
    fn name(&self) -> &'static str {
        "aggregator"
    }

    async fn run(&mut self, ctx: ServiceContext) -> Result<()> {
        let mut aggregator = self
            .aggregator
            .take()
            .ok_or_else(|| velobench_core::Error::Internal("aggregator already consumed".into()))?;
        let mut bus_events = self.events.subscribe();
        let mut window_end_ns: Option<u64> = None;
        let mut profiling_deadline_ns: Option<u64> = None;

        loop {
            tokio::select! {
                maybe_record = self.input.pull() => match maybe_record {
                    Some(record) => {
                        if let Some(sealed) = aggregator.accept(record) {
                            self.events.publish(sealed);
                            if aggregator.records_in() % 100 == 0 {
                                self.events.publish(BusEvent::Progress {
                                    completed: aggregator.completed_requests,
                                    errors: aggregator.error_requests,
                                    target: None,
                                });
                            }
                        }
                    }
                    None => break,
                },
                event = bus_events.recv() => {
                    if let Ok(BusEvent::SchedulingComplete { profiling_deadline_ns: deadline, .. }) = event {
                        profiling_deadline_ns = deadline;
                    }
                }
                _ = ctx.shutdown.cancelled() => break,
            }
        }

        // Duration-terminated runs measure to the window end, not to the
        // last straggler record.
        if let Some(deadline) = profiling_deadline_ns {
            window_end_ns = Some(deadline);
        }

        let results = aggregator.finalize(window_end_ns);
        *self.results.lock().unwrap_or_else(|p| p.into_inner()) = Some(results);
        Ok(())
    }
}
