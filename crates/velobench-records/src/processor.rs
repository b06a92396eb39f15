//! Record processor pool
//!
//! Stateless per record: parse the raw response once into a metric view,
//! then run every registered record-metric extractor. Processors pull from
//! the shared raw-record queue competitively.

use crate::metric::{tags, MetricRegistry, MetricView};
use crate::record::{MetricRecord, MetricValue, RecordMetadata};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use velobench_bus::{Puller, Pusher};
use velobench_core::tokenizer::SharedTokenizer;
use velobench_core::types::RawRequestRecord;
use velobench_core::Result;
use velobench_service::{Service, ServiceContext};

pub struct RecordProcessor {
    registry: Arc<MetricRegistry>,
    tokenizer: SharedTokenizer,
    prefer_usage_counts: bool,
}

impl RecordProcessor {
    pub fn new(
        registry: Arc<MetricRegistry>,
        tokenizer: SharedTokenizer,
        prefer_usage_counts: bool,
    ) -> Self {
        Self {
            registry,
            tokenizer,
            prefer_usage_counts,
        }
    }

    fn input_tokens(&self, record: &RawRequestRecord) -> u32 {
        match record.input_length_hint {
            Some(hint) => hint,
            None => self.tokenizer.count(&record.input_text) as u32,
        }
    }

    /// Transform one raw record. Failed or cancelled attempts produce a
    /// metadata-only record carrying `error_isl`, excluded from percentile
    /// statistics downstream.
    pub fn process(&self, record: &RawRequestRecord) -> MetricRecord {
        let metadata = RecordMetadata::from(record);
        let mut metrics = BTreeMap::new();

        if !record.succeeded() {
            metrics.insert(
                tags::ERROR_ISL.to_string(),
                MetricValue::Scalar(self.input_tokens(record) as f64),
            );
            return MetricRecord {
                metadata,
                metrics,
                error: record.error.clone(),
            };
        }

        let response = record.response.as_ref();
        let (output_tokens, reasoning_tokens) = match response {
            Some(response) => {
                let usage_count = response
                    .usage
                    .filter(|_| self.prefer_usage_counts)
                    .map(|u| u.completion_tokens);
                match usage_count {
                    // Server-reported completion tokens already include
                    // reasoning; no tokenizer split is possible.
                    Some(completion) => (completion, 0),
                    None => (
                        self.tokenizer.count(&response.output_text()) as u32,
                        self.tokenizer.count(&response.reasoning_output_text()) as u32,
                    ),
                }
            }
            None => (0, 0),
        };

        let view = MetricView {
            record,
            input_tokens: self.input_tokens(record),
            output_tokens,
            reasoning_tokens,
        };
        for spec in self.registry.record_specs() {
            if let Some(extractor) = spec.extractor {
                if let Some(value) = extractor(&view) {
                    metrics.insert(spec.tag.to_string(), value);
                }
            }
        }

        MetricRecord {
            metadata,
            metrics,
            error: None,
        }
    }
}

/// The processor pool service: M competitive pullers over the raw-record
/// queue, load-balanced by the queue itself.
pub struct ProcessorPoolService {
    processors: usize,
    raw_records: Puller<RawRequestRecord>,
    metric_records: Pusher<MetricRecord>,
    processor: Arc<RecordProcessor>,
}

impl ProcessorPoolService {
    pub fn new(
        processors: usize,
        raw_records: Puller<RawRequestRecord>,
        metric_records: Pusher<MetricRecord>,
        processor: RecordProcessor,
    ) -> Self {
        Self {
            processors,
            raw_records,
            metric_records,
            processor: Arc::new(processor),
        }
    }
}

#[async_trait]
impl Service for ProcessorPoolService {
    fn name(&self) -> &'static str {
        "record-processors"
    }

    async fn run(&mut self, ctx: ServiceContext) -> Result<()> {
        let mut handles = Vec::with_capacity(self.processors);
        for id in 0..self.processors {
            let raw = self.raw_records.clone();
            let out = self.metric_records.clone();
            let processor = Arc::clone(&self.processor);
            let shutdown = ctx.shutdown.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let record = tokio::select! {
                        maybe = raw.pull() => match maybe {
                            Some(record) => record,
                            None => break,
                        },
                        _ = shutdown.cancelled() => break,
                    };
                    let processed = processor.process(&record);
                    if out.push(processed).await.is_err() {
                        break;
                    }
                }
                debug!(processor = id, "record processor drained");
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }
}
