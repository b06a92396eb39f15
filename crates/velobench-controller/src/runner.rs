//! Run orchestration
//!
//! Builds the dataset, wires the service topology over the bus, spawns
//! every service, drives the controller to completion, then collects the
//! aggregate results and writes artifacts.

use crate::controller::{Controller, ControllerSettings, RunOutcome};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use velobench_aggregator::{Aggregator, AggregatorService, ProfileResults};
use velobench_bus::{bounded_queue, BusEvent, CommandBus, Topic};
use velobench_core::clock::secs_to_ns;
use velobench_core::config::DatasetKind;
use velobench_core::tokenizer::{CorpusTokenizer, SharedTokenizer};
use velobench_core::types::Credit;
use velobench_core::{Error, ProfileConfig, Result, RunContext};
use velobench_dataset::{build_dataset, DatasetService, SampleStrategy};
use velobench_endpoints::codec_for;
use velobench_export::{build_inputs, ArtifactWriter};
use velobench_records::{registry, ProcessorPoolService, RecordProcessor};
use velobench_scheduler::SchedulerService;
use velobench_service::ServiceRunner;
use velobench_workers::{RequestExecutor, WorkerDeps, WorkerPoolService};

const EXPECTED_SERVICES: &[&str] = &[
    "dataset",
    "scheduler",
    "workers",
    "record-processors",
    "aggregator",
];

/// What a finished run hands back to the CLI.
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub results: ProfileResults,
    pub artifacts: Vec<PathBuf>,
}

/// Execute one profiling run end to end. The `interrupt` token is the
/// caller's handle for external shutdown (e.g. Ctrl-C).
pub async fn run_profile(cfg: ProfileConfig, interrupt: CancellationToken) -> Result<RunSummary> {
    cfg.validate()?;
    let cfg = Arc::new(cfg);
    let ctx = RunContext::new(cfg.input.random_seed, cfg.run_name());
    let clock = ctx.clock();

    // Dataset is materialized in full before the first credit, and the
    // deterministic inputs artifact is composed from the frozen pool.
    let tokenizer = Arc::new(CorpusTokenizer::reference());
    let pool = Arc::new(build_dataset(&cfg, &tokenizer)?);
    let codec = codec_for(cfg.endpoint.kind);
    let artifact_writer = ArtifactWriter::new(&cfg)?;
    let inputs = build_inputs(&pool, &codec, &cfg)?;
    info!(
        conversations = pool.count(),
        run = %ctx.run_id(),
        "dataset finalized"
    );

    // Bus wiring.
    let worker_count = cfg.worker_count();
    let events: Topic<BusEvent> = Topic::new(4096);
    let (commands, ack_rx) = CommandBus::new(64);
    let (credit_push, credit_pull) = bounded_queue("credits", (worker_count * 2).max(16));
    let (raw_push, raw_pull) = bounded_queue("raw-records", 1024);
    let (metric_push, metric_pull) = bounded_queue("metric-records", 1024);
    let mut lanes = HashMap::new();
    let mut seats = Vec::with_capacity(worker_count);
    for worker_id in 0..worker_count {
        let (lane_tx, lane_rx) = mpsc::channel::<Credit>(16);
        lanes.insert(worker_id, lane_tx);
        seats.push((worker_id, lane_rx));
    }

    // Controller first: it subscribes before any service can report.
    let controller = Controller::new(
        ControllerSettings {
            expected_services: EXPECTED_SERVICES.to_vec(),
            warmup_request_count: cfg.load.warmup_request_count,
            grace_period: Duration::from_secs_f64(cfg.load.grace_period_secs),
            heartbeat_interval: Duration::from_secs_f64(cfg.service.heartbeat_interval_secs),
            missed_heartbeat_limit: cfg.service.missed_heartbeat_limit,
            startup_timeout: Duration::from_secs(30),
        },
        events.clone(),
        commands.clone(),
        ack_rx,
        interrupt.clone(),
        clock,
    );

    let runner = ServiceRunner {
        events: events.clone(),
        commands: commands.clone(),
        shutdown: interrupt.clone(),
        clock,
        heartbeat_interval: Duration::from_secs_f64(cfg.service.heartbeat_interval_secs),
    };

    // Services.
    let strategy = match cfg.input.dataset_kind {
        Some(DatasetKind::RandomPool) => SampleStrategy::Random,
        _ => SampleStrategy::Sequential,
    };
    let (dataset_service, dataset_handle) =
        DatasetService::new(Arc::clone(&pool), strategy, cfg.input.random_seed);

    let scheduler = SchedulerService::new(
        Arc::clone(&cfg),
        dataset_handle.clone(),
        credit_push,
        lanes,
        events.clone(),
    );

    let executor = Arc::new(RequestExecutor::new(&cfg.endpoint, Arc::clone(&codec), clock)?);
    let workers = WorkerPoolService::new(
        seats,
        credit_pull,
        WorkerDeps {
            executor,
            dataset: dataset_handle,
            codec,
            records: raw_push,
            clock,
            model: cfg.endpoint.model.clone(),
            streaming: cfg.endpoint.streaming,
        },
    );

    let metric_registry = Arc::new(registry());
    let processors = ProcessorPoolService::new(
        cfg.record_processor_count(),
        raw_pull,
        metric_push,
        RecordProcessor::new(
            Arc::clone(&metric_registry),
            Arc::clone(&tokenizer) as SharedTokenizer,
            cfg.prefer_usage_counts,
        ),
    );

    let aggregator = Aggregator::new(
        Arc::clone(&metric_registry),
        cfg.goodput.clone(),
        cfg.output.slice_duration_secs.map(secs_to_ns),
    );
    let (aggregator_service, results_slot) =
        AggregatorService::new(aggregator, metric_pull, events.clone());

    let handles = vec![
        runner.spawn(dataset_service),
        runner.spawn(scheduler),
        runner.spawn(workers),
        runner.spawn(processors),
        runner.spawn(aggregator_service),
    ];

    let outcome = controller.run().await?;

    for handle in handles {
        let _ = handle.await;
    }

    let results = results_slot
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take()
        .ok_or_else(|| Error::Internal("aggregator produced no results".into()))?;

    let artifacts = artifact_writer
        .write_all(Some(&inputs), &results, &cfg)
        .await?;

    Ok(RunSummary {
        outcome,
        results,
        artifacts,
    })
}
