//! VeloBench CLI
//!
//! Command-line entry point: one `profile` command that assembles the run
//! configuration from flags, drives the benchmark, and prints the final
//! report. Exit codes: 0 success, 1 configuration error, 2 runtime
//! failure, 130 interrupted.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::error;
use velobench_controller::{run_profile, RunSummary};
use velobench_core::config::{
    DatasetKind, EndpointKind, ProfileConfig, RequestRateMode, SloPredicate,
};
use velobench_core::{Error, Result};

const EXIT_SUCCESS: i32 = 0;
const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_RUNTIME_FAILURE: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "velobench")]
#[command(about = "Benchmark generative-AI inference endpoints", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a profiling benchmark against an inference endpoint
    Profile(ProfileArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum EndpointTypeArg {
    Chat,
    Completions,
    Embeddings,
    Rankings,
}

#[derive(Clone, Copy, ValueEnum)]
enum RateModeArg {
    Poisson,
    Constant,
}

#[derive(Clone, Copy, ValueEnum)]
enum DatasetTypeArg {
    SingleTurn,
    MultiTurn,
    MooncakeTrace,
    RandomPool,
}

#[derive(Args)]
struct ProfileArgs {
    // Endpoint
    /// Model name sent in every request
    #[arg(long)]
    model: String,
    /// Base URL of the inference service, e.g. http://localhost:8000
    #[arg(long)]
    url: String,
    #[arg(long = "endpoint-type", value_enum, default_value = "chat")]
    endpoint_type: EndpointTypeArg,
    /// Request streaming responses (SSE)
    #[arg(long)]
    streaming: bool,
    #[arg(long = "request-timeout-seconds", default_value_t = 600.0)]
    request_timeout_seconds: f64,
    #[arg(long, env = "VELOBENCH_API_KEY")]
    api_key: Option<String>,
    /// Extra request header, `Name: value`; repeatable
    #[arg(long = "header", short = 'H')]
    headers: Vec<String>,

    // Input
    /// JSONL dataset file; omit to synthesize prompts
    #[arg(long = "input-file")]
    input_file: Option<PathBuf>,
    #[arg(long = "custom-dataset-type", value_enum)]
    custom_dataset_type: Option<DatasetTypeArg>,
    /// Replay request timing from the dataset's timestamps
    #[arg(long = "fixed-schedule")]
    fixed_schedule: bool,
    /// Subtract the first timestamp so replay starts immediately
    #[arg(long = "fixed-schedule-auto-offset")]
    fixed_schedule_auto_offset: bool,
    /// Replay sub-interval start, milliseconds (inclusive)
    #[arg(long = "fixed-schedule-start-offset")]
    fixed_schedule_start_offset: Option<u64>,
    /// Replay sub-interval end, milliseconds (inclusive)
    #[arg(long = "fixed-schedule-end-offset")]
    fixed_schedule_end_offset: Option<u64>,
    #[arg(long = "random-seed", default_value_t = 0)]
    random_seed: u64,

    // Load
    #[arg(long)]
    concurrency: Option<usize>,
    /// Requests per second
    #[arg(long = "request-rate")]
    request_rate: Option<f64>,
    #[arg(long = "request-rate-mode", value_enum, default_value = "poisson")]
    request_rate_mode: RateModeArg,
    #[arg(long = "request-count")]
    request_count: Option<u64>,
    /// Measurement window in seconds
    #[arg(long = "benchmark-duration")]
    benchmark_duration: Option<f64>,
    /// Drain allowance for in-flight requests, seconds
    #[arg(long = "benchmark-grace-period", default_value_t = 30.0)]
    benchmark_grace_period: f64,
    #[arg(long = "warmup-request-count", default_value_t = 0)]
    warmup_request_count: u64,
    /// Percent of requests to cancel mid-flight, (0, 100]
    #[arg(long = "request-cancellation-rate", default_value_t = 0.0)]
    request_cancellation_rate: f64,
    /// Seconds from request start to the cancellation
    #[arg(long = "request-cancellation-delay", default_value_t = 0.0)]
    request_cancellation_delay: f64,

    // Conversation shaping
    #[arg(long = "conversation-num", default_value_t = 100)]
    conversation_num: usize,
    #[arg(long = "conversation-turn-mean", default_value_t = 1.0)]
    conversation_turn_mean: f64,
    #[arg(long = "conversation-turn-stddev", default_value_t = 0.0)]
    conversation_turn_stddev: f64,
    /// Mean delay between turns, milliseconds
    #[arg(long = "conversation-turn-delay-mean", default_value_t = 0.0)]
    conversation_turn_delay_mean: f64,
    #[arg(long = "conversation-turn-delay-stddev", default_value_t = 0.0)]
    conversation_turn_delay_stddev: f64,
    #[arg(long = "conversation-turn-delay-ratio", default_value_t = 1.0)]
    conversation_turn_delay_ratio: f64,

    // Sequence lengths
    #[arg(long = "isl-mean", default_value_t = 550.0)]
    isl_mean: f64,
    #[arg(long = "isl-stddev", default_value_t = 0.0)]
    isl_stddev: f64,
    #[arg(long = "osl-mean", default_value_t = 150.0)]
    osl_mean: f64,
    #[arg(long = "osl-stddev", default_value_t = 0.0)]
    osl_stddev: f64,
    /// Semicolon-separated `isl,osl,prob[,stddev]` buckets
    #[arg(long = "sequence-distribution")]
    sequence_distribution: Option<String>,
    #[arg(long = "prompt-prefix-pool-size", default_value_t = 0)]
    prompt_prefix_pool_size: usize,
    #[arg(long = "prompt-prefix-length", default_value_t = 0)]
    prompt_prefix_length: usize,

    // Output
    #[arg(long = "artifact-dir", default_value = "artifacts")]
    artifact_dir: PathBuf,
    /// Directory name under the artifact dir; derived from the model by default
    #[arg(long = "run-name")]
    run_name: Option<String>,
    /// Timeslice window in seconds; enables timeslice artifacts
    #[arg(long = "slice-duration")]
    slice_duration: Option<f64>,

    // Service tuning
    #[arg(long = "workers-max")]
    workers_max: Option<usize>,
    #[arg(long = "record-processors")]
    record_processors: Option<usize>,

    /// Goodput SLOs, space-separated `metric:threshold` pairs,
    /// e.g. "time_to_first_token:100 inter_token_latency:3.4"
    #[arg(long)]
    goodput: Option<String>,
    /// Prefer server-reported usage token counts over tokenizer counts
    #[arg(long = "prefer-usage-counts")]
    prefer_usage_counts: bool,
}

fn parse_header(spec: &str) -> Result<(String, String)> {
    let (name, value) = spec
        .split_once(':')
        .ok_or_else(|| Error::Config(format!("invalid header '{spec}', expected 'Name: value'")))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

fn build_config(args: ProfileArgs) -> Result<ProfileConfig> {
    let mut cfg = ProfileConfig::default();

    cfg.endpoint.model = args.model;
    cfg.endpoint.url = args.url;
    cfg.endpoint.kind = match args.endpoint_type {
        EndpointTypeArg::Chat => EndpointKind::Chat,
        EndpointTypeArg::Completions => EndpointKind::Completions,
        EndpointTypeArg::Embeddings => EndpointKind::Embeddings,
        EndpointTypeArg::Rankings => EndpointKind::Rankings,
    };
    cfg.endpoint.streaming = args.streaming;
    cfg.endpoint.request_timeout_secs = args.request_timeout_seconds;
    cfg.endpoint.api_key = args.api_key;
    cfg.endpoint.headers = args
        .headers
        .iter()
        .map(|h| parse_header(h))
        .collect::<Result<_>>()?;

    cfg.input.input_file = args.input_file;
    cfg.input.dataset_kind = args.custom_dataset_type.map(|kind| match kind {
        DatasetTypeArg::SingleTurn => DatasetKind::SingleTurn,
        DatasetTypeArg::MultiTurn => DatasetKind::MultiTurn,
        DatasetTypeArg::MooncakeTrace => DatasetKind::MooncakeTrace,
        DatasetTypeArg::RandomPool => DatasetKind::RandomPool,
    });
    cfg.input.fixed_schedule = args.fixed_schedule;
    cfg.input.fixed_schedule_auto_offset = args.fixed_schedule_auto_offset;
    cfg.input.fixed_schedule_start_offset_ms = args.fixed_schedule_start_offset;
    cfg.input.fixed_schedule_end_offset_ms = args.fixed_schedule_end_offset;
    cfg.input.random_seed = args.random_seed;

    cfg.load.concurrency = args.concurrency;
    cfg.load.request_rate = args.request_rate;
    cfg.load.request_rate_mode = match args.request_rate_mode {
        RateModeArg::Poisson => RequestRateMode::Poisson,
        RateModeArg::Constant => RequestRateMode::Constant,
    };
    cfg.load.request_count = args.request_count;
    cfg.load.benchmark_duration_secs = args.benchmark_duration;
    cfg.load.grace_period_secs = args.benchmark_grace_period;
    cfg.load.warmup_request_count = args.warmup_request_count;
    cfg.load.cancellation_rate_percent = args.request_cancellation_rate;
    cfg.load.cancellation_delay_secs = args.request_cancellation_delay;

    cfg.conversation.num = args.conversation_num;
    cfg.conversation.turn_mean = args.conversation_turn_mean;
    cfg.conversation.turn_stddev = args.conversation_turn_stddev;
    cfg.conversation.turn_delay_mean_ms = args.conversation_turn_delay_mean;
    cfg.conversation.turn_delay_stddev_ms = args.conversation_turn_delay_stddev;
    cfg.conversation.turn_delay_ratio = args.conversation_turn_delay_ratio;

    cfg.length.isl_mean = args.isl_mean;
    cfg.length.isl_stddev = args.isl_stddev;
    cfg.length.osl_mean = args.osl_mean;
    cfg.length.osl_stddev = args.osl_stddev;
    cfg.length.sequence_distribution = args.sequence_distribution;
    cfg.length.prompt_prefix_pool_size = args.prompt_prefix_pool_size;
    cfg.length.prompt_prefix_length = args.prompt_prefix_length;

    cfg.output.artifact_dir = args.artifact_dir;
    cfg.output.run_name = args.run_name;
    cfg.output.slice_duration_secs = args.slice_duration;

    cfg.service.workers_max = args.workers_max;
    cfg.service.record_processors = args.record_processors;

    if let Some(goodput) = &args.goodput {
        cfg.goodput = SloPredicate::parse_list(goodput)?;
    }
    cfg.prefer_usage_counts = args.prefer_usage_counts;

    cfg.validate()?;
    Ok(cfg)
}

fn print_summary(summary: &RunSummary) {
    let results = &summary.results;
    println!();
    println!(
        "Benchmark complete: {} requests ({} errors, {} warmup) in {:.2}s",
        results.completed_requests,
        results.error_requests,
        results.warmup_records,
        results.duration_secs
    );
    println!(
        "Request throughput: {:.2} req/s    Output token throughput: {:.1} tok/s",
        results.request_throughput, results.output_token_throughput
    );
    if let (Some(goodput), Some(count)) = (results.goodput, results.goodput_request_count) {
        println!("Goodput: {goodput:.2} req/s ({count} requests within SLOs)");
    }

    if !results.metrics.is_empty() {
        println!();
        println!(
            "{:<34} {:>10} {:>10} {:>10} {:>10}",
            "Metric", "mean", "p50", "p90", "p99"
        );
        for metric in &results.metrics {
            println!(
                "{:<34} {:>10.2} {:>10.2} {:>10.2} {:>10.2}",
                format!("{} ({})", metric.tag, metric.unit),
                metric.mean,
                metric.percentiles.get("p50").copied().unwrap_or(f64::NAN),
                metric.percentiles.get("p90").copied().unwrap_or(f64::NAN),
                metric.percentiles.get("p99").copied().unwrap_or(f64::NAN),
            );
        }
    }

    if !results.error_summary.is_empty() {
        println!();
        println!("API Error Summary");
        for (kind, count) in &results.error_summary {
            println!("  {kind:<28} {count}");
        }
    }

    println!();
    for path in &summary.artifacts {
        println!("  wrote {}", path.display());
    }
}

async fn run(args: ProfileArgs) -> i32 {
    let cfg = match build_config(args) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(%err, "invalid configuration");
            eprintln!("error: {err}");
            return EXIT_CONFIG_ERROR;
        }
    };

    let interrupt = CancellationToken::new();
    {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("interrupted, shutting down...");
                interrupt.cancel();
            }
        });
    }

    match run_profile(cfg, interrupt.clone()).await {
        Ok(summary) => {
            print_summary(&summary);
            if summary.outcome.aborted() {
                if interrupt.is_cancelled() {
                    EXIT_INTERRUPTED
                } else {
                    error!(
                        reason = summary.outcome.abort_reason.as_deref().unwrap_or("unknown"),
                        "run aborted"
                    );
                    EXIT_RUNTIME_FAILURE
                }
            } else {
                EXIT_SUCCESS
            }
        }
        Err(Error::Config(message)) => {
            eprintln!("error: {message}");
            EXIT_CONFIG_ERROR
        }
        Err(err) => {
            error!(%err, "run failed");
            eprintln!("error: {err}");
            EXIT_RUNTIME_FAILURE
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Profile(args) => run(args).await,
    };
    std::process::exit(code);
}
