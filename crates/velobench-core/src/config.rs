//! Profile configuration
//!
//! The CLI assembles one [`ProfileConfig`] from flags, validates it before
//! any service starts, and passes it (immutable) to every component.
//! Invalid combinations abort with a configuration error and never reach
//! the runtime.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    Chat,
    Completions,
    Embeddings,
    Rankings,
}

impl EndpointKind {
    pub fn supports_streaming(&self) -> bool {
        matches!(self, EndpointKind::Chat | EndpointKind::Completions)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestRateMode {
    #[default]
    Poisson,
    Constant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    SingleTurn,
    MultiTurn,
    MooncakeTrace,
    RandomPool,
}

/// Target endpoint and HTTP behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub model: String,
    /// Base URL of the service, e.g. `http://localhost:8000`.
    pub url: String,
    pub kind: EndpointKind,
    pub streaming: bool,
    pub request_timeout_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Extra request headers supplied by the user.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            url: String::new(),
            kind: EndpointKind::Chat,
            streaming: true,
            request_timeout_secs: 600.0,
            api_key: None,
            headers: Vec::new(),
        }
    }
}

/// Dataset source and reproducibility knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_kind: Option<DatasetKind>,
    pub fixed_schedule: bool,
    pub fixed_schedule_auto_offset: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_schedule_start_offset_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_schedule_end_offset_ms: Option<u64>,
    pub random_seed: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            input_file: None,
            dataset_kind: None,
            fixed_schedule: false,
            fixed_schedule_auto_offset: false,
            fixed_schedule_start_offset_ms: None,
            fixed_schedule_end_offset_ms: None,
            random_seed: 0,
        }
    }
}

/// Traffic shape: concurrency, rate, termination, warmup, cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_rate: Option<f64>,
    pub request_rate_mode: RequestRateMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub benchmark_duration_secs: Option<f64>,
    pub grace_period_secs: f64,
    pub warmup_request_count: u64,
    /// Percent of credits independently marked for cancellation, in (0, 100].
    pub cancellation_rate_percent: f64,
    /// Cancel deadline measured from request start.
    pub cancellation_delay_secs: f64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            request_rate: None,
            request_rate_mode: RequestRateMode::default(),
            request_count: None,
            benchmark_duration_secs: None,
            grace_period_secs: 30.0,
            warmup_request_count: 0,
            cancellation_rate_percent: 0.0,
            cancellation_delay_secs: 0.0,
        }
    }
}

/// Conversation shaping for synthetic datasets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    pub num: usize,
    pub turn_mean: f64,
    pub turn_stddev: f64,
    pub turn_delay_mean_ms: f64,
    pub turn_delay_stddev_ms: f64,
    pub turn_delay_ratio: f64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            num: 100,
            turn_mean: 1.0,
            turn_stddev: 0.0,
            turn_delay_mean_ms: 0.0,
            turn_delay_stddev_ms: 0.0,
            turn_delay_ratio: 1.0,
        }
    }
}

/// Prompt and output sequence-length shaping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LengthConfig {
    pub isl_mean: f64,
    pub isl_stddev: f64,
    pub osl_mean: f64,
    pub osl_stddev: f64,
    /// Semicolon-separated `(isl,osl,prob[,stddev])` entries; when present
    /// each conversation draws its pair from this distribution instead of
    /// the mean/stddev knobs above.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_distribution: Option<String>,
    pub prompt_prefix_pool_size: usize,
    pub prompt_prefix_length: usize,
}

impl Default for LengthConfig {
    fn default() -> Self {
        Self {
            isl_mean: 550.0,
            isl_stddev: 0.0,
            osl_mean: 150.0,
            osl_stddev: 0.0,
            sequence_distribution: None,
            prompt_prefix_pool_size: 0,
            prompt_prefix_length: 0,
        }
    }
}

/// Artifact output location and timeslicing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub artifact_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slice_duration_secs: Option<f64>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from("artifacts"),
            run_name: None,
            slice_duration_secs: None,
        }
    }
}

/// Service-pool sizing and health cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceTuning {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers_max: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_processors: Option<usize>,
    pub heartbeat_interval_secs: f64,
    pub missed_heartbeat_limit: u32,
}

impl Default for ServiceTuning {
    fn default() -> Self {
        Self {
            workers_max: None,
            record_processors: None,
            heartbeat_interval_secs: 1.0,
            missed_heartbeat_limit: 5,
        }
    }
}

/// One goodput SLO: a record metric must stay at or under the threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SloPredicate {
    pub metric_tag: String,
    pub threshold: f64,
}

impl SloPredicate {
    /// Parse a `metric:threshold` pair, e.g. `time_to_first_token:100`.
    pub fn parse(spec: &str) -> Result<Self> {
        let (tag, value) = spec
            .split_once(':')
            .ok_or_else(|| Error::Config(format!("invalid goodput SLO '{spec}', expected metric:threshold")))?;
        let threshold: f64 = value
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("invalid goodput threshold in '{spec}'")))?;
        if threshold < 0.0 {
            return Err(Error::Config(format!("goodput threshold must be >= 0 in '{spec}'")));
        }
        Ok(Self {
            metric_tag: tag.trim().to_string(),
            threshold,
        })
    }

    /// Parse a space-separated list of `metric:threshold` pairs.
    pub fn parse_list(spec: &str) -> Result<Vec<Self>> {
        spec.split_whitespace().map(Self::parse).collect()
    }
}

/// The complete, validated configuration of one profiling run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub endpoint: EndpointConfig,
    pub input: InputConfig,
    pub load: LoadConfig,
    pub conversation: ConversationConfig,
    pub length: LengthConfig,
    pub output: OutputConfig,
    pub service: ServiceTuning,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub goodput: Vec<SloPredicate>,
    /// Prefer server-reported `usage` token counts over tokenizer counts.
    pub prefer_usage_counts: bool,
}

impl ProfileConfig {
    /// Reject invalid flag combinations before any service starts.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.model.is_empty() {
            return Err(Error::Config("--model is required".into()));
        }
        if self.endpoint.url.is_empty() {
            return Err(Error::Config("--url is required".into()));
        }
        if self.endpoint.streaming && !self.endpoint.kind.supports_streaming() {
            return Err(Error::Config(
                "--streaming is not supported for this endpoint type".into(),
            ));
        }
        if self.endpoint.request_timeout_secs <= 0.0 {
            return Err(Error::Config("--request-timeout-seconds must be > 0".into()));
        }
        if self.load.request_rate.is_some() && self.input.fixed_schedule {
            return Err(Error::Config(
                "--request-rate cannot be combined with --fixed-schedule".into(),
            ));
        }
        if let Some(rate) = self.load.request_rate {
            if rate <= 0.0 {
                return Err(Error::Config("--request-rate must be > 0".into()));
            }
        }
        if let Some(c) = self.load.concurrency {
            if c == 0 {
                return Err(Error::Config("--concurrency must be >= 1".into()));
            }
        }
        if !self.input.fixed_schedule
            && self.load.concurrency.is_none()
            && self.load.request_rate.is_none()
        {
            return Err(Error::Config(
                "one of --concurrency, --request-rate or --fixed-schedule is required".into(),
            ));
        }
        if !self.input.fixed_schedule
            && self.load.request_count.is_none()
            && self.load.benchmark_duration_secs.is_none()
        {
            return Err(Error::Config(
                "one of --request-count or --benchmark-duration is required".into(),
            ));
        }
        if self.input.fixed_schedule && self.input.input_file.is_none() {
            return Err(Error::Config("--fixed-schedule requires --input-file".into()));
        }
        if !(0.0..=100.0).contains(&self.load.cancellation_rate_percent) {
            return Err(Error::Config(
                "--request-cancellation-rate must be in [0, 100]".into(),
            ));
        }
        if self.load.cancellation_delay_secs < 0.0 {
            return Err(Error::Config(
                "--request-cancellation-delay must be >= 0".into(),
            ));
        }
        if let (Some(slice), Some(duration)) = (
            self.output.slice_duration_secs,
            self.load.benchmark_duration_secs,
        ) {
            if slice >= duration {
                return Err(Error::Config(
                    "--slice-duration must be smaller than --benchmark-duration".into(),
                ));
            }
        }
        if let Some(slice) = self.output.slice_duration_secs {
            if slice <= 0.0 {
                return Err(Error::Config("--slice-duration must be > 0".into()));
            }
        }
        if self.length.prompt_prefix_length > 0 && self.length.prompt_prefix_pool_size == 0 {
            return Err(Error::Config(
                "--prompt-prefix-length requires --prompt-prefix-pool-size > 0".into(),
            ));
        }
        Ok(())
    }

    /// Worker count: `min(concurrency, floor(cpus * 0.75) - 1)`, clamped to
    /// [1, 32]; a user-supplied count is still capped by concurrency.
    pub fn worker_count(&self) -> usize {
        let cpus = num_cpus::get();
        let auto = ((cpus as f64 * 0.75).floor() as usize).saturating_sub(1);
        let base = self.service.workers_max.unwrap_or(auto).clamp(1, 32);
        match self.load.concurrency {
            Some(c) => base.min(c.max(1)),
            None => base,
        }
    }

    pub fn record_processor_count(&self) -> usize {
        self.service
            .record_processors
            .unwrap_or_else(|| (self.worker_count() / 2).clamp(1, 8))
    }

    /// Directory name of this run's artifacts.
    pub fn run_name(&self) -> String {
        match &self.output.run_name {
            Some(name) => name.clone(),
            None => {
                let model = self
                    .endpoint
                    .model
                    .chars()
                    .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
                    .collect::<String>();
                format!("profile_{model}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> ProfileConfig {
        ProfileConfig {
            endpoint: EndpointConfig {
                model: "m".into(),
                url: "http://localhost:8000".into(),
                ..Default::default()
            },
            load: LoadConfig {
                concurrency: Some(4),
                request_count: Some(100),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn minimal_config_validates() {
        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn rate_conflicts_with_fixed_schedule() {
        let mut cfg = minimal();
        cfg.load.request_rate = Some(10.0);
        cfg.input.fixed_schedule = true;
        cfg.input.input_file = Some("trace.jsonl".into());
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn slice_must_be_smaller_than_duration() {
        let mut cfg = minimal();
        cfg.load.benchmark_duration_secs = Some(60.0);
        cfg.output.slice_duration_secs = Some(60.0);
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
        cfg.output.slice_duration_secs = Some(10.0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn streaming_embeddings_rejected() {
        let mut cfg = minimal();
        cfg.endpoint.kind = EndpointKind::Embeddings;
        cfg.endpoint.streaming = true;
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn termination_condition_required() {
        let mut cfg = minimal();
        cfg.load.request_count = None;
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
        cfg.load.benchmark_duration_secs = Some(30.0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn worker_count_capped_by_concurrency() {
        let mut cfg = minimal();
        cfg.load.concurrency = Some(2);
        cfg.service.workers_max = Some(16);
        assert_eq!(cfg.worker_count(), 2);
    }

    #[test]
    fn goodput_parsing() {
        let slos = SloPredicate::parse_list("time_to_first_token:100 inter_token_latency:3.4").unwrap();
        assert_eq!(slos.len(), 2);
        assert_eq!(slos[0].metric_tag, "time_to_first_token");
        assert_eq!(slos[1].threshold, 3.4);
        assert!(SloPredicate::parse("nonsense").is_err());
    }
}
