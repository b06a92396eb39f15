//! Artifact writers

use crate::inputs::InputsFile;
use chrono::Utc;
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::info;
use velobench_aggregator::{ProfileResults, TimesliceReport};
use velobench_core::{ProfileConfig, Result};

/// Writes all artifacts of one run under `artifact_dir/<run_name>/`.
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(cfg: &ProfileConfig) -> Result<Self> {
        let dir = cfg.output.artifact_dir.join(cfg.run_name());
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn write_inputs(&self, inputs: &InputsFile) -> Result<PathBuf> {
        let path = self.dir.join("inputs.json");
        let bytes = serde_json::to_vec_pretty(inputs)?;
        tokio::fs::write(&path, &bytes).await?;
        Ok(path)
    }

    /// One `{metadata, metrics, error}` line per accepted record.
    pub async fn write_records_jsonl(&self, results: &ProfileResults) -> Result<PathBuf> {
        let path = self.dir.join("profile_export.jsonl");
        let file = tokio::fs::File::create(&path).await?;
        let mut writer = tokio::io::BufWriter::new(file);
        for record in &results.records {
            let line = serde_json::to_vec(record)?;
            writer.write_all(&line).await?;
            writer.write_all(b"\n").await?;
        }
        writer.flush().await?;
        Ok(path)
    }

    /// Final aggregated statistics plus the run configuration.
    pub async fn write_aggregate_json(
        &self,
        results: &ProfileResults,
        cfg: &ProfileConfig,
    ) -> Result<PathBuf> {
        let path = self.dir.join("profile_export_velobench.json");
        let artifact = json!({
            "exported_at": Utc::now().to_rfc3339(),
            "config": cfg,
            "results": results,
        });
        tokio::fs::write(&path, serde_json::to_vec_pretty(&artifact)?).await?;
        Ok(path)
    }

    /// One row per (metric, stat), with the aggregate and derived metrics
    /// as single-value rows at the end.
    pub fn write_aggregate_csv(&self, results: &ProfileResults) -> Result<PathBuf> {
        let path = self.dir.join("profile_export_velobench.csv");
        let mut writer = csv::Writer::from_path(&path)
            .map_err(|e| velobench_core::Error::Internal(format!("csv: {e}")))?;
        writer
            .write_record(["Metric", "Unit", "Stat", "Value"])
            .map_err(|e| velobench_core::Error::Internal(format!("csv: {e}")))?;

        let mut write_row = |metric: &str, unit: &str, stat: &str, value: f64| {
            writer
                .write_record([metric, unit, stat, &format!("{value}")])
                .map_err(|e| velobench_core::Error::Internal(format!("csv: {e}")))
        };
        for summary in &results.metrics {
            for (stat, value) in summary.stat_rows() {
                write_row(&summary.tag, &summary.unit, stat, value)?;
            }
        }
        write_row(
            "request_count",
            "requests",
            "value",
            results.completed_requests as f64,
        )?;
        write_row(
            "error_request_count",
            "requests",
            "value",
            results.error_requests as f64,
        )?;
        write_row(
            "request_throughput",
            "requests/sec",
            "value",
            results.request_throughput,
        )?;
        write_row(
            "output_token_throughput",
            "tokens/sec",
            "value",
            results.output_token_throughput,
        )?;
        if let Some(goodput) = results.goodput {
            write_row("goodput", "requests/sec", "value", goodput)?;
        }

        writer
            .flush()
            .map_err(|e| velobench_core::Error::Internal(format!("csv: {e}")))?;
        Ok(path)
    }

    /// Timeslice snapshots: tidy CSV plus a JSON mirror.
    pub fn write_timeslices(&self, slices: &[TimesliceReport]) -> Result<(PathBuf, PathBuf)> {
        let csv_path = self.dir.join("profile_export_velobench_timeslices.csv");
        let mut writer = csv::Writer::from_path(&csv_path)
            .map_err(|e| velobench_core::Error::Internal(format!("csv: {e}")))?;
        writer
            .write_record(["Timeslice", "Metric", "Unit", "Stat", "Value"])
            .map_err(|e| velobench_core::Error::Internal(format!("csv: {e}")))?;
        for slice in slices {
            for summary in &slice.metrics {
                for (stat, value) in summary.stat_rows() {
                    writer
                        .write_record([
                            &slice.index.to_string(),
                            &summary.tag,
                            &summary.unit,
                            stat,
                            &format!("{value}"),
                        ])
                        .map_err(|e| velobench_core::Error::Internal(format!("csv: {e}")))?;
                }
            }
        }
        writer
            .flush()
            .map_err(|e| velobench_core::Error::Internal(format!("csv: {e}")))?;

        let json_path = self.dir.join("profile_export_velobench_timeslices.json");
        std::fs::write(&json_path, serde_json::to_vec_pretty(&slices)?)?;
        Ok((csv_path, json_path))
    }

    /// Write everything the run produced; returns the artifact paths.
    pub async fn write_all(
        &self,
        inputs: Option<&InputsFile>,
        results: &ProfileResults,
        cfg: &ProfileConfig,
    ) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        if let Some(inputs) = inputs {
            paths.push(self.write_inputs(inputs).await?);
        }
        paths.push(self.write_records_jsonl(results).await?);
        paths.push(self.write_aggregate_json(results, cfg).await?);
        paths.push(self.write_aggregate_csv(results)?);
        if let Some(slices) = &results.timeslices {
            let (csv_path, json_path) = self.write_timeslices(slices)?;
            paths.push(csv_path);
            paths.push(json_path);
        }
        info!(dir = %self.dir.display(), artifacts = paths.len(), "artifacts written");
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use velobench_aggregator::summarize;

    fn results() -> ProfileResults {
        ProfileResults {
            completed_requests: 2,
            error_requests: 1,
            records_in: 3,
            warmup_records: 0,
            total_output_tokens: 10,
            duration_secs: 2.0,
            benchmark_duration_rule: "first_profiling_request_start_to_last_profiling_record_end"
                .into(),
            request_throughput: 1.0,
            output_token_throughput: 5.0,
            goodput: None,
            goodput_request_count: None,
            metrics: vec![summarize("request_latency", "ms", &[10.0, 20.0]).unwrap()],
            error_summary: BTreeMap::from([("HTTPError".to_string(), 1)]),
            timeslices: None,
            records: Vec::new(),
        }
    }

    fn cfg(dir: &Path) -> ProfileConfig {
        let mut cfg = ProfileConfig::default();
        cfg.endpoint.model = "test-model".into();
        cfg.output.artifact_dir = dir.to_path_buf();
        cfg
    }

    #[tokio::test]
    async fn all_artifacts_land_in_the_run_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = cfg(tmp.path());
        let writer = ArtifactWriter::new(&cfg).unwrap();
        let paths = writer.write_all(None, &results(), &cfg).await.unwrap();
        assert_eq!(paths.len(), 3);
        for path in &paths {
            assert!(path.exists(), "{path:?} missing");
            assert!(path.starts_with(tmp.path().join("profile_test-model")));
        }
    }

    #[tokio::test]
    async fn aggregate_json_names_the_duration_rule() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = cfg(tmp.path());
        let writer = ArtifactWriter::new(&cfg).unwrap();
        let path = writer.write_aggregate_json(&results(), &cfg).await.unwrap();
        let parsed: serde_json::Value =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(
            parsed["results"]["benchmark_duration_rule"],
            "first_profiling_request_start_to_last_profiling_record_end"
        );
        assert_eq!(parsed["config"]["endpoint"]["model"], "test-model");
        assert_eq!(parsed["results"]["error_summary"]["HTTPError"], 1);
    }

    #[test]
    fn csv_has_one_row_per_metric_stat() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = cfg(tmp.path());
        let writer = ArtifactWriter::new(&cfg).unwrap();
        let path = writer.write_aggregate_csv(&results()).unwrap();
        let contents = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "Metric,Unit,Stat,Value");
        // 14 stats for the one record metric + 4 aggregate rows.
        assert_eq!(lines.len(), 1 + 14 + 4);
        assert!(contents.contains("request_latency,ms,p99,"));
    }
}
