//! Trace-replay scheduling against a mock endpoint

use tokio_util::sync::CancellationToken;
use velobench_controller::run_profile;
use velobench_core::config::DatasetKind;
use velobench_integration_tests::{base_config, sse_chat_body};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mock_chat_endpoint() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_chat_body(&["ok"]), "text/event-stream"),
        )
        .mount(&server)
        .await;
    server
}

fn trace_file(dir: &std::path::Path, timestamps: &[u64]) -> std::path::PathBuf {
    let path = dir.join("trace.jsonl");
    let lines: Vec<String> = timestamps
        .iter()
        .map(|ts| {
            format!(r#"{{"timestamp": {ts}, "text_input": "hi there", "output_length": 3}}"#)
        })
        .collect();
    std::fs::write(&path, lines.join("\n")).unwrap();
    path
}

#[tokio::test]
async fn replay_honors_trace_offsets() {
    let server = mock_chat_endpoint().await;
    let tmp = tempfile::tempdir().unwrap();

    // Auto-offset subtracts the first timestamp, so issue times should land
    // near 0 / 400 / 800 ms into the run.
    let mut cfg = base_config(&server.uri(), tmp.path());
    cfg.input.input_file = Some(trace_file(tmp.path(), &[10_000, 10_400, 10_800]));
    cfg.input.dataset_kind = Some(DatasetKind::MooncakeTrace);
    cfg.input.fixed_schedule = true;
    cfg.input.fixed_schedule_auto_offset = true;

    let summary = run_profile(cfg, CancellationToken::new()).await.unwrap();
    let results = &summary.results;
    assert_eq!(results.completed_requests, 3);

    let mut starts: Vec<u64> = results.records.iter().map(|r| r.metadata.start_ns).collect();
    starts.sort_unstable();
    let offsets_ms: Vec<u64> = starts
        .iter()
        .map(|s| (s - starts[0]) / 1_000_000)
        .collect();
    assert_eq!(offsets_ms[0], 0);
    assert!((320..=620).contains(&offsets_ms[1]), "second at {}ms", offsets_ms[1]);
    assert!((720..=1100).contains(&offsets_ms[2]), "third at {}ms", offsets_ms[2]);
}

#[tokio::test]
async fn end_offset_bounds_the_replayed_interval() {
    let server = mock_chat_endpoint().await;
    let tmp = tempfile::tempdir().unwrap();

    let mut cfg = base_config(&server.uri(), tmp.path());
    cfg.input.input_file = Some(trace_file(tmp.path(), &[0, 200, 400, 5_000]));
    cfg.input.dataset_kind = Some(DatasetKind::MooncakeTrace);
    cfg.input.fixed_schedule = true;
    cfg.input.fixed_schedule_end_offset_ms = Some(400);

    let summary = run_profile(cfg, CancellationToken::new()).await.unwrap();
    // The 5s entry lies beyond the end offset; the 400ms entry is inclusive.
    assert_eq!(summary.results.completed_requests, 3);
    assert_eq!(summary.results.records_in, 3);
}

#[tokio::test]
async fn trace_input_length_feeds_isl_metric() {
    let server = mock_chat_endpoint().await;
    let tmp = tempfile::tempdir().unwrap();

    let path = tmp.path().join("trace.jsonl");
    std::fs::write(
        &path,
        r#"{"timestamp": 0, "input_length": 64, "output_length": 3}"#,
    )
    .unwrap();

    let mut cfg = base_config(&server.uri(), tmp.path());
    cfg.input.input_file = Some(path);
    cfg.input.dataset_kind = Some(DatasetKind::MooncakeTrace);
    cfg.input.fixed_schedule = true;

    let summary = run_profile(cfg, CancellationToken::new()).await.unwrap();
    let results = &summary.results;
    assert_eq!(results.completed_requests, 1);
    // The trace's declared input length wins over tokenizer counting.
    assert_eq!(results.records[0].scalar("input_sequence_length"), Some(64.0));
}
