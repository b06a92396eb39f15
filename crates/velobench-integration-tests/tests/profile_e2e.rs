//! End-to-end profiling runs against a mock OpenAI endpoint
//!
//! These tests drive the full pipeline: dataset → scheduler → workers →
//! record processors → aggregator → artifacts.

use tokio_util::sync::CancellationToken;
use velobench_controller::run_profile;
use velobench_core::types::RunPhase;
use velobench_integration_tests::{base_config, sse_chat_body};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mock_chat_endpoint(deltas: &[&str]) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_chat_body(deltas), "text/event-stream"),
        )
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn warmup_and_count_run_produces_artifacts() {
    let server = mock_chat_endpoint(&["the", " answer", " is", " forty", " two"]).await;
    let tmp = tempfile::tempdir().unwrap();

    let mut cfg = base_config(&server.uri(), tmp.path());
    cfg.load.concurrency = Some(1);
    cfg.load.request_count = Some(6);
    cfg.load.warmup_request_count = 2;
    cfg.output.slice_duration_secs = Some(0.5);

    let summary = run_profile(cfg, CancellationToken::new()).await.unwrap();
    let results = &summary.results;

    assert_eq!(summary.outcome.final_phase, RunPhase::Done);
    assert_eq!(results.completed_requests, 6);
    assert_eq!(results.warmup_records, 2);
    assert_eq!(results.error_requests, 0);
    // Credit conservation: every issued credit became exactly one record.
    assert_eq!(results.records_in, 8);

    // Warmup stays out of percentile statistics.
    let latency = results
        .metrics
        .iter()
        .find(|m| m.tag == "request_latency")
        .expect("request_latency summarized");
    assert_eq!(latency.count, 6);

    // Streaming metrics observed for every profiling record.
    let ttft = results
        .metrics
        .iter()
        .find(|m| m.tag == "time_to_first_token")
        .expect("time_to_first_token summarized");
    assert_eq!(ttft.count, 6);

    // Output-token conservation against the derived throughput.
    let sum_from_records: f64 = results
        .records
        .iter()
        .filter(|r| r.metadata.phase == velobench_core::types::CreditPhase::Profiling)
        .filter_map(|r| r.scalar("output_token_count"))
        .sum();
    assert_eq!(sum_from_records as u64, results.total_output_tokens);
    let reconstructed = results.output_token_throughput * results.duration_secs;
    assert!((reconstructed - results.total_output_tokens as f64).abs() <= 1.0);

    // Timing invariants on every record.
    for record in &results.records {
        assert!(record.metadata.end_ns >= record.metadata.start_ns);
        if let Some(ack) = record.metadata.ack_ns {
            assert!(record.metadata.start_ns <= ack);
            assert!(ack <= record.metadata.end_ns);
        }
    }

    // Timeslicing was enabled: every record's end falls inside its slice.
    let slices = results.timeslices.as_ref().expect("timeslices present");
    assert!(!slices.is_empty());
    for slice in slices {
        assert!(slice.start_ns < slice.end_ns);
    }

    // All artifacts on disk.
    let dir = tmp.path().join("profile_mock-model");
    for name in [
        "inputs.json",
        "profile_export.jsonl",
        "profile_export_velobench.json",
        "profile_export_velobench.csv",
        "profile_export_velobench_timeslices.csv",
        "profile_export_velobench_timeslices.json",
    ] {
        assert!(dir.join(name).exists(), "{name} missing");
    }

    let jsonl = std::fs::read_to_string(dir.join("profile_export.jsonl")).unwrap();
    assert_eq!(jsonl.lines().count(), 8);
}

#[tokio::test]
async fn cancellation_rate_100_cancels_every_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse_chat_body(&["slow"]), "text/event-stream")
                .set_delay(std::time::Duration::from_secs(5)),
        )
        .mount(&server)
        .await;
    let tmp = tempfile::tempdir().unwrap();

    let mut cfg = base_config(&server.uri(), tmp.path());
    cfg.load.concurrency = Some(4);
    cfg.load.request_count = Some(4);
    cfg.load.cancellation_rate_percent = 100.0;
    cfg.load.cancellation_delay_secs = 0.1;

    let summary = run_profile(cfg, CancellationToken::new()).await.unwrap();
    let results = &summary.results;

    assert_eq!(results.records_in, 4);
    assert_eq!(results.completed_requests, 0);
    assert_eq!(results.error_requests, 4);
    assert_eq!(results.error_summary["RequestCancellationError"], 4);

    for record in &results.records {
        assert!(record.metadata.was_cancelled);
        let error = record.error.as_ref().expect("cancelled record has error");
        assert_eq!(error.code, Some(499));
        assert_eq!(error.kind, "RequestCancellationError");
        let elapsed_ms = (record.metadata.end_ns - record.metadata.start_ns) / 1_000_000;
        // 100ms cancel deadline, generous tolerance for CI schedulers.
        assert!((60..=1_000).contains(&elapsed_ms), "elapsed {elapsed_ms}ms");
    }
}

#[tokio::test]
async fn multi_turn_requests_carry_prior_assistant_replies() {
    let server = mock_chat_endpoint(&["Hello", " world"]).await;
    let tmp = tempfile::tempdir().unwrap();

    let dataset = tmp.path().join("conversations.jsonl");
    std::fs::write(
        &dataset,
        r#"{"session_id": "s1", "turns": [{"text": "turn one"}, {"text": "turn two"}, {"text": "turn three"}]}"#,
    )
    .unwrap();

    let mut cfg = base_config(&server.uri(), tmp.path());
    cfg.input.input_file = Some(dataset);
    cfg.input.dataset_kind = Some(velobench_core::config::DatasetKind::MultiTurn);
    cfg.load.concurrency = Some(1);
    cfg.load.request_count = Some(3);

    let summary = run_profile(cfg, CancellationToken::new()).await.unwrap();
    assert_eq!(summary.results.completed_requests, 3);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);

    let message_texts: Vec<Vec<(String, String)>> = requests
        .iter()
        .map(|request| {
            let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
            body["messages"]
                .as_array()
                .unwrap()
                .iter()
                .map(|m| {
                    (
                        m["role"].as_str().unwrap().to_string(),
                        m["content"].as_str().unwrap().to_string(),
                    )
                })
                .collect()
        })
        .collect();

    // Turn 0: just the user turn.
    assert_eq!(message_texts[0], vec![("user".into(), "turn one".into())]);
    // Turn 1: prior exchange verbatim, then the new user turn.
    assert_eq!(
        message_texts[1],
        vec![
            ("user".into(), "turn one".into()),
            ("assistant".into(), "Hello world".into()),
            ("user".into(), "turn two".into()),
        ]
    );
    // Turn 2: both prior exchanges verbatim.
    assert_eq!(
        message_texts[2],
        vec![
            ("user".into(), "turn one".into()),
            ("assistant".into(), "Hello world".into()),
            ("user".into(), "turn two".into()),
            ("assistant".into(), "Hello world".into()),
            ("user".into(), "turn three".into()),
        ]
    );

    // The same correlation id spans the whole session.
    let correlation_ids: std::collections::HashSet<&str> = requests
        .iter()
        .map(|r| r.headers.get("x-correlation-id").unwrap().to_str().unwrap())
        .collect();
    assert_eq!(correlation_ids.len(), 1);
}

#[tokio::test]
async fn http_errors_are_recorded_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(3)
        .mount(&server)
        .await;
    let tmp = tempfile::tempdir().unwrap();

    let mut cfg = base_config(&server.uri(), tmp.path());
    cfg.load.concurrency = Some(1);
    cfg.load.request_count = Some(3);

    let summary = run_profile(cfg, CancellationToken::new()).await.unwrap();
    let results = &summary.results;

    assert_eq!(results.records_in, 3);
    assert_eq!(results.completed_requests, 0);
    assert_eq!(results.error_requests, 3);
    assert_eq!(results.error_summary["HTTPError"], 3);
    for record in &results.records {
        let error = record.error.as_ref().unwrap();
        assert_eq!(error.code, Some(503));
        // Metadata-only record with the input length preserved.
        assert!(record.scalar("error_isl").is_some());
        assert!(record.scalar("request_latency").is_none());
    }
}

#[tokio::test]
async fn inputs_artifact_is_deterministic_across_runs() {
    let server = mock_chat_endpoint(&["ok"]).await;
    let run = |artifact_dir: std::path::PathBuf, uri: String| async move {
        let mut cfg = base_config(&uri, &artifact_dir);
        cfg.input.random_seed = 42;
        cfg.load.concurrency = Some(2);
        cfg.load.request_count = Some(4);
        run_profile(cfg, CancellationToken::new()).await.unwrap();
        std::fs::read(artifact_dir.join("profile_mock-model").join("inputs.json")).unwrap()
    };

    let tmp_a = tempfile::tempdir().unwrap();
    let tmp_b = tempfile::tempdir().unwrap();
    let a = run(tmp_a.path().to_path_buf(), server.uri()).await;
    let b = run(tmp_b.path().to_path_buf(), server.uri()).await;
    assert_eq!(a, b, "inputs.json differs between identically-seeded runs");
}

#[tokio::test]
async fn concurrency_gate_serializes_sessions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse_chat_body(&["ok"]), "text/event-stream")
                .set_delay(std::time::Duration::from_millis(100)),
        )
        .mount(&server)
        .await;
    let tmp = tempfile::tempdir().unwrap();

    let mut cfg = base_config(&server.uri(), tmp.path());
    cfg.load.concurrency = Some(2);
    cfg.load.request_count = Some(6);

    let started = std::time::Instant::now();
    let summary = run_profile(cfg, CancellationToken::new()).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(summary.results.completed_requests, 6);
    // Six 100ms requests at concurrency 2 need at least three waves.
    assert!(
        elapsed >= std::time::Duration::from_millis(250),
        "elapsed {elapsed:?} implies the concurrency bound was exceeded"
    );
}
