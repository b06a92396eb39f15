//! Shared helpers for end-to-end benchmark tests

use std::path::Path;
use velobench_core::ProfileConfig;

/// An SSE chat-completions body: one event per delta, a finish event, a
/// usage event, then the `[DONE]` terminator.
pub fn sse_chat_body(deltas: &[&str]) -> String {
    let mut body = String::new();
    for delta in deltas {
        body.push_str(&format!(
            "data: {{\"choices\":[{{\"delta\":{{\"content\":\"{delta}\"}},\"finish_reason\":null}}]}}\n\n"
        ));
    }
    body.push_str("data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n");
    let completion_tokens = deltas.len();
    body.push_str(&format!(
        "data: {{\"choices\":[],\"usage\":{{\"prompt_tokens\":8,\"completion_tokens\":{completion_tokens},\"total_tokens\":{}}}}}\n\n",
        8 + completion_tokens
    ));
    body.push_str("data: [DONE]\n\n");
    body
}

/// Baseline streaming-chat profile config against a mock endpoint: small
/// synthetic dataset, single-turn conversations, artifacts under a
/// caller-owned temp dir.
pub fn base_config(url: &str, artifact_dir: &Path) -> ProfileConfig {
    let mut cfg = ProfileConfig::default();
    cfg.endpoint.model = "mock-model".into();
    cfg.endpoint.url = url.to_string();
    cfg.endpoint.streaming = true;
    cfg.endpoint.request_timeout_secs = 10.0;
    cfg.conversation.num = 16;
    cfg.length.isl_mean = 8.0;
    cfg.length.osl_mean = 5.0;
    cfg.output.artifact_dir = artifact_dir.to_path_buf();
    cfg.service.heartbeat_interval_secs = 0.2;
    cfg.load.grace_period_secs = 5.0;
    cfg
}
