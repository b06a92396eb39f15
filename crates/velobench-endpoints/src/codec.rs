//! The request codec contract

use std::sync::Arc;
use velobench_core::config::EndpointKind;
use velobench_core::types::{FinishReason, ParsedResponse, Role, TokenUsage, Turn};
use velobench_core::Result;

/// One prior exchange entry in a conversation's history.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub role: Role,
    pub text: String,
}

/// Everything a codec needs to compose one request.
pub struct FormatContext<'a> {
    pub model: &'a str,
    pub turn: &'a Turn,
    /// Prior turns of this conversation, user and assistant alternating,
    /// oldest first.
    pub history: &'a [HistoryEntry],
    pub streaming: bool,
}

/// A composed wire request, ready for the HTTP client.
#[derive(Debug, Clone, PartialEq)]
pub struct FormattedRequest {
    pub path: &'static str,
    pub body: serde_json::Value,
    pub streaming: bool,
}

/// One parsed SSE event's worth of response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamDelta {
    pub delta_text: Option<String>,
    pub delta_reasoning: Option<String>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<TokenUsage>,
}

impl StreamDelta {
    pub fn is_empty(&self) -> bool {
        self.delta_text.is_none()
            && self.delta_reasoning.is_none()
            && self.finish_reason.is_none()
            && self.usage.is_none()
    }
}

/// Endpoint request/response codec.
///
/// Implementations are stateless; one instance serves every worker.
pub trait RequestCodec: Send + Sync {
    fn name(&self) -> &'static str;

    fn path(&self) -> &'static str;

    fn supports_streaming(&self) -> bool {
        true
    }

    fn format_request(&self, ctx: &FormatContext<'_>) -> Result<FormattedRequest>;

    /// Parse a complete (non-streaming) response body.
    fn parse_response(&self, body: &[u8]) -> Result<ParsedResponse>;

    /// Parse one SSE event's `data` payload. `None` means the event carried
    /// nothing of interest (the `[DONE]` sentinel is handled by the caller).
    fn parse_stream_event(&self, data: &str) -> Result<Option<StreamDelta>>;
}

/// Built-in codec for an endpoint kind.
pub fn codec_for(kind: EndpointKind) -> Arc<dyn RequestCodec> {
    match kind {
        EndpointKind::Chat => Arc::new(crate::openai::ChatCodec),
        EndpointKind::Completions => Arc::new(crate::openai::CompletionsCodec),
        EndpointKind::Embeddings => Arc::new(crate::embeddings::EmbeddingsCodec),
        EndpointKind::Rankings => Arc::new(crate::rankings::RankingsCodec),
    }
}

pub(crate) fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "content_filter" => FinishReason::ContentFilter,
        "tool_calls" => FinishReason::ToolCalls,
        _ => FinishReason::Other,
    }
}

pub(crate) fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}
