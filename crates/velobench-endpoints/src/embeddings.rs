//! OpenAI embeddings codec

use crate::codec::{FormatContext, FormattedRequest, RequestCodec, StreamDelta};
use serde::Deserialize;
use serde_json::json;
use velobench_core::types::{ParsedResponse, TokenUsage};
use velobench_core::{Error, Result};

#[derive(Debug, Deserialize)]
struct EmbeddingsUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    #[serde(default)]
    data: Vec<serde_json::Value>,
    usage: Option<EmbeddingsUsage>,
}

/// `/v1/embeddings` — request/response only, no streaming.
pub struct EmbeddingsCodec;

impl RequestCodec for EmbeddingsCodec {
    fn name(&self) -> &'static str {
        "openai-embeddings"
    }

    fn path(&self) -> &'static str {
        "/v1/embeddings"
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    fn format_request(&self, ctx: &FormatContext<'_>) -> Result<FormattedRequest> {
        let model = ctx.turn.model.as_deref().unwrap_or(ctx.model);
        Ok(FormattedRequest {
            path: self.path(),
            body: json!({
                "model": model,
                "input": [ctx.turn.text],
                "encoding_format": "float",
            }),
            streaming: false,
        })
    }

    fn parse_response(&self, body: &[u8]) -> Result<ParsedResponse> {
        let response: EmbeddingsResponse = serde_json::from_slice(body)
            .map_err(|e| Error::ResponseParse(format!("embeddings: {e}")))?;
        if response.data.is_empty() {
            return Err(Error::ResponseParse("embeddings response has no data".into()));
        }
        Ok(ParsedResponse {
            usage: response.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: 0,
                total_tokens: u.total_tokens,
            }),
            ..Default::default()
        })
    }

    fn parse_stream_event(&self, _data: &str) -> Result<Option<StreamDelta>> {
        Err(Error::ResponseParse(
            "embeddings endpoint does not stream".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use velobench_core::types::Turn;

    #[test]
    fn formats_single_input() {
        let turn = Turn::user("embed me");
        let ctx = FormatContext {
            model: "embed-model",
            turn: &turn,
            history: &[],
            streaming: false,
        };
        let formatted = EmbeddingsCodec.format_request(&ctx).unwrap();
        assert_eq!(formatted.path, "/v1/embeddings");
        assert_eq!(formatted.body["input"][0], "embed me");
        assert!(!formatted.streaming);
    }

    #[test]
    fn parses_usage() {
        let body = r#"{"data":[{"embedding":[0.1,0.2]}],"usage":{"prompt_tokens":2,"total_tokens":2}}"#;
        let parsed = EmbeddingsCodec.parse_response(body.as_bytes()).unwrap();
        assert_eq!(parsed.usage.unwrap().prompt_tokens, 2);
        assert!(parsed.final_text.is_none());
    }

    #[test]
    fn empty_data_is_a_parse_error() {
        let body = r#"{"data":[],"usage":{"prompt_tokens":0,"total_tokens":0}}"#;
        assert!(EmbeddingsCodec.parse_response(body.as_bytes()).is_err());
    }
}
