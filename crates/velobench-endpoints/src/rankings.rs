//! Rank endpoint codec

use crate::codec::{FormatContext, FormattedRequest, RequestCodec, StreamDelta};
use serde::Deserialize;
use serde_json::json;
use velobench_core::types::{ParsedResponse, TokenUsage};
use velobench_core::{Error, Result};

#[derive(Debug, Deserialize)]
struct RankingEntry {
    #[allow(dead_code)]
    index: usize,
    #[allow(dead_code)]
    logit: f64,
}

#[derive(Debug, Deserialize)]
struct RankingsResponse {
    #[serde(default)]
    rankings: Vec<RankingEntry>,
    usage: Option<RankingsUsage>,
}

#[derive(Debug, Deserialize)]
struct RankingsUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

/// `/v1/ranking` — the turn text is the query; prior history entries are
/// the passages to rank, falling back to the query itself when the
/// conversation has no history.
pub struct RankingsCodec;

impl RequestCodec for RankingsCodec {
    fn name(&self) -> &'static str {
        "rankings"
    }

    fn path(&self) -> &'static str {
        "/v1/ranking"
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    fn format_request(&self, ctx: &FormatContext<'_>) -> Result<FormattedRequest> {
        let model = ctx.turn.model.as_deref().unwrap_or(ctx.model);
        let passages: Vec<serde_json::Value> = if ctx.history.is_empty() {
            vec![json!({"text": ctx.turn.text})]
        } else {
            ctx.history
                .iter()
                .map(|entry| json!({"text": entry.text}))
                .collect()
        };
        Ok(FormattedRequest {
            path: self.path(),
            body: json!({
                "model": model,
                "query": {"text": ctx.turn.text},
                "passages": passages,
            }),
            streaming: false,
        })
    }

    fn parse_response(&self, body: &[u8]) -> Result<ParsedResponse> {
        let response: RankingsResponse = serde_json::from_slice(body)
            .map_err(|e| Error::ResponseParse(format!("rankings: {e}")))?;
        if response.rankings.is_empty() {
            return Err(Error::ResponseParse("rankings response is empty".into()));
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
        Err(Error::ResponseParse("rank endpoint does not stream".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::HistoryEntry;
    use velobench_core::types::{Role, Turn};

    #[test]
    fn query_and_passages_compose() {
        let turn = Turn::user("which passage answers this?");
        let history = vec![
            HistoryEntry {
                role: Role::User,
                text: "passage one".into(),
            },
            HistoryEntry {
                role: Role::Assistant,
                text: "passage two".into(),
            },
        ];
        let ctx = FormatContext {
            model: "rank-model",
            turn: &turn,
            history: &history,
            streaming: false,
        };
        let formatted = RankingsCodec.format_request(&ctx).unwrap();
        assert_eq!(formatted.body["query"]["text"], "which passage answers this?");
        assert_eq!(formatted.body["passages"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn parses_rankings() {
        let body = r#"{"rankings":[{"index":0,"logit":3.2}],"usage":{"prompt_tokens":12,"total_tokens":12}}"#;
        let parsed = RankingsCodec.parse_response(body.as_bytes()).unwrap();
        assert_eq!(parsed.usage.unwrap().prompt_tokens, 12);
    }
}
