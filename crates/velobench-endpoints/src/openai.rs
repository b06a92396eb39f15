//! OpenAI chat and completions codecs

use crate::codec::{
    map_finish_reason, role_name, FormatContext, FormattedRequest, RequestCodec, StreamDelta,
};
use serde::Deserialize;
use serde_json::json;
use velobench_core::types::{ParsedResponse, TokenUsage};
use velobench_core::{Error, Result};

#[derive(Debug, Deserialize)]
struct UsageBody {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<UsageBody> for TokenUsage {
    fn from(usage: UsageBody) -> Self {
        TokenUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatMessageBody {
    content: Option<String>,
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageBody,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<UsageBody>,
}

#[derive(Debug, Deserialize)]
struct ChatDeltaBody {
    content: Option<String>,
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChoice {
    delta: ChatDeltaBody,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    #[serde(default)]
    choices: Vec<ChatStreamChoice>,
    usage: Option<UsageBody>,
}

/// `/v1/chat/completions`
pub struct ChatCodec;

impl ChatCodec {
    /// Plain text for text-only turns; the content-parts array when the
    /// turn carries media attachments.
    fn turn_content(turn: &velobench_core::types::Turn) -> serde_json::Value {
        use velobench_core::types::MediaKind;
        if turn.media.is_empty() {
            return json!(turn.text);
        }
        let mut parts = vec![json!({"type": "text", "text": turn.text})];
        for media in &turn.media {
            parts.push(match media.kind {
                MediaKind::Image => json!({"type": "image_url", "image_url": {"url": media.url}}),
                MediaKind::Audio => json!({"type": "input_audio", "input_audio": {"url": media.url}}),
                MediaKind::Video => json!({"type": "video_url", "video_url": {"url": media.url}}),
            });
        }
        json!(parts)
    }
}

impl RequestCodec for ChatCodec {
    fn name(&self) -> &'static str {
        "openai-chat"
    }

    fn path(&self) -> &'static str {
        "/v1/chat/completions"
    }

    fn format_request(&self, ctx: &FormatContext<'_>) -> Result<FormattedRequest> {
        let mut messages: Vec<serde_json::Value> = ctx
            .history
            .iter()
            .map(|entry| json!({"role": role_name(entry.role), "content": entry.text}))
            .collect();
        messages.push(json!({
            "role": role_name(ctx.turn.role),
            "content": Self::turn_content(ctx.turn),
        }));

        let model = ctx.turn.model.as_deref().unwrap_or(ctx.model);
        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": ctx.streaming,
        });
        if let Some(max_tokens) = ctx.turn.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(min_tokens) = ctx.turn.min_tokens {
            body["min_tokens"] = json!(min_tokens);
        }
        if ctx.turn.ignore_eos {
            body["ignore_eos"] = json!(true);
        }
        if ctx.streaming {
            body["stream_options"] = json!({"include_usage": true});
        }

        Ok(FormattedRequest {
            path: self.path(),
            body,
            streaming: ctx.streaming,
        })
    }

    fn parse_response(&self, body: &[u8]) -> Result<ParsedResponse> {
        let response: ChatCompletionResponse = serde_json::from_slice(body)
            .map_err(|e| Error::ResponseParse(format!("chat completion: {e}")))?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::ResponseParse("chat completion has no choices".into()))?;
        Ok(ParsedResponse {
            final_text: choice.message.content,
            reasoning_text: choice.message.reasoning_content,
            chunks: Vec::new(),
            finish_reason: choice.finish_reason.as_deref().map(map_finish_reason),
            usage: response.usage.map(TokenUsage::from),
        })
    }

    fn parse_stream_event(&self, data: &str) -> Result<Option<StreamDelta>> {
        let chunk: ChatStreamChunk = serde_json::from_str(data)
            .map_err(|e| Error::ResponseParse(format!("chat stream event: {e}")))?;

        let mut delta = StreamDelta {
            usage: chunk.usage.map(TokenUsage::from),
            ..Default::default()
        };
        if let Some(choice) = chunk.choices.into_iter().next() {
            delta.delta_text = choice.delta.content;
            delta.delta_reasoning = choice.delta.reasoning_content;
            delta.finish_reason = choice.finish_reason.as_deref().map(map_finish_reason);
        }
        Ok(if delta.is_empty() { None } else { Some(delta) })
    }
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    text: Option<String>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    usage: Option<UsageBody>,
}

/// `/v1/completions`
pub struct CompletionsCodec;

impl CompletionsCodec {
    /// Completions has no message roles; history folds into the prompt.
    fn compose_prompt(ctx: &FormatContext<'_>) -> String {
        if ctx.history.is_empty() {
            return ctx.turn.text.clone();
        }
        let mut prompt = String::new();
        for entry in ctx.history {
            prompt.push_str(&entry.text);
            prompt.push_str("\n\n");
        }
        prompt.push_str(&ctx.turn.text);
        prompt
    }
}

impl RequestCodec for CompletionsCodec {
    fn name(&self) -> &'static str {
        "openai-completions"
    }

    fn path(&self) -> &'static str {
        "/v1/completions"
    }

    fn format_request(&self, ctx: &FormatContext<'_>) -> Result<FormattedRequest> {
        let model = ctx.turn.model.as_deref().unwrap_or(ctx.model);
        let mut body = json!({
            "model": model,
            "prompt": Self::compose_prompt(ctx),
            "stream": ctx.streaming,
        });
        if let Some(max_tokens) = ctx.turn.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(min_tokens) = ctx.turn.min_tokens {
            body["min_tokens"] = json!(min_tokens);
        }
        if ctx.turn.ignore_eos {
            body["ignore_eos"] = json!(true);
        }
        if ctx.streaming {
            body["stream_options"] = json!({"include_usage": true});
        }
        Ok(FormattedRequest {
            path: self.path(),
            body,
            streaming: ctx.streaming,
        })
    }

    fn parse_response(&self, body: &[u8]) -> Result<ParsedResponse> {
        let response: CompletionResponse = serde_json::from_slice(body)
            .map_err(|e| Error::ResponseParse(format!("completion: {e}")))?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::ResponseParse("completion has no choices".into()))?;
        Ok(ParsedResponse {
            final_text: choice.text,
            reasoning_text: None,
            chunks: Vec::new(),
            finish_reason: choice.finish_reason.as_deref().map(map_finish_reason),
            usage: response.usage.map(TokenUsage::from),
        })
    }

    fn parse_stream_event(&self, data: &str) -> Result<Option<StreamDelta>> {
        let chunk: CompletionResponse = serde_json::from_str(data)
            .map_err(|e| Error::ResponseParse(format!("completion stream event: {e}")))?;
        let mut delta = StreamDelta {
            usage: chunk.usage.map(TokenUsage::from),
            ..Default::default()
        };
        if let Some(choice) = chunk.choices.into_iter().next() {
            delta.delta_text = choice.text;
            delta.finish_reason = choice.finish_reason.as_deref().map(map_finish_reason);
        }
        Ok(if delta.is_empty() { None } else { Some(delta) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::HistoryEntry;
    use velobench_core::types::{FinishReason, Role, Turn};

    fn turn() -> Turn {
        let mut turn = Turn::user("What is the capital of France?");
        turn.max_tokens = Some(64);
        turn.ignore_eos = true;
        turn
    }

    #[test]
    fn chat_request_includes_history_verbatim() {
        let turn = turn();
        let history = vec![
            HistoryEntry {
                role: Role::User,
                text: "Hi".into(),
            },
            HistoryEntry {
                role: Role::Assistant,
                text: "Hello! How can I help?".into(),
            },
        ];
        let ctx = FormatContext {
            model: "test-model",
            turn: &turn,
            history: &history,
            streaming: true,
        };
        let formatted = ChatCodec.format_request(&ctx).unwrap();
        assert_eq!(formatted.path, "/v1/chat/completions");
        let messages = formatted.body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"], "Hello! How can I help?");
        assert_eq!(formatted.body["stream"], true);
        assert_eq!(formatted.body["max_tokens"], 64);
        assert_eq!(formatted.body["ignore_eos"], true);
        assert_eq!(formatted.body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn chat_stream_event_parses_content_and_finish() {
        let delta = ChatCodec
            .parse_stream_event(r#"{"choices":[{"delta":{"content":"Par"},"finish_reason":null}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(delta.delta_text.as_deref(), Some("Par"));
        assert!(delta.finish_reason.is_none());

        let end = ChatCodec
            .parse_stream_event(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(end.finish_reason, Some(FinishReason::Stop));

        let usage = ChatCodec
            .parse_stream_event(
                r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#,
            )
            .unwrap()
            .unwrap();
        assert_eq!(usage.usage.unwrap().completion_tokens, 5);
    }

    #[test]
    fn chat_stream_event_with_reasoning_delta() {
        let delta = ChatCodec
            .parse_stream_event(r#"{"choices":[{"delta":{"reasoning_content":"hmm"},"finish_reason":null}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(delta.delta_reasoning.as_deref(), Some("hmm"));
        assert!(delta.delta_text.is_none());
    }

    #[test]
    fn chat_media_turns_use_content_parts() {
        use velobench_core::types::{MediaKind, MediaRef};
        let mut turn = turn();
        turn.media.push(MediaRef {
            kind: MediaKind::Image,
            url: "http://example/cat.png".into(),
        });
        let ctx = FormatContext {
            model: "m",
            turn: &turn,
            history: &[],
            streaming: false,
        };
        let formatted = ChatCodec.format_request(&ctx).unwrap();
        let content = &formatted.body["messages"][0]["content"];
        assert!(content.is_array());
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["image_url"]["url"], "http://example/cat.png");
    }

    #[test]
    fn chat_response_parses() {
        let body = r#"{
            "choices": [{"message": {"content": "Paris"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 8, "completion_tokens": 1, "total_tokens": 9}
        }"#;
        let parsed = ChatCodec.parse_response(body.as_bytes()).unwrap();
        assert_eq!(parsed.final_text.as_deref(), Some("Paris"));
        assert_eq!(parsed.finish_reason, Some(FinishReason::Stop));
        assert_eq!(parsed.usage.unwrap().prompt_tokens, 8);
    }

    #[test]
    fn malformed_stream_event_is_a_parse_error() {
        assert!(ChatCodec.parse_stream_event("{not json").is_err());
    }

    #[test]
    fn completions_folds_history_into_prompt() {
        let turn = turn();
        let history = vec![HistoryEntry {
            role: Role::Assistant,
            text: "previous answer".into(),
        }];
        let ctx = FormatContext {
            model: "m",
            turn: &turn,
            history: &history,
            streaming: false,
        };
        let formatted = CompletionsCodec.format_request(&ctx).unwrap();
        let prompt = formatted.body["prompt"].as_str().unwrap();
        assert!(prompt.starts_with("previous answer\n\n"));
        assert!(prompt.ends_with("What is the capital of France?"));
    }

    #[test]
    fn completions_stream_event_parses_text() {
        let delta = CompletionsCodec
            .parse_stream_event(r#"{"choices":[{"text":" Paris","finish_reason":null}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(delta.delta_text.as_deref(), Some(" Paris"));
    }
}
