//! Benchmark data model
//!
//! Entities live for one run: conversations are frozen at dataset
//! finalization, credits flow scheduler → worker, records flow worker →
//! processor → aggregator. Nothing here persists across runs.

use crate::error::ErrorDetails;
use serde::{Deserialize, Serialize};

pub type ConversationId = String;
pub type CreditId = u64;
pub type WorkerId = usize;

/// Which measurement bucket a credit (and its record) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditPhase {
    Warmup,
    Profiling,
}

/// Run lifecycle phase driven by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Init,
    Ready,
    Warmup,
    Profiling,
    Cooldown,
    Finalizing,
    Done,
    Aborted,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Aborted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
}

/// Reference to an out-of-band media payload attached to a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub url: String,
}

/// One request within a conversation. Content is frozen at dataset
/// generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    /// Pre-tokenized prompt, when the dataset was generated in token space.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_ids: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_tokens: Option<u32>,
    #[serde(default)]
    pub ignore_eos: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Delay before the *next* turn of the same conversation is sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_after_ms: Option<u64>,
    /// Input sequence length declared by a trace, overriding tokenizer
    /// counting for this turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_length: Option<u32>,
    /// 512-token-block prefix-reuse identifiers from trace datasets.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hash_ids: Vec<u64>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            input_ids: None,
            media: Vec::new(),
            max_tokens: None,
            min_tokens: None,
            ignore_eos: false,
            model: None,
            delay_after_ms: None,
            input_length: None,
            hash_ids: Vec::new(),
        }
    }
}

/// A session of one or many turns. Immutable after dataset finalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub turns: Vec<Turn>,
    /// Wall-clock emission offset for fixed-schedule (trace replay) runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u64>,
}

impl Conversation {
    pub fn single_turn(id: impl Into<ConversationId>, turn: Turn) -> Self {
        Self {
            id: id.into(),
            turns: vec![turn],
            timestamp_ms: None,
        }
    }
}

/// Permission to send exactly one request attempt.
///
/// Owned by the scheduler until published; the consuming worker owns it
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credit {
    pub credit_id: CreditId,
    pub conversation_id: ConversationId,
    pub turn_index: usize,
    pub phase: CreditPhase,
    /// Session ordinal assigned when the conversation was scheduled.
    pub session_num: u64,
    /// Cooperative cancel deadline, measured from request start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_after_ns: Option<u64>,
    /// When the schedule intended this credit to fire (rate/fixed modes).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_ns: Option<u64>,
    pub issued_ns: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One streamed delta, stamped at receive time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseChunk {
    pub received_ns: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_reasoning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

impl ResponseChunk {
    /// A chunk counts for first-token timing once it carries any delta.
    pub fn has_content(&self) -> bool {
        self.delta_text.as_deref().is_some_and(|t| !t.is_empty())
            || self.delta_reasoning.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn has_output_content(&self) -> bool {
        self.delta_text.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Normalized response shape shared by every endpoint codec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_text: Option<String>,
    /// Receive-ordered stream chunks; empty for non-streaming responses.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunks: Vec<ResponseChunk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl ParsedResponse {
    /// Concatenated output text across deltas, falling back to the final
    /// body for non-streaming responses.
    pub fn output_text(&self) -> String {
        if self.chunks.is_empty() {
            return self.final_text.clone().unwrap_or_default();
        }
        self.chunks
            .iter()
            .filter_map(|c| c.delta_text.as_deref())
            .collect()
    }

    pub fn reasoning_output_text(&self) -> String {
        if self.chunks.is_empty() {
            return self.reasoning_text.clone().unwrap_or_default();
        }
        self.chunks
            .iter()
            .filter_map(|c| c.delta_reasoning.as_deref())
            .collect()
    }
}

/// A worker's timing snapshot of one request attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRequestRecord {
    pub x_request_id: String,
    /// Stable per conversation, shared by every turn of the session.
    pub x_correlation_id: String,
    pub conversation_id: ConversationId,
    pub turn_index: usize,
    pub session_num: u64,
    pub worker_id: WorkerId,
    pub credit_id: CreditId,
    pub phase: CreditPhase,
    /// True when this attempt was the conversation's last turn, so the
    /// scheduler can release the session's concurrency slot.
    pub final_turn: bool,
    pub start_ns: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack_ns: Option<u64>,
    pub end_ns: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Composed prompt text this attempt sent, for input-length counting.
    pub input_text: String,
    /// Trace-declared input length, when the dataset provides one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_length_hint: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ParsedResponse>,
    pub was_cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation_time_ns: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

impl RawRequestRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.response.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: Option<&str>, reasoning: Option<&str>, at: u64) -> ResponseChunk {
        ResponseChunk {
            received_ns: at,
            delta_text: text.map(String::from),
            delta_reasoning: reasoning.map(String::from),
            finish_reason: None,
        }
    }

    #[test]
    fn output_text_concatenates_deltas_in_order() {
        let response = ParsedResponse {
            chunks: vec![
                chunk(Some("Hello"), None, 1),
                chunk(None, Some("thinking"), 2),
                chunk(Some(", world"), None, 3),
            ],
            ..Default::default()
        };
        assert_eq!(response.output_text(), "Hello, world");
        assert_eq!(response.reasoning_output_text(), "thinking");
    }

    #[test]
    fn empty_delta_does_not_count_as_content() {
        assert!(!chunk(Some(""), None, 1).has_content());
        assert!(chunk(None, Some("r"), 1).has_content());
        assert!(!chunk(None, Some("r"), 1).has_output_content());
    }

    #[test]
    fn credit_round_trips_through_json() {
        let credit = Credit {
            credit_id: 7,
            conversation_id: "conv-1".into(),
            turn_index: 0,
            phase: CreditPhase::Profiling,
            session_num: 3,
            cancel_after_ns: Some(100_000_000),
            scheduled_ns: None,
            issued_ns: 42,
        };
        let json = serde_json::to_string(&credit).unwrap();
        let back: Credit = serde_json::from_str(&json).unwrap();
        assert_eq!(back, credit);
    }
}
