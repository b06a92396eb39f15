//! JSONL dataset loaders
//!
//! One record per line; a malformed line fails the load with its line
//! number rather than being skipped silently.

use rand::Rng;
use serde::Deserialize;
use std::path::Path;
use velobench_core::config::DatasetKind;
use velobench_core::context::derive_rng;
use velobench_core::tokenizer::{CorpusTokenizer, Tokenizer};
use velobench_core::types::{Conversation, MediaKind, MediaRef, Role, Turn};
use velobench_core::{Error, Result};

#[derive(Debug, Deserialize)]
struct SingleTurnLine {
    text: Option<String>,
    texts: Option<Vec<String>>,
    image: Option<String>,
    audio: Option<String>,
    video: Option<String>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct MooncakeLine {
    timestamp: u64,
    input_length: Option<u32>,
    text_input: Option<String>,
    output_length: Option<u32>,
    hash_ids: Option<Vec<u64>>,
}

#[derive(Debug, Deserialize)]
struct MultiTurnTurnLine {
    text: Option<String>,
    texts: Option<Vec<String>>,
    role: Option<String>,
    max_tokens: Option<u32>,
    delay: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct MultiTurnLine {
    session_id: Option<String>,
    turns: Vec<MultiTurnTurnLine>,
}

/// Tokens per prefix-reuse block in trace datasets.
const HASH_BLOCK_TOKENS: usize = 512;

fn line_error(path: &Path, line_no: usize, err: impl std::fmt::Display) -> Error {
    Error::Dataset(format!("{}:{line_no}: {err}", path.display()))
}

fn joined_text(text: Option<String>, texts: Option<Vec<String>>) -> Option<String> {
    match (text, texts) {
        (Some(t), _) => Some(t),
        (None, Some(ts)) if !ts.is_empty() => Some(ts.join("\n")),
        _ => None,
    }
}

fn media_refs(image: Option<String>, audio: Option<String>, video: Option<String>) -> Vec<MediaRef> {
    let mut media = Vec::new();
    if let Some(url) = image {
        media.push(MediaRef { kind: MediaKind::Image, url });
    }
    if let Some(url) = audio {
        media.push(MediaRef { kind: MediaKind::Audio, url });
    }
    if let Some(url) = video {
        media.push(MediaRef { kind: MediaKind::Video, url });
    }
    media
}

/// Load a JSONL dataset file. `random_pool` shares the single-turn line
/// shape; the difference is purely sampling policy downstream.
pub fn load_file(
    path: &Path,
    kind: DatasetKind,
    tokenizer: &CorpusTokenizer,
    seed: u64,
) -> Result<Vec<Conversation>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Dataset(format!("cannot read {}: {e}", path.display())))?;

    let mut conversations = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let line_no = idx + 1;
        let conversation = match kind {
            DatasetKind::SingleTurn | DatasetKind::RandomPool => {
                let parsed: SingleTurnLine =
                    serde_json::from_str(line).map_err(|e| line_error(path, line_no, e))?;
                let text = joined_text(parsed.text, parsed.texts)
                    .ok_or_else(|| line_error(path, line_no, "missing text"))?;
                let mut turn = Turn::user(text);
                turn.media = media_refs(parsed.image, parsed.audio, parsed.video);
                turn.max_tokens = parsed.max_tokens;
                Conversation::single_turn(format!("line-{line_no:06}"), turn)
            }
            DatasetKind::MooncakeTrace => {
                let parsed: MooncakeLine =
                    serde_json::from_str(line).map_err(|e| line_error(path, line_no, e))?;
                mooncake_conversation(parsed, line_no, tokenizer, seed)
                    .map_err(|e| line_error(path, line_no, e))?
            }
            DatasetKind::MultiTurn => {
                let parsed: MultiTurnLine =
                    serde_json::from_str(line).map_err(|e| line_error(path, line_no, e))?;
                multi_turn_conversation(parsed, line_no)
                    .map_err(|e| line_error(path, line_no, e))?
            }
        };
        conversations.push(conversation);
    }
    Ok(conversations)
}

fn mooncake_conversation(
    line: MooncakeLine,
    line_no: usize,
    tokenizer: &CorpusTokenizer,
    seed: u64,
) -> Result<Conversation> {
    let hash_ids = line.hash_ids.unwrap_or_default();
    let text = match line.text_input {
        Some(text) => text,
        None => {
            let input_length = line
                .input_length
                .ok_or_else(|| Error::Dataset("needs text_input or input_length".into()))?
                as usize;
            synthesize_trace_prompt(input_length, &hash_ids, tokenizer, seed)
        }
    };

    let mut turn = Turn::user(text);
    turn.max_tokens = line.output_length;
    turn.min_tokens = line.output_length;
    turn.ignore_eos = line.output_length.is_some();
    turn.input_length = line.input_length;
    turn.hash_ids = hash_ids;

    Ok(Conversation {
        id: format!("trace-{line_no:06}"),
        turns: vec![turn],
        timestamp_ms: Some(line.timestamp),
    })
}

/// Trace prompts without text: prefix-reuse blocks derived per hash id, so
/// lines sharing hash ids share prompt prefixes, then unique fill up to the
/// declared input length.
fn synthesize_trace_prompt(
    input_length: usize,
    hash_ids: &[u64],
    tokenizer: &CorpusTokenizer,
    seed: u64,
) -> String {
    let vocab = tokenizer.vocab_size() as u32;
    let mut words: Vec<u32> = Vec::with_capacity(input_length);
    for hash_id in hash_ids {
        if words.len() >= input_length {
            break;
        }
        let mut block_rng = derive_rng(seed, &format!("dataset.trace.block.{hash_id}"));
        let take = HASH_BLOCK_TOKENS.min(input_length - words.len());
        words.extend((0..take).map(|_| block_rng.random_range(0..vocab)));
    }
    let mut fill_rng = derive_rng(seed, &format!("dataset.trace.fill.{input_length}.{}", words.len()));
    while words.len() < input_length {
        words.push(fill_rng.random_range(0..vocab));
    }
    tokenizer.decode(&words)
}

fn multi_turn_conversation(line: MultiTurnLine, line_no: usize) -> Result<Conversation> {
    if line.turns.is_empty() {
        return Err(Error::Dataset("conversation has no turns".into()));
    }
    let mut turns = Vec::with_capacity(line.turns.len());
    for (i, t) in line.turns.into_iter().enumerate() {
        let text = joined_text(t.text, t.texts)
            .ok_or_else(|| Error::Dataset(format!("turn {i} missing text")))?;
        let role = match t.role.as_deref() {
            None | Some("user") => Role::User,
            Some("assistant") => Role::Assistant,
            Some("system") => Role::System,
            Some(other) => return Err(Error::Dataset(format!("turn {i} has unknown role '{other}'"))),
        };
        let mut turn = Turn::user(text);
        turn.role = role;
        turn.max_tokens = t.max_tokens;
        turn.delay_after_ms = t.delay;
        turns.push(turn);
    }
    Ok(Conversation {
        id: line
            .session_id
            .unwrap_or_else(|| format!("line-{line_no:06}")),
        turns,
        timestamp_ms: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use velobench_core::tokenizer::Tokenizer;

    fn write_file(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    #[test]
    fn single_turn_lines_load() {
        let tok = CorpusTokenizer::reference();
        let file = write_file(&[
            r#"{"text": "hello there", "max_tokens": 32}"#,
            r#"{"texts": ["a", "b"], "image": "http://x/cat.png"}"#,
        ]);
        let pool = load_file(file.path(), DatasetKind::SingleTurn, &tok, 0).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool[0].turns[0].text, "hello there");
        assert_eq!(pool[0].turns[0].max_tokens, Some(32));
        assert_eq!(pool[1].turns[0].text, "a\nb");
        assert_eq!(pool[1].turns[0].media.len(), 1);
    }

    #[test]
    fn malformed_line_names_its_line_number() {
        let tok = CorpusTokenizer::reference();
        let file = write_file(&[r#"{"text": "ok"}"#, "not json"]);
        let err = load_file(file.path(), DatasetKind::SingleTurn, &tok, 0).unwrap_err();
        assert!(err.to_string().contains(":2:"), "{err}");
    }

    #[test]
    fn mooncake_trace_synthesizes_to_input_length() {
        let tok = CorpusTokenizer::reference();
        let file = write_file(&[
            r#"{"timestamp": 0, "input_length": 20, "output_length": 5}"#,
            r#"{"timestamp": 1000, "input_length": 600, "hash_ids": [1], "output_length": 5}"#,
            r#"{"timestamp": 2000, "input_length": 600, "hash_ids": [1]}"#,
        ]);
        let pool = load_file(file.path(), DatasetKind::MooncakeTrace, &tok, 7).unwrap();
        assert_eq!(pool[0].timestamp_ms, Some(0));
        assert_eq!(tok.count(&pool[0].turns[0].text), 20);
        assert_eq!(pool[0].turns[0].max_tokens, Some(5));
        // Lines sharing a hash id share their 512-token prefix block.
        let a: Vec<&str> = pool[1].turns[0].text.split_whitespace().take(512).collect();
        let b: Vec<&str> = pool[2].turns[0].text.split_whitespace().take(512).collect();
        assert_eq!(a, b);
        assert_eq!(tok.count(&pool[1].turns[0].text), 600);
    }

    #[test]
    fn multi_turn_lines_load_roles_and_delays() {
        let tok = CorpusTokenizer::reference();
        let file = write_file(&[
            r#"{"session_id": "s1", "turns": [{"text": "q1"}, {"text": "q2", "delay": 250}]}"#,
        ]);
        let pool = load_file(file.path(), DatasetKind::MultiTurn, &tok, 0).unwrap();
        assert_eq!(pool[0].id, "s1");
        assert_eq!(pool[0].turns.len(), 2);
        assert_eq!(pool[0].turns[1].delay_after_ms, Some(250));
    }
}
