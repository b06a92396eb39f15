//! Tokenizer contract and the deterministic reference implementation
//!
//! Real tokenizers plug in behind the [`Tokenizer`] trait. The bundled
//! [`CorpusTokenizer`] is word-level over a fixed vocabulary: enough to
//! synthesize prompts to a target token count and to count output tokens,
//! fully deterministic, no model files needed.

use std::collections::HashMap;
use std::sync::Arc;

pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Vec<u32>;
    fn decode(&self, ids: &[u32]) -> String;
    fn count(&self, text: &str) -> usize {
        self.encode(text).len()
    }
}

/// Reference corpus used for synthetic prompt generation.
const REFERENCE_CORPUS: &[&str] = &[
    "time", "year", "people", "way", "day", "man", "thing", "woman", "life", "child",
    "world", "school", "state", "family", "student", "group", "country", "problem", "hand", "part",
    "place", "case", "week", "company", "system", "program", "question", "work", "government", "number",
    "night", "point", "home", "water", "room", "mother", "area", "money", "story", "fact",
    "month", "lot", "right", "study", "book", "eye", "job", "word", "business", "issue",
    "side", "kind", "head", "house", "service", "friend", "father", "power", "hour", "game",
    "line", "end", "member", "law", "car", "city", "community", "name", "president", "team",
    "minute", "idea", "kid", "body", "information", "back", "parent", "face", "others", "level",
    "office", "door", "health", "person", "art", "war", "history", "party", "result", "change",
    "morning", "reason", "research", "girl", "guy", "moment", "air", "teacher", "force", "education",
    "foot", "boy", "age", "policy", "process", "music", "market", "sense", "nation", "plan",
    "college", "interest", "death", "experience", "effect", "use", "class", "control", "care", "field",
    "development", "role", "effort", "rate", "heart", "drug", "show", "leader", "light", "voice",
];

/// Word-level tokenizer over the reference corpus.
///
/// Unknown words map deterministically into the vocabulary, so encode and
/// count are stable for arbitrary server output while decode of generated
/// ids round-trips exactly.
pub struct CorpusTokenizer {
    vocab: Vec<String>,
    index: HashMap<String, u32>,
}

impl CorpusTokenizer {
    pub fn reference() -> Self {
        Self::from_words(REFERENCE_CORPUS.iter().map(|w| w.to_string()))
    }

    pub fn from_words(words: impl IntoIterator<Item = String>) -> Self {
        let vocab: Vec<String> = words.into_iter().collect();
        let index = vocab
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i as u32))
            .collect();
        Self { vocab, index }
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn token_text(&self, id: u32) -> &str {
        &self.vocab[id as usize % self.vocab.len()]
    }

    fn fold_unknown(&self, word: &str) -> u32 {
        // FNV-1a keeps unknown-word mapping stable across runs.
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in word.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        (hash % self.vocab.len() as u64) as u32
    }
}

impl Tokenizer for CorpusTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        text.split_whitespace()
            .map(|word| {
                self.index
                    .get(word)
                    .copied()
                    .unwrap_or_else(|| self.fold_unknown(word))
            })
            .collect()
    }

    fn decode(&self, ids: &[u32]) -> String {
        ids.iter()
            .map(|&id| self.token_text(id))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

pub type SharedTokenizer = Arc<dyn Tokenizer>;
