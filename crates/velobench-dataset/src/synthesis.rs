//! Synthetic conversation generation
//!
//! Prompts are built by drawing token ids from the reference corpus until a
//! target input sequence length is reached, optionally behind a shared
//! prefix drawn from a fixed pool (to exercise KV-cache reuse). Lengths
//! come from per-concern sub-RNGs or from a user-supplied sequence
//! distribution; everything clamps to at least one token.

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use velobench_core::context::derive_rng;
use velobench_core::tokenizer::{CorpusTokenizer, Tokenizer};
use velobench_core::types::{Conversation, Role, Turn};
use velobench_core::{Error, ProfileConfig, Result};

/// Draw from a normal distribution, degenerating to the mean when the
/// stddev is zero or invalid.
pub(crate) fn sample_normal(rng: &mut StdRng, mean: f64, stddev: f64) -> f64 {
    if stddev <= 0.0 {
        return mean;
    }
    match Normal::new(mean, stddev) {
        Ok(dist) => dist.sample(rng),
        Err(_) => mean,
    }
}

/// One `(isl, osl, prob[, stddev])` bucket of a sequence distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceBucket {
    pub isl: f64,
    pub osl: f64,
    pub prob: f64,
    pub stddev: Option<f64>,
}

/// Parsed `--sequence-distribution` spec: semicolon-separated buckets,
/// comma-separated fields.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceDistribution {
    buckets: Vec<SequenceBucket>,
    total: f64,
}

impl SequenceDistribution {
    pub fn parse(spec: &str) -> Result<Self> {
        let mut buckets = Vec::new();
        for entry in spec.split(';').filter(|e| !e.trim().is_empty()) {
            let fields: Vec<&str> = entry
                .trim()
                .trim_start_matches('(')
                .trim_end_matches(')')
                .split(',')
                .map(str::trim)
                .collect();
            if fields.len() < 3 || fields.len() > 4 {
                return Err(Error::Config(format!(
                    "sequence distribution entry '{entry}' must be isl,osl,prob[,stddev]"
                )));
            }
            let parse = |s: &str| -> Result<f64> {
                s.parse()
                    .map_err(|_| Error::Config(format!("invalid number '{s}' in sequence distribution")))
            };
            buckets.push(SequenceBucket {
                isl: parse(fields[0])?,
                osl: parse(fields[1])?,
                prob: parse(fields[2])?,
                stddev: fields.get(3).map(|s| parse(s)).transpose()?,
            });
        }
        let total: f64 = buckets.iter().map(|b| b.prob).sum();
        if buckets.is_empty() || total <= 0.0 {
            return Err(Error::Config(
                "sequence distribution needs at least one bucket with positive probability".into(),
            ));
        }
        Ok(Self { buckets, total })
    }

    /// Draw an `(isl, osl)` pair; values clamp to >= 1.
    pub fn sample(&self, rng: &mut StdRng) -> (u32, u32) {
        let mut pick = rng.random::<f64>() * self.total;
        let mut chosen = &self.buckets[self.buckets.len() - 1];
        for bucket in &self.buckets {
            if pick < bucket.prob {
                chosen = bucket;
                break;
            }
            pick -= bucket.prob;
        }
        let stddev = chosen.stddev.unwrap_or(0.0);
        let isl = sample_normal(rng, chosen.isl, stddev).round().max(1.0) as u32;
        let osl = sample_normal(rng, chosen.osl, stddev).round().max(1.0) as u32;
        (isl, osl)
    }
}

fn draw_tokens(rng: &mut StdRng, tokenizer: &CorpusTokenizer, count: usize) -> String {
    let vocab = tokenizer.vocab_size() as u32;
    let ids: Vec<u32> = (0..count).map(|_| rng.random_range(0..vocab)).collect();
    tokenizer.decode(&ids)
}

/// Generate the full synthetic pool for a run.
pub fn synthesize(
    cfg: &ProfileConfig,
    seed: u64,
    tokenizer: &CorpusTokenizer,
) -> Result<Vec<Conversation>> {
    let mut len_rng = derive_rng(seed, "dataset.prompt.length");
    let mut osl_rng = derive_rng(seed, "dataset.output.length");
    let mut tok_rng = derive_rng(seed, "dataset.prompt.tokens");
    let mut prefix_rng = derive_rng(seed, "dataset.prefix.pool");
    let mut turn_rng = derive_rng(seed, "dataset.turn.count");
    let mut delay_rng = derive_rng(seed, "dataset.turn.delay");
    let mut dist_rng = derive_rng(seed, "dataset.sequence.distribution");

    let distribution = cfg
        .length
        .sequence_distribution
        .as_deref()
        .map(SequenceDistribution::parse)
        .transpose()?;

    // Fixed prefix pool, shared across conversations.
    let prefixes: Vec<String> = (0..cfg.length.prompt_prefix_pool_size)
        .map(|_| draw_tokens(&mut prefix_rng, tokenizer, cfg.length.prompt_prefix_length))
        .collect();

    let mut conversations = Vec::with_capacity(cfg.conversation.num);
    for i in 0..cfg.conversation.num {
        let (isl, osl) = match &distribution {
            Some(dist) => dist.sample(&mut dist_rng),
            None => {
                let isl = sample_normal(&mut len_rng, cfg.length.isl_mean, cfg.length.isl_stddev)
                    .round()
                    .max(1.0) as u32;
                let osl = sample_normal(&mut osl_rng, cfg.length.osl_mean, cfg.length.osl_stddev)
                    .round()
                    .max(1.0) as u32;
                (isl, osl)
            }
        };

        let turn_count = sample_normal(
            &mut turn_rng,
            cfg.conversation.turn_mean,
            cfg.conversation.turn_stddev,
        )
        .round()
        .max(1.0) as usize;

        let mut turns = Vec::with_capacity(turn_count);
        for t in 0..turn_count {
            let mut body_tokens = isl as usize;
            let mut text = String::new();
            if !prefixes.is_empty() {
                let prefix = &prefixes[prefix_rng.random_range(0..prefixes.len())];
                body_tokens = body_tokens.saturating_sub(cfg.length.prompt_prefix_length).max(1);
                text.push_str(prefix);
                text.push(' ');
            }
            text.push_str(&draw_tokens(&mut tok_rng, tokenizer, body_tokens));

            let delay_after_ms = if t + 1 < turn_count && cfg.conversation.turn_delay_mean_ms > 0.0 {
                let delay = sample_normal(
                    &mut delay_rng,
                    cfg.conversation.turn_delay_mean_ms,
                    cfg.conversation.turn_delay_stddev_ms,
                ) * cfg.conversation.turn_delay_ratio;
                Some(delay.max(0.0).round() as u64)
            } else {
                None
            };

            turns.push(Turn {
                role: Role::User,
                text,
                input_ids: None,
                media: Vec::new(),
                max_tokens: Some(osl),
                min_tokens: Some(osl),
                ignore_eos: true,
                model: None,
                delay_after_ms,
                input_length: None,
                hash_ids: Vec::new(),
            });
        }

        conversations.push(Conversation {
            id: format!("session-{i:06}"),
            turns,
            timestamp_ms: None,
        });
    }

    Ok(conversations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use velobench_core::config::{ConversationConfig, LengthConfig};
    use velobench_core::tokenizer::Tokenizer;

    fn cfg() -> ProfileConfig {
        ProfileConfig {
            conversation: ConversationConfig {
                num: 5,
                ..Default::default()
            },
            length: LengthConfig {
                isl_mean: 32.0,
                osl_mean: 16.0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn same_seed_gives_identical_pool() {
        let tok = CorpusTokenizer::reference();
        let a = synthesize(&cfg(), 42, &tok).unwrap();
        let b = synthesize(&cfg(), 42, &tok).unwrap();
        assert_eq!(a, b);
        let c = synthesize(&cfg(), 43, &tok).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn prompts_hit_the_target_token_count() {
        let tok = CorpusTokenizer::reference();
        let pool = synthesize(&cfg(), 1, &tok).unwrap();
        for conversation in &pool {
            assert_eq!(tok.count(&conversation.turns[0].text), 32);
            assert_eq!(conversation.turns[0].max_tokens, Some(16));
        }
    }

    #[test]
    fn prefix_pool_reuses_prefixes() {
        let tok = CorpusTokenizer::reference();
        let mut config = cfg();
        config.conversation.num = 20;
        config.length.prompt_prefix_pool_size = 2;
        config.length.prompt_prefix_length = 8;
        let pool = synthesize(&config, 9, &tok).unwrap();
        let prefixes: std::collections::HashSet<String> = pool
            .iter()
            .map(|c| {
                c.turns[0]
                    .text
                    .split_whitespace()
                    .take(8)
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect();
        assert!(prefixes.len() <= 2);
    }

    #[test]
    fn sequence_distribution_parses_and_samples() {
        let dist = SequenceDistribution::parse("256,64,0.75;1024,128,0.25").unwrap();
        let mut rng = derive_rng(3, "test");
        for _ in 0..50 {
            let (isl, osl) = dist.sample(&mut rng);
            assert!((isl == 256 && osl == 64) || (isl == 1024 && osl == 128));
        }
        assert!(SequenceDistribution::parse("oops").is_err());
        assert!(SequenceDistribution::parse("1,2,0;3,4,0").is_err());
    }

    #[test]
    fn lengths_clamp_to_at_least_one() {
        let tok = CorpusTokenizer::reference();
        let mut config = cfg();
        config.length.isl_mean = 0.0;
        config.length.osl_mean = 0.0;
        let pool = synthesize(&config, 5, &tok).unwrap();
        for conversation in &pool {
            assert!(tok.count(&conversation.turns[0].text) >= 1);
            assert!(conversation.turns[0].max_tokens.unwrap() >= 1);
        }
    }

    #[test]
    fn multi_turn_conversations_carry_delays() {
        let tok = CorpusTokenizer::reference();
        let mut config = cfg();
        config.conversation.turn_mean = 3.0;
        config.conversation.turn_delay_mean_ms = 50.0;
        let pool = synthesize(&config, 11, &tok).unwrap();
        let conversation = &pool[0];
        assert_eq!(conversation.turns.len(), 3);
        assert!(conversation.turns[0].delay_after_ms.is_some());
        assert!(conversation.turns[2].delay_after_ms.is_none());
    }
}
