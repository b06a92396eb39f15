//! Dataset provider
//!
//! Owns the pre-generated pool of conversations. The pool is materialized
//! in full before the first credit is issued, either synthesized from the
//! reference corpus or loaded from a JSONL input file, then served
//! read-only over the bus for the rest of the run.
//!
//! All content randomness derives from the root seed through named
//! sub-RNGs, so the same seed and config produce a byte-identical pool no
//! matter how many workers or processors the run uses.

pub mod loaders;
pub mod provider;
pub mod synthesis;

pub use provider::{
    DatasetHandle, DatasetPool, DatasetQuery, DatasetReply, DatasetService, SampleStrategy,
};

use velobench_core::config::DatasetKind;
use velobench_core::tokenizer::CorpusTokenizer;
use velobench_core::{Error, ProfileConfig, Result};

/// Build and finalize the conversation pool for a run.
pub fn build_dataset(cfg: &ProfileConfig, tokenizer: &CorpusTokenizer) -> Result<DatasetPool> {
    let seed = cfg.input.random_seed;
    let conversations = match &cfg.input.input_file {
        Some(path) => {
            let kind = cfg.input.dataset_kind.unwrap_or(DatasetKind::SingleTurn);
            loaders::load_file(path, kind, tokenizer, seed)?
        }
        None => synthesis::synthesize(cfg, seed, tokenizer)?,
    };

    if conversations.is_empty() {
        return Err(Error::Dataset("dataset is empty".into()));
    }
    if cfg.input.fixed_schedule {
        let missing = conversations
            .iter()
            .filter(|c| c.timestamp_ms.is_none())
            .count();
        if missing > 0 {
            return Err(Error::Dataset(format!(
                "fixed schedule requires timestamps on every conversation, {missing} missing"
            )));
        }
    }

    Ok(DatasetPool::new(conversations))
}
