//! The deterministic inputs artifact
//!
//! `inputs.json` captures every formatted request payload the dataset can
//! produce, composed at dataset finalization with empty history so the
//! bytes depend only on seed and config, never on worker count or runtime
//! interleaving.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use velobench_core::{ProfileConfig, Result};
use velobench_dataset::DatasetPool;
use velobench_endpoints::{FormatContext, RequestCodec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputsEntry {
    pub session_id: String,
    pub payloads: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputsFile {
    pub data: Vec<InputsEntry>,
}

/// Format every turn of every conversation into its wire payload.
pub fn build_inputs(
    pool: &DatasetPool,
    codec: &Arc<dyn RequestCodec>,
    cfg: &ProfileConfig,
) -> Result<InputsFile> {
    let streaming = cfg.endpoint.streaming && codec.supports_streaming();
    let mut data = Vec::with_capacity(pool.count());
    for conversation in pool.conversations() {
        let mut payloads = Vec::with_capacity(conversation.turns.len());
        for turn in &conversation.turns {
            let formatted = codec.format_request(&FormatContext {
                model: &cfg.endpoint.model,
                turn,
                history: &[],
                streaming,
            })?;
            payloads.push(formatted.body);
        }
        data.push(InputsEntry {
            session_id: conversation.id.clone(),
            payloads,
        });
    }
    Ok(InputsFile { data })
}
