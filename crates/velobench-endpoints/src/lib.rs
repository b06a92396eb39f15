//! Endpoint codecs
//!
//! Request/response codec plugins for the endpoint families VeloBench can
//! drive. A codec formats one turn (plus accumulated conversation history)
//! into a wire payload and parses responses back into the normalized
//! [`ParsedResponse`](velobench_core::types::ParsedResponse) shape, one
//! stream event at a time for SSE endpoints.

pub mod codec;
pub mod embeddings;
pub mod openai;
pub mod rankings;

pub use codec::{codec_for, FormatContext, FormattedRequest, HistoryEntry, RequestCodec, StreamDelta};
