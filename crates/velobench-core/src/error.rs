//! Error types for VeloBench core

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Response parse error: {0}")]
    ResponseParse(String),

    #[error("Request timeout after {0:.1}s")]
    RequestTimeout(f64),

    #[error("Request cancelled after {elapsed_ms}ms")]
    RequestCancelled { elapsed_ms: u64 },

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// HTTP status used for cooperative request cancellation, mirroring the
/// nginx convention for client-closed requests.
pub const CANCELLATION_STATUS: u16 = 499;

impl Error {
    /// Stable error-kind name used in records and the API error summary.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "ConfigError",
            Error::Transport(_) => "TransportError",
            Error::Http { .. } => "HTTPError",
            Error::ResponseParse(_) => "ResponseParseError",
            Error::RequestTimeout(_) => "RequestTimeout",
            Error::RequestCancelled { .. } => "RequestCancellationError",
            Error::Dataset(_) | Error::ConversationNotFound(_) => "DatasetError",
            Error::Serialization(_) => "ResponseParseError",
            Error::Io(_) => "TransportError",
            Error::ChannelClosed(_) | Error::Internal(_) => "FatalInternalError",
        }
    }

    /// Numeric code carried by the error, when one exists.
    pub fn code(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            Error::RequestCancelled { .. } => Some(CANCELLATION_STATUS),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Typed failure details carried by records and control messages.
///
/// Immutable once constructed; the per-request pipeline attaches one of
/// these instead of propagating the error itself so a failed attempt never
/// disturbs its neighbours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

impl From<&Error> for ErrorDetails {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code(),
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}
