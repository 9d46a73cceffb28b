//! Error taxonomy for the transport, decode, and decision paths.

use std::time::Duration;

use thiserror::Error;

/// Failure to establish the broker connection. Aborts one agent's run.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to connect to broker at {address}")]
    Connect {
        address: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    /// `Closed` is terminal; a finished agent is never reconnected.
    #[error("{0} has already closed its session")]
    AlreadyClosed(String),
}

/// A single inbound frame that could not be parsed. The frame is skipped.
#[derive(Debug, Error)]
#[error("undecodable frame ({reason}): {excerpt}")]
pub struct DecodeError {
    pub reason: String,
    /// First few characters of the raw frame, for the log line.
    pub excerpt: String,
}

impl DecodeError {
    const EXCERPT_CHARS: usize = 120;

    pub fn new(raw: &str, reason: impl ToString) -> Self {
        Self {
            reason: reason.to_string(),
            excerpt: raw.chars().take(Self::EXCERPT_CHARS).collect(),
        }
    }
}

/// The decision function produced no usable reply.
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed completion response: {0}")]
    MalformedResponse(String),

    #[error("model returned an empty reply")]
    Empty,

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("all providers failed: {}", .0.join("; "))]
    AllProvidersFailed(Vec<String>),
}
