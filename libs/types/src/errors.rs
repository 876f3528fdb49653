//! Error types for the order book relay
//!
//! Error taxonomy using thiserror. Parse errors are always recovered
//! locally (the offending message is dropped); connection errors end only
//! the loop that hit them.

use thiserror::Error;

/// Malformed upstream or client message
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid decimal: {0}")]
    InvalidDecimal(String),

    #[error("Unexpected message shape: {0}")]
    UnexpectedShape(String),
}

impl From<serde_json::Error> for ParseError {
    fn from(err: serde_json::Error) -> Self {
        ParseError::InvalidJson(err.to_string())
    }
}

/// Upstream connection failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Receive failed: {0}")]
    Receive(String),
}
