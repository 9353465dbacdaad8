//! Codec error model.

use thiserror::Error;

/// Failure turning a message or identifier into bytes, or back.
///
/// Decode failures are expected at runtime (another producer version, manual
/// tampering with the store) and are never fatal to a consumer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The message could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),

    /// The bytes did not contain a valid message.
    #[error("decode failed: {0}")]
    Decode(String),

    /// An identifier was invalid.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl CodecError {
    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
