//! Error types for Tandem Core.

use thiserror::Error;

/// Core errors raised by key handling, encoding and the document engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),

    /// The document engine could not interpret a change set.
    #[error("malformed change set: {0}")]
    MalformedChangeSet(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
