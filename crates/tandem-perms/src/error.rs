//! Error types for the permissions module.

use thiserror::Error;

use crate::state::AuthorizationState;

/// Errors that can occur during permission operations.
#[derive(Debug, Error)]
pub enum PermsError {
    /// Encryption error.
    #[error("encryption error: {0}")]
    EncryptionError(String),

    /// Decryption error.
    #[error("decryption error: {0}")]
    DecryptionError(String),

    /// A sealed challenge was not signed by the expected host.
    #[error("challenge signature does not match host key")]
    BadChallengeSignature,

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// No grant is recorded for the requester.
    #[error("grant not found: {0}")]
    GrantNotFound(String),

    /// An authorization state change that the handshake does not allow.
    #[error("invalid authorization transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: AuthorizationState,
        to: AuthorizationState,
    },

    /// Core error.
    #[error("core error: {0}")]
    CoreError(#[from] tandem_core::CoreError),
}

/// Result type for permission operations.
pub type Result<T> = std::result::Result<T, PermsError>;
