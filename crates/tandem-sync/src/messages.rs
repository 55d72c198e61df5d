//! Peer protocol message types and frame encoding.
//!
//! Every frame on the wire is the CBOR encoding of `{version, message}`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use tandem_core::{ChangeSet, Label, VerifyingKey};
use tandem_perms::{ChallengeToken, PolicyKeyShare, SealedToken, X25519PublicKey};

use crate::convergence::ContentDigest;
use crate::error::{Result, SyncError};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Message size limits.
pub mod limits {
    /// Max encoded frame size in bytes.
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
    /// Max label length in bytes.
    pub const MAX_LABEL_LEN: usize = 256;
    /// Max sealed token ciphertext (32-byte token plus AEAD tag).
    pub const MAX_SEALED_TOKEN_LEN: usize = 48;
}

/// Messages exchanged between a host and its clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerMessage {
    /// Client → host, sent right after the connection opens.
    IdentityAnnounce { verifying_key: VerifyingKey },

    /// Host → client: prove you hold the grant.
    Challenge { encrypted_token: SealedToken },

    /// Client → host: ask for a grant under `label`.
    GrantRequest {
        label: Label,
        verifying_key: VerifyingKey,
        encrypting_key: X25519PublicKey,
    },

    /// Host → client: the request was approved.
    GrantIssued {
        label: Label,
        policy_key: PolicyKeyShare,
        host_verifying_key: VerifyingKey,
    },

    /// Host → client: the request was denied or the grant revoked.
    GrantRejected,

    /// Client → host: the opened challenge token.
    ChallengeResponse {
        label: Label,
        token: ChallengeToken,
        verifying_key: VerifyingKey,
    },

    /// Host → client: the challenge response did not match.
    AuthorizationFailure { label: Label },

    /// Either direction: an incremental change and the sender's digest after it.
    Change { diff: ChangeSet, digest: ContentDigest },

    /// Either direction: send me your whole document.
    RequestFullDocument,

    /// Either direction: the sender's whole document as one change set.
    FullDocument { diff: ChangeSet },
}

#[derive(Serialize)]
struct FrameRef<'a> {
    version: u8,
    message: &'a PeerMessage,
}

#[derive(Deserialize)]
struct Frame {
    version: u8,
    message: PeerMessage,
}

impl PeerMessage {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::IdentityAnnounce { .. } => "IdentityAnnounce",
            PeerMessage::Challenge { .. } => "Challenge",
            PeerMessage::GrantRequest { .. } => "GrantRequest",
            PeerMessage::GrantIssued { .. } => "GrantIssued",
            PeerMessage::GrantRejected => "GrantRejected",
            PeerMessage::ChallengeResponse { .. } => "ChallengeResponse",
            PeerMessage::AuthorizationFailure { .. } => "AuthorizationFailure",
            PeerMessage::Change { .. } => "Change",
            PeerMessage::RequestFullDocument => "RequestFullDocument",
            PeerMessage::FullDocument { .. } => "FullDocument",
        }
    }

    /// Whether this is document traffic, which needs an authorized connection.
    pub fn is_document(&self) -> bool {
        matches!(
            self,
            PeerMessage::Change { .. }
                | PeerMessage::RequestFullDocument
                | PeerMessage::FullDocument { .. }
        )
    }

    /// Check if this message respects size limits.
    pub fn validate_limits(&self) -> std::result::Result<(), &'static str> {
        let label = match self {
            PeerMessage::GrantRequest { label, .. }
            | PeerMessage::GrantIssued { label, .. }
            | PeerMessage::ChallengeResponse { label, .. }
            | PeerMessage::AuthorizationFailure { label } => Some(label),
            _ => None,
        };
        if let Some(label) = label {
            if label.is_empty() {
                return Err("empty label");
            }
            if label.len() > limits::MAX_LABEL_LEN {
                return Err("label too long");
            }
        }

        if let PeerMessage::Challenge { encrypted_token } = self {
            if encrypted_token.ciphertext_len() > limits::MAX_SEALED_TOKEN_LEN {
                return Err("sealed token too long");
            }
        }
        Ok(())
    }

    /// Encode as a versioned frame.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = Vec::new();
        let frame = FrameRef {
            version: PROTOCOL_VERSION,
            message: self,
        };
        ciborium::into_writer(&frame, &mut buf)
            .map_err(|e| SyncError::InvalidMessage(e.to_string()))?;

        if buf.len() > limits::MAX_FRAME_SIZE {
            return Err(SyncError::FrameTooLarge {
                size: buf.len(),
                max: limits::MAX_FRAME_SIZE,
            });
        }
        Ok(Bytes::from(buf))
    }

    /// Decode and validate a frame.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > limits::MAX_FRAME_SIZE {
            return Err(SyncError::FrameTooLarge {
                size: bytes.len(),
                max: limits::MAX_FRAME_SIZE,
            });
        }

        let frame: Frame =
            ciborium::from_reader(bytes).map_err(|e| SyncError::InvalidMessage(e.to_string()))?;

        if frame.version != PROTOCOL_VERSION {
            return Err(SyncError::VersionMismatch {
                local: PROTOCOL_VERSION,
                peer: frame.version,
            });
        }

        frame
            .message
            .validate_limits()
            .map_err(|e| SyncError::InvalidMessage(e.into()))?;

        Ok(frame.message)
    }
}
