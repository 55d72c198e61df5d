//! Error types for the sync module.

use thiserror::Error;

use tandem_core::PeerId;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Protocol version mismatch with peer.
    #[error("protocol version mismatch: local={local}, peer={peer}")]
    VersionMismatch { local: u8, peer: u8 },

    /// Frame exceeds the size limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Message could not be decoded or violates a limit.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// No open link to the peer.
    #[error("peer not connected: {0}")]
    PeerNotConnected(PeerId),

    /// The registry holds no connection for the peer.
    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),

    /// Permission or sealing failure.
    #[error("permission error: {0}")]
    Perms(#[from] tandem_perms::PermsError),

    /// Document engine or encoding failure.
    #[error("core error: {0}")]
    Core(#[from] tandem_core::CoreError),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] tandem_store::StoreError),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
