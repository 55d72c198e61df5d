//! Error types for sessions.

use tandem_core::CoreError;
use tandem_perms::PermsError;
use tandem_store::StoreError;
use tandem_sync::SyncError;
use thiserror::Error;

/// Errors surfaced by session handles.
#[derive(Debug, Error)]
pub enum TandemError {
    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Protocol or transport error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Permission error.
    #[error("permission error: {0}")]
    Permission(#[from] PermsError),

    /// The session's event loop has stopped.
    #[error("session closed")]
    SessionClosed,

    /// The session's event loop panicked or was aborted.
    #[error("session task failed: {0}")]
    Task(String),
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, TandemError>;
