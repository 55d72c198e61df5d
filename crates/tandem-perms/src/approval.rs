//! The human-approval port.
//!
//! The host never issues a grant on its own: every request is surfaced to an
//! [`ApprovalPort`] and only an explicit `true` mints a policy key.

use std::sync::Arc;

use async_trait::async_trait;

use tandem_core::{Label, PeerId, VerifyingKey};

/// Who is asking for a grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    /// Transport address of the connection the request arrived on.
    pub peer: PeerId,
    /// The requesting client's identity.
    pub verifying_key: VerifyingKey,
}

/// Decides grant requests, typically by asking a person.
///
/// A request may take arbitrarily long; only the grant flow of the
/// requesting connection waits for it.
#[async_trait]
pub trait ApprovalPort: Send + Sync {
    /// Return `true` to issue a grant for `label` to `requester`.
    async fn request_approval(&self, label: &Label, requester: &Requester) -> bool;
}

#[async_trait]
impl<P: ApprovalPort + ?Sized> ApprovalPort for Arc<P> {
    async fn request_approval(&self, label: &Label, requester: &Requester) -> bool {
        (**self).request_approval(label, requester).await
    }
}

/// Approves or denies every request the same way.
#[derive(Debug, Clone, Copy)]
pub struct FixedApproval(pub bool);

#[async_trait]
impl ApprovalPort for FixedApproval {
    async fn request_approval(&self, label: &Label, requester: &Requester) -> bool {
        tracing::debug!(%label, peer = %requester.peer, approved = self.0, "fixed approval");
        self.0
    }
}
