//! Connection registry: one entry per open transport link.
//!
//! The registry is owned by a single event loop and never shared. It holds
//! the handshake state of every connection and answers "who may receive
//! document traffic".

use std::collections::BTreeMap;

use tandem_core::{Label, PeerId, VerifyingKey};
use tandem_perms::{AuthorizationState, ChallengeToken, X25519PublicKey};

use crate::error::{Result, SyncError};
use crate::messages::PeerMessage;

/// A grant request waiting on the approval port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingGrant {
    pub label: Label,
    pub verifying_key: VerifyingKey,
    pub encrypting_key: X25519PublicKey,
}

/// A sealed challenge waiting for its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutstandingChallenge {
    pub token: ChallengeToken,
    /// The grant the challenge was sealed under.
    pub label: Label,
}

/// One open link to a remote participant.
#[derive(Debug, Clone)]
pub struct PeerConnection {
    /// Transport address.
    pub peer: PeerId,

    /// Handshake progress.
    pub state: AuthorizationState,

    /// Host side: the remote's verifying key once announced.
    pub remote_key: Option<VerifyingKey>,

    /// Host side: the token of the challenge in flight, if any.
    pub outstanding_challenge: Option<OutstandingChallenge>,

    /// Host side: a grant request awaiting approval.
    pub pending_grant: Option<PendingGrant>,

    /// Client side: the label this connection authenticates under.
    pub label: Option<Label>,
}

impl PeerConnection {
    /// A connection accepted by the host.
    pub fn inbound(peer: PeerId) -> Self {
        Self {
            peer,
            state: AuthorizationState::Unauthenticated,
            remote_key: None,
            outstanding_challenge: None,
            pending_grant: None,
            label: None,
        }
    }

    /// A connection opened by a client under `label`.
    pub fn outbound(peer: PeerId, label: Label) -> Self {
        Self {
            label: Some(label),
            ..Self::inbound(peer)
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.state.is_authorized()
    }
}

/// A message addressed to one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub peer: PeerId,
    pub message: PeerMessage,
}

/// All open connections of one participant.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: BTreeMap<PeerId, PeerConnection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. A previous entry for the same peer is replaced and
    /// returned.
    pub fn register(&mut self, conn: PeerConnection) -> Option<PeerConnection> {
        tracing::debug!(peer = %conn.peer, "connection registered");
        self.connections.insert(conn.peer.clone(), conn)
    }

    /// Mark a connection authorized. Any challenge in flight is settled.
    pub fn authorize(&mut self, peer: &PeerId) -> Result<()> {
        let conn = self.require_mut(peer)?;
        conn.state.transition(AuthorizationState::Authorized)?;
        conn.outstanding_challenge = None;
        Ok(())
    }

    /// Mark a connection rejected, discarding its handshake material.
    pub fn reject(&mut self, peer: &PeerId) -> Result<()> {
        let conn = self.require_mut(peer)?;
        conn.state.transition(AuthorizationState::Rejected)?;
        conn.outstanding_challenge = None;
        conn.pending_grant = None;
        Ok(())
    }

    /// Drop a connection and everything in flight on it.
    pub fn remove(&mut self, peer: &PeerId) -> Option<PeerConnection> {
        let mut conn = self.connections.remove(peer)?;
        conn.state = AuthorizationState::Closed;
        tracing::debug!(%peer, "connection removed");
        Some(conn)
    }

    pub fn lookup(&self, peer: &PeerId) -> Option<&PeerConnection> {
        self.connections.get(peer)
    }

    pub fn lookup_mut(&mut self, peer: &PeerId) -> Option<&mut PeerConnection> {
        self.connections.get_mut(peer)
    }

    pub(crate) fn require_mut(&mut self, peer: &PeerId) -> Result<&mut PeerConnection> {
        self.connections
            .get_mut(peer)
            .ok_or_else(|| SyncError::UnknownPeer(peer.clone()))
    }

    /// Address `message` to every connection matching `predicate`.
    ///
    /// Each target gets its own [`Outbound`]; the caller delivers them
    /// independently so one failing peer cannot hold up the rest.
    pub fn broadcast<F>(&self, predicate: F, message: &PeerMessage) -> Vec<Outbound>
    where
        F: Fn(&PeerConnection) -> bool,
    {
        self.connections
            .values()
            .filter(|conn| predicate(conn))
            .map(|conn| Outbound {
                peer: conn.peer.clone(),
                message: message.clone(),
            })
            .collect()
    }

    /// Peers currently allowed to exchange document traffic.
    pub fn authorized_peers(&self) -> Vec<PeerId> {
        self.connections
            .values()
            .filter(|conn| conn.is_authorized())
            .map(|conn| conn.peer.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerConnection> {
        self.connections.values()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
