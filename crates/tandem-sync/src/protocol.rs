//! Host and client protocol dispatchers.
//!
//! # Architecture: Action-Based State Machine
//!
//! - Methods take transport events, approval decisions and local edits
//! - Methods return `Vec<Action>`; the session driver executes them
//! - Time is passed in where it matters, never read from a clock
//!
//! Nothing here performs I/O, so whole conversations between a host and
//! several clients can be replayed in plain unit tests.

use std::time::{Duration, Instant};

use tandem_core::{ChangeSet, DocumentEngine, Label, PeerId, VerifyingKey};
use tandem_perms::{
    AuthorizationState, ChallengeToken, GrantLedger, Identity, PolicyKeyShare, Requester,
    SealedToken, X25519PublicKey,
};
use tandem_store::CapabilityGrant;

use crate::action::{Action, Notice};
use crate::convergence::ContentDigest;
use crate::error::Result;
use crate::handshake::{ChallengeReply, ClientHandshake, HostHandshake, ResponseVerdict};
use crate::messages::PeerMessage;
use crate::registry::{ConnectionRegistry, PeerConnection};
use crate::replication::Replicator;
use crate::transport::TransportEvent;

/// Tunables of the sans-IO layer.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// How long a client holding a grant waits for a challenge before it
    /// assumes the grant is stale.
    pub handshake_timeout: Duration,
    /// Reconnects allowed after authorization failures, in a row.
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnect; doubles on each further attempt.
    pub reconnect_backoff: Duration,
    /// Clear the client replica when its host link closes.
    pub reset_on_disconnect: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            max_reconnect_attempts: 3,
            reconnect_backoff: Duration::from_millis(500),
            reset_on_disconnect: true,
        }
    }
}

fn decode(peer: &PeerId, bytes: &[u8]) -> Option<PeerMessage> {
    match PeerMessage::decode(bytes) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::warn!(%peer, error = %e, "dropping malformed frame");
            None
        }
    }
}

fn log_failure(peer: &PeerId, result: Result<Vec<Action>>) -> Vec<Action> {
    result.unwrap_or_else(|e| {
        tracing::warn!(%peer, error = %e, "failed to handle message");
        Vec::new()
    })
}

/// The host: owns the grant ledger and the canonical replica.
pub struct HostProtocol<E: DocumentEngine> {
    registry: ConnectionRegistry,
    handshake: HostHandshake,
    replicator: Replicator<E>,
}

impl<E: DocumentEngine> HostProtocol<E> {
    pub fn new(identity: Identity, engine: E) -> Self {
        Self::with_ledger(identity, GrantLedger::new(), engine)
    }

    /// Start with grants issued in an earlier session.
    pub fn with_ledger(identity: Identity, ledger: GrantLedger, engine: E) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            handshake: HostHandshake::with_ledger(identity, ledger),
            replicator: Replicator::new(engine),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &GrantLedger {
        self.handshake.ledger()
    }

    pub fn identity(&self) -> &Identity {
        self.handshake.identity()
    }

    pub fn replicator(&self) -> &Replicator<E> {
        &self.replicator
    }

    pub fn replicator_mut(&mut self) -> &mut Replicator<E> {
        &mut self.replicator
    }

    /// Dispatch one transport event.
    pub fn handle_event(&mut self, event: TransportEvent) -> Vec<Action> {
        match event {
            TransportEvent::Opened { peer, .. } => self.on_opened(peer),
            TransportEvent::Frame { peer, bytes } => self.on_frame(&peer, &bytes),
            TransportEvent::Closed { peer } => self.on_closed(&peer),
            TransportEvent::Error { peer, message } => {
                tracing::warn!(%peer, %message, "transport error");
                Vec::new()
            }
        }
    }

    /// Every new connection starts unauthenticated.
    pub fn on_opened(&mut self, peer: PeerId) -> Vec<Action> {
        if self
            .registry
            .register(PeerConnection::inbound(peer.clone()))
            .is_some()
        {
            tracing::debug!(%peer, "replaced stale connection");
        }
        Vec::new()
    }

    /// Forget a connection, its outstanding challenge and pending request.
    pub fn on_closed(&mut self, peer: &PeerId) -> Vec<Action> {
        match self.registry.remove(peer) {
            Some(_) => vec![Action::Notice(Notice::ConnectionClosed { peer: peer.clone() })],
            None => Vec::new(),
        }
    }

    pub fn on_frame(&mut self, peer: &PeerId, bytes: &[u8]) -> Vec<Action> {
        let Some(message) = decode(peer, bytes) else {
            return Vec::new();
        };
        let Some(conn) = self.registry.lookup(peer) else {
            tracing::warn!(%peer, kind = message.kind(), "frame from unregistered peer");
            return Vec::new();
        };
        if conn.state.is_terminal() {
            tracing::debug!(%peer, kind = message.kind(), "dropping frame on rejected connection");
            return Vec::new();
        }
        if message.is_document() && !conn.is_authorized() {
            tracing::debug!(%peer, kind = message.kind(), "dropping unauthorized document traffic");
            return Vec::new();
        }

        let result = match message {
            PeerMessage::IdentityAnnounce { verifying_key } => {
                self.on_identity_announce(peer, verifying_key)
            }
            PeerMessage::GrantRequest {
                label,
                verifying_key,
                encrypting_key,
            } => self.on_grant_request(peer, label, verifying_key, encrypting_key),
            PeerMessage::ChallengeResponse {
                label,
                token,
                verifying_key,
            } => self.on_challenge_response(peer, label, token, verifying_key),
            PeerMessage::Change { diff, digest } => self.on_change(peer, &diff, &digest),
            PeerMessage::RequestFullDocument => Ok(vec![Action::send(
                peer,
                PeerMessage::FullDocument {
                    diff: self.replicator.full_document(),
                },
            )]),
            PeerMessage::FullDocument { diff } => self.on_full_document(peer, &diff),
            other => {
                tracing::warn!(%peer, kind = other.kind(), "unexpected message for host");
                Ok(Vec::new())
            }
        };
        log_failure(peer, result)
    }

    fn on_identity_announce(
        &mut self,
        peer: &PeerId,
        verifying_key: VerifyingKey,
    ) -> Result<Vec<Action>> {
        let conn = self.registry.require_mut(peer)?;
        let challenge = self.handshake.on_identity_announce(conn, verifying_key)?;
        Ok(challenge
            .map(|message| Action::send(peer, message))
            .into_iter()
            .collect())
    }

    fn on_grant_request(
        &mut self,
        peer: &PeerId,
        label: Label,
        verifying_key: VerifyingKey,
        encrypting_key: X25519PublicKey,
    ) -> Result<Vec<Action>> {
        let conn = self.registry.require_mut(peer)?;
        let action =
            self.handshake
                .on_grant_request(conn, label, verifying_key, encrypting_key)?;
        Ok(action.into_iter().collect())
    }

    /// The approval port answered a request for `label` from `requester`.
    ///
    /// The answer only applies if the connection still waits on that exact
    /// request; an answer for a request whose link has since closed is dropped.
    pub fn on_approval(
        &mut self,
        label: &Label,
        requester: &Requester,
        approved: bool,
    ) -> Vec<Action> {
        let result = self.decide_grant(label, requester, approved);
        log_failure(&requester.peer, result)
    }

    fn decide_grant(
        &mut self,
        label: &Label,
        requester: &Requester,
        approved: bool,
    ) -> Result<Vec<Action>> {
        let peer = &requester.peer;
        let Some(conn) = self.registry.lookup_mut(peer) else {
            tracing::debug!(%peer, "approval for a closed connection");
            return Ok(Vec::new());
        };
        let still_pending = conn.pending_grant.as_ref().is_some_and(|pending| {
            &pending.label == label && pending.verifying_key == requester.verifying_key
        });
        if !still_pending {
            tracing::debug!(%peer, %label, "approval does not match the pending request, dropping");
            return Ok(Vec::new());
        }
        let label = label.clone();

        if approved {
            let Some(issued) = self.handshake.grant(conn)? else {
                return Ok(Vec::new());
            };
            return Ok(vec![
                Action::send(peer, issued),
                Action::Notice(Notice::GrantIssued {
                    peer: peer.clone(),
                    label,
                }),
            ]);
        }

        tracing::info!(%peer, %label, "grant request denied");
        self.registry.reject(peer)?;
        Ok(vec![
            Action::send(peer, PeerMessage::GrantRejected),
            Action::Close { peer: peer.clone() },
            Action::Notice(Notice::GrantRejected { peer: peer.clone() }),
        ])
    }

    fn on_challenge_response(
        &mut self,
        peer: &PeerId,
        label: Label,
        token: ChallengeToken,
        verifying_key: VerifyingKey,
    ) -> Result<Vec<Action>> {
        let conn = self.registry.require_mut(peer)?;
        match self
            .handshake
            .verify_response(conn, &label, &token, &verifying_key)
        {
            ResponseVerdict::Authorized => {
                self.registry.authorize(peer)?;
                tracing::info!(%peer, %label, "peer authorized");
                Ok(vec![
                    Action::Notice(Notice::Authorized { peer: peer.clone() }),
                    Action::send(
                        peer,
                        PeerMessage::FullDocument {
                            diff: self.replicator.full_document(),
                        },
                    ),
                ])
            }
            ResponseVerdict::Reconfirmed => {
                tracing::debug!(%peer, "re-challenge answered");
                Ok(Vec::new())
            }
            ResponseVerdict::Failed => Ok(self.fail_authorization(peer, label)),
        }
    }

    fn fail_authorization(&mut self, peer: &PeerId, label: Label) -> Vec<Action> {
        tracing::warn!(%peer, %label, "authorization failed");
        if let Err(e) = self.registry.reject(peer) {
            tracing::warn!(%peer, error = %e, "could not reject connection");
        }
        vec![
            Action::send(peer, PeerMessage::AuthorizationFailure { label: label.clone() }),
            Action::Notice(Notice::AuthorizationFailed {
                peer: peer.clone(),
                label,
            }),
        ]
    }

    /// Relay `diff` to every authorized peer except `origin`.
    fn relay(&self, origin: Option<&PeerId>, diff: ChangeSet, digest: ContentDigest) -> Vec<Action> {
        self.registry
            .broadcast(
                |conn| conn.is_authorized() && Some(&conn.peer) != origin,
                &PeerMessage::Change { diff, digest },
            )
            .into_iter()
            .map(Action::Send)
            .collect()
    }

    fn on_change(
        &mut self,
        peer: &PeerId,
        diff: &ChangeSet,
        digest: &ContentDigest,
    ) -> Result<Vec<Action>> {
        let outcome = self.replicator.on_change(diff, digest)?;
        let mut actions = Vec::new();

        if outcome.view_changed {
            actions.push(Action::ViewChanged);
            let local = self.replicator.digest()?;
            actions.extend(self.relay(Some(peer), diff.clone(), local));
        }
        if !outcome.convergence.is_converged() {
            tracing::debug!(%peer, "digest mismatch, requesting full document");
            actions.push(Action::send(peer, PeerMessage::RequestFullDocument));
        }
        Ok(actions)
    }

    fn on_full_document(&mut self, peer: &PeerId, diff: &ChangeSet) -> Result<Vec<Action>> {
        let resync = self.replicator.on_full_document(diff)?;
        let mut actions = Vec::new();

        if resync.view_changed {
            actions.push(Action::ViewChanged);
        }
        if let Some((gained, digest)) = resync.gained {
            actions.extend(self.relay(Some(peer), gained, digest));
        }
        if let Some((missing, digest)) = resync.missing_remotely {
            actions.push(Action::send(
                peer,
                PeerMessage::Change {
                    diff: missing,
                    digest,
                },
            ));
        }
        Ok(actions)
    }

    /// Apply an edited document from the local editor and fan it out.
    pub fn local_edit(&mut self, snapshot: &E::Doc) -> Result<Vec<Action>> {
        let Some((diff, digest)) = self.replicator.local_edit(snapshot)? else {
            return Ok(Vec::new());
        };
        let mut actions = vec![Action::ViewChanged];
        actions.extend(self.relay(None, diff, digest));
        Ok(actions)
    }

    /// Periodic re-challenge of every authorized connection.
    ///
    /// A connection that left the previous challenge unanswered fails.
    pub fn on_challenge_tick(&mut self) -> Vec<Action> {
        let peers = self.registry.authorized_peers();
        let mut actions = Vec::new();

        for peer in peers {
            let Some(conn) = self.registry.lookup_mut(&peer) else {
                continue;
            };

            if let Some(unanswered) = &conn.outstanding_challenge {
                let label = unanswered.label.clone();
                actions.extend(self.fail_authorization(&peer, label));
                continue;
            }

            match self.handshake.challenge(conn) {
                Ok(Some(message)) => actions.push(Action::send(&peer, message)),
                Ok(None) => {}
                Err(e) => tracing::warn!(%peer, error = %e, "could not seal challenge"),
            }
        }
        actions
    }

    /// Revoke every grant under `label` and drop the connections using it.
    pub fn revoke(&mut self, label: &Label) -> Vec<Action> {
        let revoked = self.handshake.ledger_mut().revoke_label(label);
        let keys: Vec<VerifyingKey> = revoked.iter().map(|r| r.verifying_key).collect();

        let peers: Vec<PeerId> = self
            .registry
            .iter()
            .filter(|conn| !conn.state.is_terminal())
            .filter(|conn| conn.remote_key.is_some_and(|vk| keys.contains(&vk)))
            .map(|conn| conn.peer.clone())
            .collect();

        let mut actions = Vec::new();
        for peer in &peers {
            if let Err(e) = self.registry.reject(peer) {
                tracing::warn!(%peer, error = %e, "could not reject connection");
            }
            actions.push(Action::send(peer, PeerMessage::GrantRejected));
            actions.push(Action::Close { peer: peer.clone() });
        }
        actions.push(Action::Notice(Notice::GrantRevoked {
            label: label.clone(),
            connections: peers.len(),
        }));
        actions
    }
}

/// A client: holds one link to its host under one label.
pub struct ClientProtocol<E: DocumentEngine> {
    host: PeerId,
    config: ProtocolConfig,
    registry: ConnectionRegistry,
    handshake: ClientHandshake,
    replicator: Replicator<E>,
    /// When the current link started waiting for a challenge.
    awaiting_since: Option<Instant>,
    /// The next close follows an authorization failure.
    reconnect_on_close: bool,
    reconnect_attempts: u32,
}

impl<E: DocumentEngine> ClientProtocol<E> {
    /// `grant` is the one loaded from the capability store for `label`.
    pub fn new(
        host: PeerId,
        identity: Identity,
        label: Label,
        grant: Option<CapabilityGrant>,
        engine: E,
        config: ProtocolConfig,
    ) -> Self {
        Self {
            host,
            config,
            registry: ConnectionRegistry::new(),
            handshake: ClientHandshake::new(identity, label, grant),
            replicator: Replicator::new(engine),
            awaiting_since: None,
            reconnect_on_close: false,
            reconnect_attempts: 0,
        }
    }

    pub fn host(&self) -> &PeerId {
        &self.host
    }

    pub fn label(&self) -> &Label {
        self.handshake.label()
    }

    pub fn grant(&self) -> Option<&CapabilityGrant> {
        self.handshake.grant()
    }

    pub fn identity(&self) -> &Identity {
        self.handshake.identity()
    }

    pub fn replicator(&self) -> &Replicator<E> {
        &self.replicator
    }

    /// State of the link to the host, `Closed` when there is none.
    pub fn state(&self) -> AuthorizationState {
        self.registry
            .lookup(&self.host)
            .map(|conn| conn.state)
            .unwrap_or(AuthorizationState::Closed)
    }

    pub fn is_authorized(&self) -> bool {
        self.state().is_authorized()
    }

    pub fn handle_event(&mut self, event: TransportEvent, now: Instant) -> Vec<Action> {
        match event {
            TransportEvent::Opened { peer, .. } => self.on_opened(peer, now),
            TransportEvent::Frame { peer, bytes } => self.on_frame(&peer, &bytes, now),
            TransportEvent::Closed { peer } => self.on_closed(&peer),
            TransportEvent::Error { peer, message } => {
                tracing::warn!(%peer, %message, "transport error");
                Vec::new()
            }
        }
    }

    /// Register the link and announce identity at once.
    pub fn on_opened(&mut self, peer: PeerId, now: Instant) -> Vec<Action> {
        if peer != self.host {
            tracing::warn!(%peer, "link to a peer other than the host, ignoring");
            return Vec::new();
        }

        let mut conn = PeerConnection::outbound(peer.clone(), self.handshake.label().clone());
        let messages = match self.handshake.on_open(&mut conn) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "could not start handshake");
                return Vec::new();
            }
        };
        self.registry.register(conn);
        self.reconnect_on_close = false;

        let mut actions: Vec<Action> = messages
            .into_iter()
            .map(|message| Action::send(&peer, message))
            .collect();
        actions.extend(self.arm_handshake_check(now));
        actions
    }

    fn arm_handshake_check(&mut self, now: Instant) -> Option<Action> {
        let conn = self.registry.lookup(&self.host)?;
        if !self.handshake.awaiting_challenge(conn) {
            self.awaiting_since = None;
            return None;
        }
        self.awaiting_since = Some(now);
        Some(Action::ScheduleHandshakeCheck {
            after: self.config.handshake_timeout,
        })
    }

    /// A scheduled handshake check fired.
    ///
    /// A grant that drew no challenge within the timeout is treated as stale:
    /// it is purged and a new one requested on the same link.
    pub fn on_handshake_check(&mut self, now: Instant) -> Vec<Action> {
        let Some(since) = self.awaiting_since else {
            return Vec::new();
        };
        if now.duration_since(since) < self.config.handshake_timeout {
            return Vec::new();
        }
        let host = self.host.clone();
        let Some(conn) = self.registry.lookup(&host) else {
            self.awaiting_since = None;
            return Vec::new();
        };
        if !self.handshake.awaiting_challenge(conn) {
            self.awaiting_since = None;
            return Vec::new();
        }

        tracing::info!(peer = %host, label = %self.handshake.label(), "no challenge for stored grant, requesting a new one");
        self.awaiting_since = None;
        log_failure(&host, self.replace_grant(&host))
    }

    /// Purge the stored grant and request a new one on the open link.
    fn replace_grant(&mut self, peer: &PeerId) -> Result<Vec<Action>> {
        let mut actions = Vec::new();
        if self.handshake.forget_grant().is_some() {
            actions.push(Action::PurgeGrant(self.handshake.label().clone()));
        }
        actions.extend(self.request_grant(peer)?);
        Ok(actions)
    }

    fn request_grant(&mut self, peer: &PeerId) -> Result<Vec<Action>> {
        let conn = self.registry.require_mut(peer)?;
        let request = self.handshake.request_grant(conn)?;
        Ok(vec![Action::send(peer, request)])
    }

    pub fn on_closed(&mut self, peer: &PeerId) -> Vec<Action> {
        if self.registry.remove(peer).is_none() {
            return Vec::new();
        }
        self.awaiting_since = None;

        let mut actions = vec![Action::Notice(Notice::ConnectionClosed { peer: peer.clone() })];
        if self.config.reset_on_disconnect && self.replicator.reset() {
            actions.push(Action::ViewChanged);
        }

        if std::mem::take(&mut self.reconnect_on_close) {
            if self.reconnect_attempts >= self.config.max_reconnect_attempts {
                tracing::warn!(attempts = self.reconnect_attempts, "giving up reconnecting");
                actions.push(Action::Notice(Notice::ReconnectExhausted {
                    attempts: self.reconnect_attempts,
                }));
            } else {
                self.reconnect_attempts += 1;
                let delay = self
                    .config
                    .reconnect_backoff
                    .saturating_mul(1 << (self.reconnect_attempts - 1).min(16));
                actions.push(Action::Reconnect {
                    peer: peer.clone(),
                    attempt: self.reconnect_attempts,
                    delay,
                });
            }
        }
        actions
    }

    pub fn on_frame(&mut self, peer: &PeerId, bytes: &[u8], now: Instant) -> Vec<Action> {
        let Some(message) = decode(peer, bytes) else {
            return Vec::new();
        };
        let Some(conn) = self.registry.lookup(peer) else {
            tracing::warn!(%peer, kind = message.kind(), "frame from unregistered peer");
            return Vec::new();
        };
        if conn.state.is_terminal() {
            tracing::debug!(%peer, kind = message.kind(), "dropping frame on rejected connection");
            return Vec::new();
        }

        // The host pushes the document only after authorizing us.
        let promote = matches!(message, PeerMessage::FullDocument { .. })
            && conn.state == AuthorizationState::ChallengeAnswered;
        if message.is_document() && !conn.is_authorized() && !promote {
            tracing::debug!(%peer, kind = message.kind(), "dropping unauthorized document traffic");
            return Vec::new();
        }

        let result = match message {
            PeerMessage::Challenge { encrypted_token } => self.on_challenge(peer, &encrypted_token),
            PeerMessage::GrantIssued {
                label,
                policy_key,
                host_verifying_key,
            } => self.on_grant_issued(peer, &label, &policy_key, host_verifying_key, now),
            PeerMessage::GrantRejected => Ok(self.on_grant_rejected(peer)),
            PeerMessage::AuthorizationFailure { label } => {
                Ok(self.on_authorization_failure(peer, label))
            }
            PeerMessage::FullDocument { diff } => self.on_full_document(peer, &diff, promote),
            PeerMessage::Change { diff, digest } => self.on_change(peer, &diff, &digest),
            PeerMessage::RequestFullDocument => Ok(vec![Action::send(
                peer,
                PeerMessage::FullDocument {
                    diff: self.replicator.full_document(),
                },
            )]),
            other => {
                tracing::warn!(%peer, kind = other.kind(), "unexpected message for client");
                Ok(Vec::new())
            }
        };
        log_failure(peer, result)
    }

    fn on_challenge(&mut self, peer: &PeerId, sealed: &SealedToken) -> Result<Vec<Action>> {
        let conn = self.registry.require_mut(peer)?;
        match self.handshake.on_challenge(conn, sealed)? {
            ChallengeReply::Respond(response) => {
                self.awaiting_since = None;
                Ok(vec![Action::send(peer, response)])
            }
            ChallengeReply::RequestGrant { purge } => {
                self.awaiting_since = None;
                let mut actions = Vec::new();
                if purge {
                    actions.push(Action::PurgeGrant(self.handshake.label().clone()));
                }
                actions.extend(self.request_grant(peer)?);
                Ok(actions)
            }
            ChallengeReply::Ignore => Ok(Vec::new()),
        }
    }

    fn on_grant_issued(
        &mut self,
        peer: &PeerId,
        label: &Label,
        share: &PolicyKeyShare,
        host_verifying_key: VerifyingKey,
        now: Instant,
    ) -> Result<Vec<Action>> {
        let conn = self.registry.require_mut(peer)?;
        let Some(grant) = self
            .handshake
            .on_grant_issued(conn, label, share, host_verifying_key)?
        else {
            return Ok(Vec::new());
        };

        tracing::info!(%peer, %label, "grant received");
        let mut actions = vec![
            Action::PersistGrant(grant),
            Action::Notice(Notice::GrantIssued {
                peer: peer.clone(),
                label: label.clone(),
            }),
            Action::send(peer, self.handshake.announce()),
        ];
        actions.extend(self.arm_handshake_check(now));
        Ok(actions)
    }

    fn on_grant_rejected(&mut self, peer: &PeerId) -> Vec<Action> {
        tracing::info!(%peer, label = %self.handshake.label(), "grant rejected by host");
        self.handshake.forget_grant();
        self.awaiting_since = None;
        self.reconnect_on_close = false;
        if let Err(e) = self.registry.reject(peer) {
            tracing::warn!(%peer, error = %e, "could not reject connection");
        }
        vec![
            Action::PurgeGrant(self.handshake.label().clone()),
            Action::Close { peer: peer.clone() },
            Action::Notice(Notice::GrantRejected { peer: peer.clone() }),
        ]
    }

    fn on_authorization_failure(&mut self, peer: &PeerId, label: Label) -> Vec<Action> {
        tracing::warn!(%peer, %label, "host rejected our challenge response");
        self.handshake.forget_grant();
        self.awaiting_since = None;
        self.reconnect_on_close = true;
        if let Err(e) = self.registry.reject(peer) {
            tracing::warn!(%peer, error = %e, "could not reject connection");
        }
        vec![
            Action::PurgeGrant(self.handshake.label().clone()),
            Action::Notice(Notice::AuthorizationFailed {
                peer: peer.clone(),
                label,
            }),
            Action::Close { peer: peer.clone() },
        ]
    }

    fn on_full_document(
        &mut self,
        peer: &PeerId,
        diff: &ChangeSet,
        promote: bool,
    ) -> Result<Vec<Action>> {
        let mut actions = Vec::new();
        if promote {
            self.registry.authorize(peer)?;
            self.reconnect_attempts = 0;
            tracing::info!(%peer, label = %self.handshake.label(), "authorized by host");
            actions.push(Action::Notice(Notice::Authorized { peer: peer.clone() }));
        }

        let resync = self.replicator.on_full_document(diff)?;
        if resync.view_changed {
            actions.push(Action::ViewChanged);
        }
        if let Some((missing, digest)) = resync.missing_remotely {
            actions.push(Action::send(
                peer,
                PeerMessage::Change {
                    diff: missing,
                    digest,
                },
            ));
        }
        Ok(actions)
    }

    fn on_change(
        &mut self,
        peer: &PeerId,
        diff: &ChangeSet,
        digest: &ContentDigest,
    ) -> Result<Vec<Action>> {
        let outcome = self.replicator.on_change(diff, digest)?;
        let mut actions = Vec::new();
        if outcome.view_changed {
            actions.push(Action::ViewChanged);
        }
        if !outcome.convergence.is_converged() {
            tracing::debug!(%peer, "digest mismatch, requesting full document");
            actions.push(Action::send(peer, PeerMessage::RequestFullDocument));
        }
        Ok(actions)
    }

    /// Apply an edited document from the local editor.
    ///
    /// The change goes to the host only while authorized.
    pub fn local_edit(&mut self, snapshot: &E::Doc) -> Result<Vec<Action>> {
        let Some((diff, digest)) = self.replicator.local_edit(snapshot)? else {
            return Ok(Vec::new());
        };
        let mut actions = vec![Action::ViewChanged];
        actions.extend(
            self.registry
                .broadcast(
                    |conn| conn.is_authorized(),
                    &PeerMessage::Change { diff, digest },
                )
                .into_iter()
                .map(Action::Send),
        );
        Ok(actions)
    }
}
