//! The grant/challenge handshake, host and client halves.
//!
//! ```text
//! Client                                    Host
//!   |-- IdentityAnnounce{vk} --------------->|  known vk: challenge now
//!   |-- GrantRequest{label, vk, ek} -------->|  (only without a stored grant)
//!   |                                        |  approval port decides
//!   |<------------- GrantIssued{share, hvk} -|  or GrantRejected + close
//!   |-- IdentityAnnounce{vk} --------------->|
//!   |<--------------- Challenge{sealed} -----|
//!   |-- ChallengeResponse{token} ----------->|  match: Authorized
//!   |<--------------- FullDocument ----------|  mismatch: AuthorizationFailure
//! ```
//!
//! Both halves mutate a [`PeerConnection`] and return messages or verdicts;
//! the protocol dispatcher turns them into [`Action`]s.

use tandem_core::{Label, VerifyingKey};
use tandem_perms::{
    AuthorizationState, ChallengeToken, GrantLedger, Identity, PolicyKeyShare, Requester,
    SealedToken, X25519PublicKey,
};
use tandem_store::CapabilityGrant;

use crate::action::Action;
use crate::error::Result;
use crate::messages::PeerMessage;
use crate::registry::{OutstandingChallenge, PeerConnection, PendingGrant};

/// Host verdict on a challenge response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseVerdict {
    /// First successful response on this connection.
    Authorized,
    /// A periodic re-challenge was answered correctly.
    Reconfirmed,
    /// Wrong token, unknown grant, or no challenge in flight.
    Failed,
}

/// Host side of the handshake.
#[derive(Debug)]
pub struct HostHandshake {
    identity: Identity,
    ledger: GrantLedger,
}

impl HostHandshake {
    pub fn new(identity: Identity) -> Self {
        Self::with_ledger(identity, GrantLedger::new())
    }

    pub fn with_ledger(identity: Identity, ledger: GrantLedger) -> Self {
        Self { identity, ledger }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn ledger(&self) -> &GrantLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut GrantLedger {
        &mut self.ledger
    }

    /// A client announced itself. Known clients are challenged at once.
    pub fn on_identity_announce(
        &self,
        conn: &mut PeerConnection,
        verifying_key: VerifyingKey,
    ) -> Result<Option<PeerMessage>> {
        if let Some(known) = conn.remote_key {
            if known != verifying_key {
                tracing::warn!(peer = %conn.peer, "identity changed mid-connection, ignoring");
                return Ok(None);
            }
        }
        conn.remote_key = Some(verifying_key);

        if !self.ledger.contains(&verifying_key) {
            tracing::debug!(peer = %conn.peer, "unknown identity, awaiting grant request");
            return Ok(None);
        }
        if conn.pending_grant.is_some() {
            return Ok(None);
        }
        self.challenge(conn)
    }

    /// Seal a fresh challenge for the connection's grant.
    ///
    /// Returns `None` if the remote is unknown to the ledger or a challenge
    /// is already in flight.
    pub fn challenge(&self, conn: &mut PeerConnection) -> Result<Option<PeerMessage>> {
        if conn.outstanding_challenge.is_some() || conn.state.is_terminal() {
            return Ok(None);
        }
        let Some(record) = conn.remote_key.and_then(|vk| self.ledger.get(&vk)) else {
            return Ok(None);
        };

        let token = ChallengeToken::generate();
        let sealed = SealedToken::seal(
            &token,
            &record.policy_key,
            &record.encrypting_key,
            self.identity.keypair(),
        )?;

        if !conn.is_authorized() {
            conn.state.transition(AuthorizationState::ChallengeSent)?;
        }
        conn.outstanding_challenge = Some(OutstandingChallenge {
            token,
            label: record.label.clone(),
        });
        tracing::debug!(peer = %conn.peer, "challenge sent");

        Ok(Some(PeerMessage::Challenge {
            encrypted_token: sealed,
        }))
    }

    /// A client asked for a grant. Surfaces it to the approval port once.
    pub fn on_grant_request(
        &self,
        conn: &mut PeerConnection,
        label: Label,
        verifying_key: VerifyingKey,
        encrypting_key: X25519PublicKey,
    ) -> Result<Option<Action>> {
        if conn.pending_grant.is_some() {
            tracing::debug!(peer = %conn.peer, "grant request already pending");
            return Ok(None);
        }
        if conn.remote_key.is_some_and(|known| known != verifying_key) {
            tracing::warn!(peer = %conn.peer, "grant request for another identity, ignoring");
            return Ok(None);
        }

        conn.state.transition(AuthorizationState::GrantRequested)?;
        conn.remote_key = Some(verifying_key);
        conn.outstanding_challenge = None;
        conn.pending_grant = Some(PendingGrant {
            label: label.clone(),
            verifying_key,
            encrypting_key,
        });

        tracing::info!(peer = %conn.peer, %label, "grant requested");
        Ok(Some(Action::RequestApproval {
            peer: conn.peer.clone(),
            label,
            requester: Requester {
                peer: conn.peer.clone(),
                verifying_key,
            },
        }))
    }

    /// The approval port said yes: mint and deliver a grant.
    ///
    /// Returns `None` if the connection no longer waits on a grant.
    pub fn grant(&mut self, conn: &mut PeerConnection) -> Result<Option<PeerMessage>> {
        if conn.state != AuthorizationState::GrantRequested {
            return Ok(None);
        }
        let Some(pending) = conn.pending_grant.take() else {
            return Ok(None);
        };

        let record = self.ledger.issue(
            pending.label.clone(),
            pending.verifying_key,
            pending.encrypting_key,
        );
        let share = PolicyKeyShare::create(&record.label, &record.policy_key, &record.encrypting_key)?;
        conn.state.transition(AuthorizationState::GrantIssued)?;

        Ok(Some(PeerMessage::GrantIssued {
            label: record.label,
            policy_key: share,
            host_verifying_key: self.identity.verifying_key(),
        }))
    }

    /// Check a challenge response against the token issued on `conn`.
    ///
    /// Consumes the outstanding token whatever the outcome.
    pub fn verify_response(
        &self,
        conn: &mut PeerConnection,
        label: &Label,
        token: &ChallengeToken,
        verifying_key: &VerifyingKey,
    ) -> ResponseVerdict {
        let Some(OutstandingChallenge {
            token: expected, ..
        }) = conn.outstanding_challenge.take()
        else {
            tracing::warn!(peer = %conn.peer, "challenge response without a challenge");
            return ResponseVerdict::Failed;
        };

        let identity_matches = conn.remote_key.as_ref() == Some(verifying_key);
        let label_matches = self
            .ledger
            .get(verifying_key)
            .is_some_and(|record| &record.label == label);

        if !(identity_matches && label_matches && expected == *token) {
            return ResponseVerdict::Failed;
        }

        if conn.is_authorized() {
            ResponseVerdict::Reconfirmed
        } else {
            ResponseVerdict::Authorized
        }
    }
}

/// What the client does with a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeReply {
    /// Answer with the opened token.
    Respond(PeerMessage),
    /// The stored grant cannot answer it; ask for a new one.
    RequestGrant { purge: bool },
    /// Drop the challenge.
    Ignore,
}

/// Client side of the handshake.
#[derive(Debug)]
pub struct ClientHandshake {
    identity: Identity,
    label: Label,
    grant: Option<CapabilityGrant>,
}

impl ClientHandshake {
    /// `grant` is the one loaded from the capability store, if any.
    pub fn new(identity: Identity, label: Label, grant: Option<CapabilityGrant>) -> Self {
        Self {
            identity,
            label,
            grant,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn label(&self) -> &Label {
        &self.label
    }

    pub fn grant(&self) -> Option<&CapabilityGrant> {
        self.grant.as_ref()
    }

    /// Drop the in-memory grant.
    pub fn forget_grant(&mut self) -> Option<CapabilityGrant> {
        self.grant.take()
    }

    pub fn announce(&self) -> PeerMessage {
        PeerMessage::IdentityAnnounce {
            verifying_key: self.identity.verifying_key(),
        }
    }

    /// Build a grant request and move the connection to `GrantRequested`.
    pub fn request_grant(&self, conn: &mut PeerConnection) -> Result<PeerMessage> {
        conn.state.transition(AuthorizationState::GrantRequested)?;
        Ok(PeerMessage::GrantRequest {
            label: self.label.clone(),
            verifying_key: self.identity.verifying_key(),
            encrypting_key: self.identity.encrypting_key(),
        })
    }

    /// Messages to send as soon as the link opens.
    pub fn on_open(&self, conn: &mut PeerConnection) -> Result<Vec<PeerMessage>> {
        let mut out = vec![self.announce()];
        if self.grant.is_none() {
            out.push(self.request_grant(conn)?);
        }
        Ok(out)
    }

    /// Whether the client holds a grant but has not been challenged yet.
    pub fn awaiting_challenge(&self, conn: &PeerConnection) -> bool {
        self.grant.is_some()
            && matches!(
                conn.state,
                AuthorizationState::Unauthenticated | AuthorizationState::GrantIssued
            )
    }

    /// The host issued a grant. Returns it for persisting.
    pub fn on_grant_issued(
        &mut self,
        conn: &mut PeerConnection,
        label: &Label,
        share: &PolicyKeyShare,
        host_verifying_key: VerifyingKey,
    ) -> Result<Option<CapabilityGrant>> {
        if conn.state != AuthorizationState::GrantRequested {
            tracing::warn!(peer = %conn.peer, state = ?conn.state, "unsolicited grant, ignoring");
            return Ok(None);
        }
        if label != &self.label {
            tracing::warn!(peer = %conn.peer, %label, "grant for another label, ignoring");
            return Ok(None);
        }

        let policy_key = share.open(label, self.identity.encryption_secret())?;
        conn.state.transition(AuthorizationState::GrantIssued)?;

        let grant = CapabilityGrant {
            label: label.clone(),
            policy_key,
            host_verifying_key,
        };
        self.grant = Some(grant.clone());
        Ok(Some(grant))
    }

    /// Decide how to answer a challenge.
    pub fn on_challenge(
        &mut self,
        conn: &mut PeerConnection,
        sealed: &SealedToken,
    ) -> Result<ChallengeReply> {
        let Some(grant) = self.grant.as_ref() else {
            if conn.state == AuthorizationState::GrantRequested {
                return Ok(ChallengeReply::Ignore);
            }
            return Ok(ChallengeReply::RequestGrant { purge: false });
        };

        if let Err(e) = sealed.verify(&grant.host_verifying_key) {
            tracing::warn!(peer = %conn.peer, error = %e, "dropping challenge");
            return Ok(ChallengeReply::Ignore);
        }

        let token = match sealed.open(&grant.policy_key, self.identity.encryption_secret()) {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(peer = %conn.peer, error = %e, "stored grant cannot open challenge");
                self.grant = None;
                return Ok(ChallengeReply::RequestGrant { purge: true });
            }
        };

        if !conn.is_authorized() {
            conn.state.transition(AuthorizationState::ChallengeAnswered)?;
        }

        Ok(ChallengeReply::Respond(PeerMessage::ChallengeResponse {
            label: self.label.clone(),
            token,
            verifying_key: self.identity.verifying_key(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::PeerId;

    struct Pair {
        host: HostHandshake,
        client: ClientHandshake,
        host_conn: PeerConnection,
        client_conn: PeerConnection,
    }

    fn pair() -> Pair {
        Pair {
            host: HostHandshake::new(Identity::generate()),
            client: ClientHandshake::new(Identity::generate(), Label::new("L1"), None),
            host_conn: PeerConnection::inbound(PeerId::new("client")),
            client_conn: PeerConnection::outbound(PeerId::new("host"), Label::new("L1")),
        }
    }

    /// Drive a grant request through approval and return the GrantIssued.
    fn issue(p: &mut Pair) -> PeerMessage {
        let out = p.client.on_open(&mut p.client_conn).unwrap();
        assert_eq!(out.len(), 2);

        let PeerMessage::IdentityAnnounce { verifying_key } = out[0].clone() else {
            panic!("expected announce first");
        };
        assert!(p
            .host
            .on_identity_announce(&mut p.host_conn, verifying_key)
            .unwrap()
            .is_none());

        let PeerMessage::GrantRequest {
            label,
            verifying_key,
            encrypting_key,
        } = out[1].clone()
        else {
            panic!("expected grant request");
        };
        let action = p
            .host
            .on_grant_request(&mut p.host_conn, label, verifying_key, encrypting_key)
            .unwrap();
        assert!(matches!(action, Some(Action::RequestApproval { .. })));

        p.host.grant(&mut p.host_conn).unwrap().unwrap()
    }

    fn accept(p: &mut Pair, issued: PeerMessage) -> CapabilityGrant {
        let PeerMessage::GrantIssued {
            label,
            policy_key,
            host_verifying_key,
        } = issued
        else {
            panic!("expected GrantIssued");
        };
        p.client
            .on_grant_issued(&mut p.client_conn, &label, &policy_key, host_verifying_key)
            .unwrap()
            .unwrap()
    }

    fn respond(p: &mut Pair, challenge: PeerMessage) -> ChallengeReply {
        let PeerMessage::Challenge { encrypted_token } = challenge else {
            panic!("expected Challenge");
        };
        p.client
            .on_challenge(&mut p.client_conn, &encrypted_token)
            .unwrap()
    }

    #[test]
    fn test_full_handshake() {
        let mut p = pair();
        let issued = issue(&mut p);
        let grant = accept(&mut p, issued);
        assert_eq!(grant.host_verifying_key, p.host.identity().verifying_key());

        let challenge = p
            .host
            .on_identity_announce(&mut p.host_conn, p.client.identity().verifying_key())
            .unwrap()
            .unwrap();
        assert_eq!(p.host_conn.state, AuthorizationState::ChallengeSent);

        let ChallengeReply::Respond(PeerMessage::ChallengeResponse {
            label,
            token,
            verifying_key,
        }) = respond(&mut p, challenge)
        else {
            panic!("expected response");
        };
        assert_eq!(p.client_conn.state, AuthorizationState::ChallengeAnswered);

        let verdict = p
            .host
            .verify_response(&mut p.host_conn, &label, &token, &verifying_key);
        assert_eq!(verdict, ResponseVerdict::Authorized);
        assert!(p.host_conn.outstanding_challenge.is_none());
    }

    #[test]
    fn test_duplicate_grant_request_ignored() {
        let mut p = pair();
        let client = p.client.identity().clone();

        let first = p
            .host
            .on_grant_request(
                &mut p.host_conn,
                Label::new("L1"),
                client.verifying_key(),
                client.encrypting_key(),
            )
            .unwrap();
        let second = p
            .host
            .on_grant_request(
                &mut p.host_conn,
                Label::new("L1"),
                client.verifying_key(),
                client.encrypting_key(),
            )
            .unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[test]
    fn test_wrong_token_fails() {
        let mut p = pair();
        let issued = issue(&mut p);
        accept(&mut p, issued);
        p.host
            .on_identity_announce(&mut p.host_conn, p.client.identity().verifying_key())
            .unwrap()
            .unwrap();

        let verdict = p.host.verify_response(
            &mut p.host_conn,
            &Label::new("L1"),
            &ChallengeToken::generate(),
            &p.client.identity().verifying_key(),
        );
        assert_eq!(verdict, ResponseVerdict::Failed);
    }

    #[test]
    fn test_unsolicited_response_fails() {
        let p = pair();
        let mut conn = p.host_conn;

        let verdict = p.host.verify_response(
            &mut conn,
            &Label::new("L1"),
            &ChallengeToken::generate(),
            &p.client.identity().verifying_key(),
        );
        assert_eq!(verdict, ResponseVerdict::Failed);
    }

    #[test]
    fn test_second_challenge_not_sent_while_one_is_outstanding() {
        let mut p = pair();
        let issued = issue(&mut p);
        accept(&mut p, issued);

        let vk = p.client.identity().verifying_key();
        assert!(p
            .host
            .on_identity_announce(&mut p.host_conn, vk)
            .unwrap()
            .is_some());
        assert!(p
            .host
            .on_identity_announce(&mut p.host_conn, vk)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_challenge_from_other_host_dropped() {
        let mut p = pair();
        let issued = issue(&mut p);
        accept(&mut p, issued);

        let impostor = HostHandshake::with_ledger(Identity::generate(), GrantLedger::new());
        let grant = p.client.grant().unwrap().clone();
        let forged = SealedToken::seal(
            &ChallengeToken::generate(),
            &grant.policy_key,
            &p.client.identity().encrypting_key(),
            impostor.identity().keypair(),
        )
        .unwrap();

        let reply = p.client.on_challenge(&mut p.client_conn, &forged).unwrap();
        assert_eq!(reply, ChallengeReply::Ignore);
        assert!(p.client.grant().is_some());
    }

    #[test]
    fn test_unopenable_challenge_requests_new_grant() {
        let mut p = pair();
        let issued = issue(&mut p);
        accept(&mut p, issued);

        // The host re-issued the grant (new policy key) behind the client's back.
        let vk = p.client.identity().verifying_key();
        let ek = p.client.identity().encrypting_key();
        p.host.ledger_mut().issue(Label::new("L1"), vk, ek);

        let challenge = p
            .host
            .on_identity_announce(&mut p.host_conn, vk)
            .unwrap()
            .unwrap();

        assert_eq!(
            respond(&mut p, challenge),
            ChallengeReply::RequestGrant { purge: true }
        );
        assert!(p.client.grant().is_none());
    }

    #[test]
    fn test_challenge_without_grant_requests_one() {
        let mut p = pair();
        let mut conn = PeerConnection::outbound(PeerId::new("host"), Label::new("L1"));
        let sealed = SealedToken::seal(
            &ChallengeToken::generate(),
            &tandem_core::PolicyKey::generate(),
            &p.client.identity().encrypting_key(),
            p.host.identity().keypair(),
        )
        .unwrap();

        assert_eq!(
            p.client.on_challenge(&mut conn, &sealed).unwrap(),
            ChallengeReply::RequestGrant { purge: false }
        );
    }

    #[test]
    fn test_stored_grant_skips_request_on_open() {
        let mut p = pair();
        let issued = issue(&mut p);
        let grant = accept(&mut p, issued);

        let client = ClientHandshake::new(p.client.identity().clone(), Label::new("L1"), Some(grant));
        let mut conn = PeerConnection::outbound(PeerId::new("host"), Label::new("L1"));
        let out = client.on_open(&mut conn).unwrap();

        assert_eq!(out.len(), 1);
        assert!(client.awaiting_challenge(&conn));
        assert_eq!(conn.state, AuthorizationState::Unauthenticated);
    }
}
