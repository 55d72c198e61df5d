//! Authorization state of a connection and the host's grant ledger.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use tandem_core::{Label, PolicyKey, VerifyingKey};

use crate::crypto::X25519PublicKey;
use crate::error::{PermsError, Result};
use crate::grant::GrantRecord;

/// Where a connection stands in the grant/challenge handshake.
///
/// ```text
/// Unauthenticated -> GrantRequested -> GrantIssued -> ChallengeSent     -> Authorized
///                                                  -> ChallengeAnswered -> Authorized
/// (any) -> Rejected | Closed
/// ```
///
/// `ChallengeSent` is the host's view, `ChallengeAnswered` the client's.
/// A stored grant lets a connection go straight from `Unauthenticated` to
/// the challenge step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthorizationState {
    Unauthenticated,
    GrantRequested,
    GrantIssued,
    ChallengeSent,
    ChallengeAnswered,
    Authorized,
    Rejected,
    Closed,
}

impl AuthorizationState {
    pub fn is_authorized(self) -> bool {
        self == AuthorizationState::Authorized
    }

    /// `Rejected` and `Closed` admit no further handshake progress.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AuthorizationState::Rejected | AuthorizationState::Closed
        )
    }

    /// Whether the handshake may move from `self` to `next`.
    pub fn can_transition_to(self, next: AuthorizationState) -> bool {
        use AuthorizationState::*;

        match (self, next) {
            (Closed, _) => false,
            (Rejected, Closed) => true,
            (Rejected, _) => false,
            (_, Rejected | Closed) => true,
            (_, Unauthenticated) => false,

            // A grant can be requested afresh at any point the client finds
            // its stored grant unusable.
            (GrantRequested, GrantRequested) => false,
            (_, GrantRequested) => true,

            (GrantRequested, GrantIssued) => true,

            (Unauthenticated | GrantIssued, ChallengeSent) => true,
            (Unauthenticated | GrantIssued | ChallengeAnswered, ChallengeAnswered) => true,

            (ChallengeSent | ChallengeAnswered | Authorized, Authorized) => true,

            _ => false,
        }
    }

    /// Move to `next`, or fail without changing state.
    pub fn transition(&mut self, next: AuthorizationState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(PermsError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        tracing::debug!(from = ?*self, to = ?next, "authorization state change");
        *self = next;
        Ok(())
    }
}

/// The host's long-lived record of issued grants.
///
/// Keyed by the client's verifying key; one client holds at most one grant.
/// Issuing again for the same client replaces its entry with a fresh policy
/// key.
#[derive(Debug, Default)]
pub struct GrantLedger {
    grants: HashMap<VerifyingKey, GrantRecord>,

    /// Index: label -> clients holding a grant under it.
    by_label: HashMap<Label, Vec<VerifyingKey>>,
}

impl GrantLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a policy key and record a grant for `verifying_key`.
    pub fn issue(
        &mut self,
        label: Label,
        verifying_key: VerifyingKey,
        encrypting_key: X25519PublicKey,
    ) -> GrantRecord {
        self.revoke(&verifying_key);

        let record = GrantRecord {
            label: label.clone(),
            policy_key: PolicyKey::generate(),
            verifying_key,
            encrypting_key,
        };

        self.grants.insert(verifying_key, record.clone());
        self.by_label.entry(label).or_default().push(verifying_key);

        tracing::info!(label = %record.label, client = ?verifying_key, "grant issued");
        record
    }

    pub fn get(&self, verifying_key: &VerifyingKey) -> Option<&GrantRecord> {
        self.grants.get(verifying_key)
    }

    pub fn contains(&self, verifying_key: &VerifyingKey) -> bool {
        self.grants.contains_key(verifying_key)
    }

    /// Remove the grant held by one client.
    pub fn revoke(&mut self, verifying_key: &VerifyingKey) -> Option<GrantRecord> {
        let record = self.grants.remove(verifying_key)?;
        if let Some(holders) = self.by_label.get_mut(&record.label) {
            holders.retain(|k| k != verifying_key);
            if holders.is_empty() {
                self.by_label.remove(&record.label);
            }
        }
        Some(record)
    }

    /// Remove every grant issued under `label`.
    pub fn revoke_label(&mut self, label: &Label) -> Vec<GrantRecord> {
        let holders = self.by_label.remove(label).unwrap_or_default();
        let revoked: Vec<GrantRecord> = holders
            .iter()
            .filter_map(|key| self.grants.remove(key))
            .collect();

        if !revoked.is_empty() {
            tracing::info!(%label, count = revoked.len(), "grants revoked");
        }
        revoked
    }

    /// Clients currently holding a grant under `label`.
    pub fn holders(&self, label: &Label) -> &[VerifyingKey] {
        self.by_label.get(label).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GrantRecord> {
        self.grants.values()
    }
}
