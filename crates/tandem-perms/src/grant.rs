//! Grant records and policy key delivery.
//!
//! When the host approves a grant request it mints a fresh [`PolicyKey`] and
//! delivers it inside a [`PolicyKeyShare`]: the key is encrypted to the
//! requester's X25519 encrypting key, bound to the grant's label.

use serde::{Deserialize, Serialize};

use tandem_core::{Label, PolicyKey, VerifyingKey};

use crate::crypto::{SealedSecret, X25519PublicKey, X25519StaticSecret};
use crate::error::Result;

const SHARE_DOMAIN: &str = "tandem-policy-share-v0";

/// A policy key sealed to the grant recipient, bound to the grant's label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyKeyShare(SealedSecret);

impl PolicyKeyShare {
    pub fn create(
        label: &Label,
        policy_key: &PolicyKey,
        recipient: &X25519PublicKey,
    ) -> Result<Self> {
        SealedSecret::seal(
            policy_key.as_bytes(),
            recipient,
            SHARE_DOMAIN,
            label.as_str().as_bytes(),
        )
        .map(Self)
    }

    pub fn open(&self, label: &Label, recipient: &X25519StaticSecret) -> Result<PolicyKey> {
        let bytes = self
            .0
            .open(recipient, SHARE_DOMAIN, label.as_str().as_bytes())?;
        Ok(PolicyKey::from_bytes(bytes))
    }
}

/// One entry of the host's grant ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRecord {
    /// Label the client asked for.
    pub label: Label,
    /// The secret minted for this grant.
    pub policy_key: PolicyKey,
    /// The client the grant was issued to.
    pub verifying_key: VerifyingKey,
    /// Where challenges for this grant are sealed to.
    pub encrypting_key: X25519PublicKey,
}
