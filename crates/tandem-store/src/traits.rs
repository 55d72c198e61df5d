//! Store traits: the abstract persistence interfaces.
//!
//! These traits keep participants storage-agnostic. Implementations include
//! SQLite (durable) and in-memory (for tests).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tandem_core::{Blake3Hash, ChangeSet, DocumentId, Label, PolicyKey, VerifyingKey};

use crate::error::Result;

/// Address of one entry in a [`CapabilityStore`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CapabilityKey {
    /// `label → policy key`.
    Label(Label),
    /// `policy key fingerprint → host verifying key`.
    Policy(Blake3Hash),
}

impl CapabilityKey {
    /// Numeric kind used by persistent backends.
    pub fn kind(&self) -> u8 {
        match self {
            CapabilityKey::Label(_) => 0,
            CapabilityKey::Policy(_) => 1,
        }
    }

    /// Key bytes used by persistent backends.
    pub fn key_bytes(&self) -> Vec<u8> {
        match self {
            CapabilityKey::Label(label) => label.as_str().as_bytes().to_vec(),
            CapabilityKey::Policy(fingerprint) => fingerprint.0.to_vec(),
        }
    }
}

/// Value stored under a [`CapabilityKey`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapabilityValue {
    PolicyKey(PolicyKey),
    HostVerifyingKey(VerifyingKey),
}

/// A capability grant as held by a client.
///
/// Issued once by the host for a label; immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityGrant {
    /// The trust relationship this grant belongs to.
    pub label: Label,
    /// Secret proving the grant in challenge responses.
    pub policy_key: PolicyKey,
    /// The host that issued it; challenges must be signed by this key.
    pub host_verifying_key: VerifyingKey,
}

/// Per-participant key/value store for capability material.
///
/// Scoped to the local participant and, for durable backends, persisted
/// across process restarts.
#[async_trait]
pub trait CapabilityStore: Send + Sync {
    /// Read an entry.
    async fn get(&self, key: &CapabilityKey) -> Result<Option<CapabilityValue>>;

    /// Insert or replace an entry.
    async fn set(&self, key: CapabilityKey, value: CapabilityValue) -> Result<()>;

    /// Remove an entry. Returns whether it existed.
    async fn delete(&self, key: &CapabilityKey) -> Result<bool>;
}

/// Typed grant operations over any [`CapabilityStore`].
pub trait CapabilityStoreExt: CapabilityStore {
    /// Load the grant stored for `label`, if both halves are present.
    fn load_grant(
        &self,
        label: &Label,
    ) -> impl std::future::Future<Output = Result<Option<CapabilityGrant>>> + Send;

    /// Persist both halves of a grant.
    fn save_grant(
        &self,
        grant: &CapabilityGrant,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Delete the grant for `label`. Returns whether one existed.
    fn purge_grant(&self, label: &Label) -> impl std::future::Future<Output = Result<bool>> + Send;
}

impl<S: CapabilityStore + ?Sized> CapabilityStoreExt for S {
    async fn load_grant(&self, label: &Label) -> Result<Option<CapabilityGrant>> {
        let policy_key = match self.get(&CapabilityKey::Label(label.clone())).await? {
            Some(CapabilityValue::PolicyKey(key)) => key,
            Some(other) => {
                tracing::warn!(%label, ?other, "label entry holds unexpected value");
                return Ok(None);
            }
            None => return Ok(None),
        };

        let policy_entry = CapabilityKey::Policy(policy_key.fingerprint());
        let host_verifying_key = match self.get(&policy_entry).await? {
            Some(CapabilityValue::HostVerifyingKey(key)) => key,
            _ => return Ok(None),
        };

        Ok(Some(CapabilityGrant {
            label: label.clone(),
            policy_key,
            host_verifying_key,
        }))
    }

    async fn save_grant(&self, grant: &CapabilityGrant) -> Result<()> {
        self.set(
            CapabilityKey::Label(grant.label.clone()),
            CapabilityValue::PolicyKey(grant.policy_key.clone()),
        )
        .await?;
        self.set(
            CapabilityKey::Policy(grant.policy_key.fingerprint()),
            CapabilityValue::HostVerifyingKey(grant.host_verifying_key),
        )
        .await
    }

    async fn purge_grant(&self, label: &Label) -> Result<bool> {
        let label_entry = CapabilityKey::Label(label.clone());
        if let Some(CapabilityValue::PolicyKey(key)) = self.get(&label_entry).await? {
            self.delete(&CapabilityKey::Policy(key.fingerprint())).await?;
        }
        self.delete(&label_entry).await
    }
}

/// Durable snapshots of a document.
///
/// A snapshot is the full change set `diff(empty, doc)`.
#[async_trait]
pub trait DocumentArchive: Send + Sync {
    /// Replace the stored snapshot for `document`.
    async fn save_snapshot(&self, document: &DocumentId, snapshot: &ChangeSet) -> Result<()>;

    /// Load the latest snapshot for `document`.
    async fn load_snapshot(&self, document: &DocumentId) -> Result<Option<ChangeSet>>;
}
