//! In-memory implementation of the store traits.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use tandem_core::{ChangeSet, DocumentId};

use crate::error::{Result, StoreError};
use crate::traits::{CapabilityKey, CapabilityStore, CapabilityValue, DocumentArchive};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    capabilities: HashMap<CapabilityKey, CapabilityValue>,
    snapshots: HashMap<DocumentId, ChangeSet>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of capability entries currently held.
    pub fn capability_count(&self) -> usize {
        self.inner
            .read()
            .map(|inner| inner.capabilities.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl CapabilityStore for MemoryStore {
    async fn get(&self, key: &CapabilityKey) -> Result<Option<CapabilityValue>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.capabilities.get(key).cloned())
    }

    async fn set(&self, key: CapabilityKey, value: CapabilityValue) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        inner.capabilities.insert(key, value);
        Ok(())
    }

    async fn delete(&self, key: &CapabilityKey) -> Result<bool> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.capabilities.remove(key).is_some())
    }
}

#[async_trait]
impl DocumentArchive for MemoryStore {
    async fn save_snapshot(&self, document: &DocumentId, snapshot: &ChangeSet) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        inner.snapshots.insert(document.clone(), snapshot.clone());
        Ok(())
    }

    async fn load_snapshot(&self, document: &DocumentId) -> Result<Option<ChangeSet>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.snapshots.get(document).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{CapabilityGrant, CapabilityStoreExt};
    use tandem_core::{Keypair, Label, PolicyKey};

    fn grant(label: &str) -> CapabilityGrant {
        CapabilityGrant {
            label: Label::new(label),
            policy_key: PolicyKey::generate(),
            host_verifying_key: Keypair::generate().verifying_key(),
        }
    }

    #[tokio::test]
    async fn test_save_and_load_grant() {
        let store = MemoryStore::new();
        let grant = grant("L1");

        store.save_grant(&grant).await.unwrap();

        let loaded = store.load_grant(&grant.label).await.unwrap();
        assert_eq!(loaded, Some(grant));
        assert_eq!(store.capability_count(), 2);
    }

    #[tokio::test]
    async fn test_purge_removes_both_entries() {
        let store = MemoryStore::new();
        let grant = grant("L1");
        store.save_grant(&grant).await.unwrap();

        assert!(store.purge_grant(&grant.label).await.unwrap());
        assert_eq!(store.load_grant(&grant.label).await.unwrap(), None);
        assert_eq!(store.capability_count(), 0);

        // Second purge is a no-op.
        assert!(!store.purge_grant(&grant.label).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_reverse_entry_is_no_grant() {
        let store = MemoryStore::new();
        let grant = grant("L1");
        store
            .set(
                CapabilityKey::Label(grant.label.clone()),
                CapabilityValue::PolicyKey(grant.policy_key.clone()),
            )
            .await
            .unwrap();

        assert_eq!(store.load_grant(&grant.label).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_snapshot_replace() {
        let store = MemoryStore::new();
        let doc = DocumentId::new("doc");

        assert_eq!(store.load_snapshot(&doc).await.unwrap(), None);

        store.save_snapshot(&doc, &ChangeSet::new(vec![1u8])).await.unwrap();
        store.save_snapshot(&doc, &ChangeSet::new(vec![2u8])).await.unwrap();

        assert_eq!(
            store.load_snapshot(&doc).await.unwrap(),
            Some(ChangeSet::new(vec![2u8]))
        );
    }
}
