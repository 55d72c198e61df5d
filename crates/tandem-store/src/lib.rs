//! # Tandem Store
//!
//! Persistence ports for Tandem participants.
//!
//! ## Overview
//!
//! - [`CapabilityStore`] - per-participant key/value store for grant
//!   material. A client keeps `label → policy key` and
//!   `policy fingerprint → host verifying key` here so grants survive
//!   restarts.
//! - [`DocumentArchive`] - durable snapshots of the host's document, written
//!   by the periodic save sweep.
//!
//! Both ports have an in-memory implementation ([`MemoryStore`]) for tests
//! and a SQLite implementation ([`SqliteStore`]).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tandem_store::{CapabilityStoreExt, CapabilityGrant, SqliteStore};
//! use tandem_core::{Keypair, Label, PolicyKey};
//!
//! async fn example() {
//!     let store = SqliteStore::open("client.db").unwrap();
//!
//!     let grant = CapabilityGrant {
//!         label: Label::new("L1"),
//!         policy_key: PolicyKey::generate(),
//!         host_verifying_key: Keypair::generate().verifying_key(),
//!     };
//!     store.save_grant(&grant).await.unwrap();
//!
//!     let loaded = store.load_grant(&Label::new("L1")).await.unwrap();
//!     assert!(loaded.is_some());
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Typed keys**: entries are addressed by [`CapabilityKey`], never by
//!   concatenated strings.
//! - **Fingerprints, not secrets**: the reverse entry is keyed by the policy
//!   key's fingerprint so the secret never becomes an index.

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    CapabilityGrant, CapabilityKey, CapabilityStore, CapabilityStoreExt, CapabilityValue,
    DocumentArchive,
};
