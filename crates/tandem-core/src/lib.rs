//! # Tandem Core
//!
//! Pure primitives shared by every Tandem crate: identifiers, key material,
//! canonical encoding and the contract of the external document engine.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`PeerId`] - Opaque transport address of a remote participant
//! - [`Label`] - Names one trust relationship a client holds with a host
//! - [`VerifyingKey`] / [`Keypair`] - Ed25519 participant identity
//! - [`PolicyKey`] - Symmetric secret minted by the host for one grant
//! - [`DocumentEngine`] - The CRDT engine contract consumed by replication
//!
//! ## Canonicalization
//!
//! Materialized document content is hashed over deterministic CBOR. See the
//! [`canonical`] module.

pub mod canonical;
pub mod crypto;
pub mod document;
pub mod error;
pub mod types;

pub use canonical::{canonical_bytes, canonical_value_bytes};
pub use crypto::{Blake3Hash, Keypair, PolicyKey, Signature, VerifyingKey};
pub use document::{ChangeSet, DocumentEngine};
pub use error::{CoreError, Result};
pub use types::{DocumentId, Label, PeerId};
