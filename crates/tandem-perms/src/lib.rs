//! # Tandem Permissions
//!
//! Capability grants and the cryptography of the challenge handshake.
//!
//! ## Overview
//!
//! A host admits a client in two steps:
//!
//! 1. **Grant**: after human approval ([`ApprovalPort`]) the host mints a
//!    [`PolicyKey`](tandem_core::PolicyKey), records it in its
//!    [`GrantLedger`] and delivers it as a [`PolicyKeyShare`] sealed to the
//!    client's encrypting key.
//! 2. **Challenge**: on every connection (and periodically after) the host
//!    sends a fresh [`ChallengeToken`] inside a [`SealedToken`]. Opening it
//!    takes both the policy key and the client's X25519 secret; the host
//!    signs the envelope so the client can tell it apart from a forgery.
//!
//! The progress of one connection through these steps is tracked by
//! [`AuthorizationState`].
//!
//! ## Encryption Model
//!
//! Both envelopes use an ephemeral X25519 agreement with the recipient's
//! static key, a domain-separated BLAKE3 key derivation, and
//! ChaCha20-Poly1305.
//!
//! ## Usage
//!
//! ```rust
//! use tandem_core::PolicyKey;
//! use tandem_perms::{ChallengeToken, Identity, SealedToken};
//!
//! let host = Identity::generate();
//! let client = Identity::generate();
//! let policy_key = PolicyKey::generate();
//!
//! let token = ChallengeToken::generate();
//! let sealed =
//!     SealedToken::seal(&token, &policy_key, &client.encrypting_key(), host.keypair()).unwrap();
//!
//! let opened = sealed
//!     .verify_and_open(&host.verifying_key(), &policy_key, client.encryption_secret())
//!     .unwrap();
//! assert_eq!(opened, token);
//! ```

pub mod approval;
pub mod challenge;
pub mod crypto;
pub mod error;
pub mod grant;
pub mod identity;
pub mod state;

pub use approval::{ApprovalPort, FixedApproval, Requester};
pub use challenge::{ChallengeToken, SealedToken};
pub use crypto::{SealedSecret, X25519PublicKey, X25519StaticSecret};
pub use error::{PermsError, Result};
pub use grant::{GrantRecord, PolicyKeyShare};
pub use identity::Identity;
pub use state::{AuthorizationState, GrantLedger};
