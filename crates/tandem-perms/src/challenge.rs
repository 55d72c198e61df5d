//! Challenge tokens and their sealed, host-signed envelope.
//!
//! The host proves a client holds a grant by sending a fresh random token
//! the client can only recover with both the grant's policy key and its own
//! X25519 secret:
//!
//! ```text
//! shared   = X25519(ephemeral, client_encrypting_key)
//! wrap_key = blake3_derive("tandem-challenge-v0", shared || policy_key)
//! sealed   = ChaCha20Poly1305(wrap_key, nonce, token)
//! sig      = Ed25519(host, "tandem-challenge-sig-v0" || ephemeral || nonce || sealed)
//! ```
//!
//! The signature lets the client check the challenge came from the host
//! that issued its grant before it tries to open it.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use tandem_core::{Keypair, PolicyKey, Signature, VerifyingKey};

use crate::crypto::{SealedSecret, X25519PublicKey, X25519StaticSecret};
use crate::error::{PermsError, Result};

const SEAL_DOMAIN: &str = "tandem-challenge-v0";
const SIGNATURE_DOMAIN: &[u8] = b"tandem-challenge-sig-v0";

/// 32 random bytes issued by the host for one handshake attempt.
///
/// Never persisted. Equality is constant-time.
#[derive(Clone, Serialize, Deserialize)]
pub struct ChallengeToken([u8; 32]);

impl ChallengeToken {
    /// Generate a fresh random token.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl PartialEq for ChallengeToken {
    fn eq(&self, other: &Self) -> bool {
        blake3::Hash::from(self.0) == blake3::Hash::from(other.0)
    }
}

impl Eq for ChallengeToken {}

impl fmt::Debug for ChallengeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChallengeToken(..)")
    }
}

/// A challenge token sealed to one client and signed by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedToken {
    pub envelope: SealedSecret,
    /// Host signature over the envelope.
    pub signature: Signature,
}

impl SealedToken {
    /// Seal `token` for the holder of `policy_key` and `recipient`'s secret.
    pub fn seal(
        token: &ChallengeToken,
        policy_key: &PolicyKey,
        recipient: &X25519PublicKey,
        host: &Keypair,
    ) -> Result<Self> {
        let envelope =
            SealedSecret::seal(token.as_bytes(), recipient, SEAL_DOMAIN, policy_key.as_bytes())?;
        let signature = host.sign(&envelope.signing_bytes(SIGNATURE_DOMAIN));
        Ok(Self {
            envelope,
            signature,
        })
    }

    /// Check the envelope was signed by `host`.
    pub fn verify(&self, host: &VerifyingKey) -> Result<()> {
        host.verify(&self.envelope.signing_bytes(SIGNATURE_DOMAIN), &self.signature)
            .map_err(|_| PermsError::BadChallengeSignature)
    }

    /// Recover the token.
    ///
    /// Fails if either the policy key or the recipient secret is wrong.
    pub fn open(
        &self,
        policy_key: &PolicyKey,
        recipient: &X25519StaticSecret,
    ) -> Result<ChallengeToken> {
        self.envelope
            .open(recipient, SEAL_DOMAIN, policy_key.as_bytes())
            .map(ChallengeToken)
    }

    pub fn verify_and_open(
        &self,
        host: &VerifyingKey,
        policy_key: &PolicyKey,
        recipient: &X25519StaticSecret,
    ) -> Result<ChallengeToken> {
        self.verify(host)?;
        self.open(policy_key, recipient)
    }

    pub fn ciphertext_len(&self) -> usize {
        self.envelope.ciphertext.len()
    }
}
