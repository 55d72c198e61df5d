//! Participant identity: a signing keypair plus an encryption secret.

use tandem_core::{Keypair, Signature, VerifyingKey};

use crate::crypto::{X25519PublicKey, X25519StaticSecret};

/// Long-lived key material of one participant.
///
/// The Ed25519 half identifies the participant (`verifying_key`); the X25519
/// half receives sealed material (`encrypting_key`).
#[derive(Clone)]
pub struct Identity {
    signing: Keypair,
    encrypting: X25519StaticSecret,
}

impl Identity {
    /// Generate a fresh identity.
    pub fn generate() -> Self {
        Self {
            signing: Keypair::generate(),
            encrypting: X25519StaticSecret::generate(),
        }
    }

    /// Rebuild an identity from its two seeds.
    pub fn from_seeds(signing_seed: &[u8; 32], encrypting_seed: [u8; 32]) -> Self {
        Self {
            signing: Keypair::from_seed(signing_seed),
            encrypting: X25519StaticSecret::from_bytes(encrypting_seed),
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    pub fn encrypting_key(&self) -> X25519PublicKey {
        self.encrypting.public_key()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.signing
    }

    pub fn encryption_secret(&self) -> &X25519StaticSecret {
        &self.encrypting
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message)
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Identity({:?})", self.verifying_key())
    }
}
