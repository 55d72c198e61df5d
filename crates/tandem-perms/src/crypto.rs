//! X25519 keys and the sealed-secret box built on them.
//!
//! Both secrets the host hands out (policy keys and challenge tokens) are
//! 32 bytes and travel the same way: an ephemeral X25519 agreement with the
//! recipient's encrypting key, a BLAKE3-derived ChaCha20-Poly1305 key bound
//! to a domain and a context, and a random nonce.

use std::fmt;

use bytes::Bytes;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::error::{PermsError, Result};

/// The key a client announces so secrets can be sealed to it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct X25519PublicKey(pub [u8; 32]);

impl X25519PublicKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for X25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X25519PublicKey({})", &hex::encode(self.0)[..16])
    }
}

/// Long-lived X25519 secret; opens what was sealed to its public key.
#[derive(Clone)]
pub struct X25519StaticSecret(StaticSecret);

impl X25519StaticSecret {
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        Self::from_bytes(seed)
    }

    pub fn from_bytes(seed: [u8; 32]) -> Self {
        Self(StaticSecret::from(seed))
    }

    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey(*PublicKey::from(&self.0).as_bytes())
    }
}

impl fmt::Debug for X25519StaticSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X25519StaticSecret({:?})", self.public_key())
    }
}

/// A 32-byte secret encrypted for one X25519 recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSecret {
    /// Sender's half of the key agreement.
    pub ephemeral_public: X25519PublicKey,
    pub nonce: [u8; 12],
    pub ciphertext: Bytes,
}

impl SealedSecret {
    /// Seal `secret` so only the holder of `recipient`'s secret, knowing
    /// `context`, can open it.
    pub fn seal(
        secret: &[u8; 32],
        recipient: &X25519PublicKey,
        domain: &str,
        context: &[u8],
    ) -> Result<Self> {
        let ephemeral = EphemeralSecret::random_from_rng(rand::thread_rng());
        let ephemeral_public = X25519PublicKey(*PublicKey::from(&ephemeral).as_bytes());
        let shared = ephemeral.diffie_hellman(&PublicKey::from(recipient.0));

        let mut nonce = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = cipher(shared.as_bytes(), domain, context)
            .encrypt(Nonce::from_slice(&nonce), secret.as_slice())
            .map_err(|e| PermsError::EncryptionError(e.to_string()))?;

        Ok(Self {
            ephemeral_public,
            nonce,
            ciphertext: Bytes::from(ciphertext),
        })
    }

    /// Recover the secret. Fails on a wrong recipient, domain or context.
    pub fn open(
        &self,
        recipient: &X25519StaticSecret,
        domain: &str,
        context: &[u8],
    ) -> Result<[u8; 32]> {
        let shared = recipient
            .0
            .diffie_hellman(&PublicKey::from(self.ephemeral_public.0));

        let plaintext = cipher(shared.as_bytes(), domain, context)
            .decrypt(Nonce::from_slice(&self.nonce), self.ciphertext.as_ref())
            .map_err(|e| PermsError::DecryptionError(e.to_string()))?;

        let len = plaintext.len();
        plaintext.try_into().map_err(|_| {
            PermsError::DecryptionError(format!("sealed secret is {len} bytes, expected 32"))
        })
    }

    /// The envelope as one byte string, prefixed with `domain`, for signing.
    pub fn signing_bytes(&self, domain: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(domain.len() + 32 + 12 + self.ciphertext.len());
        buf.extend_from_slice(domain);
        buf.extend_from_slice(self.ephemeral_public.as_bytes());
        buf.extend_from_slice(&self.nonce);
        buf.extend_from_slice(&self.ciphertext);
        buf
    }
}

fn cipher(shared: &[u8; 32], domain: &str, context: &[u8]) -> ChaCha20Poly1305 {
    let mut hasher = blake3::Hasher::new_derive_key(domain);
    hasher.update(shared);
    hasher.update(context);
    let key = hasher.finalize();
    ChaCha20Poly1305::new(key.as_bytes().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMAIN: &str = "tandem-test-v0";

    #[test]
    fn test_seal_open() {
        let recipient = X25519StaticSecret::generate();
        let sealed = SealedSecret::seal(&[7u8; 32], &recipient.public_key(), DOMAIN, b"ctx").unwrap();

        assert_eq!(sealed.open(&recipient, DOMAIN, b"ctx").unwrap(), [7u8; 32]);
    }

    #[test]
    fn test_binding_to_domain_and_context() {
        let recipient = X25519StaticSecret::generate();
        let sealed = SealedSecret::seal(&[1u8; 32], &recipient.public_key(), DOMAIN, b"ctx").unwrap();

        assert!(sealed.open(&recipient, "tandem-other-v0", b"ctx").is_err());
        assert!(sealed.open(&recipient, DOMAIN, b"other").is_err());
        assert!(sealed
            .open(&X25519StaticSecret::generate(), DOMAIN, b"ctx")
            .is_err());
    }

    #[test]
    fn test_each_seal_is_fresh() {
        let recipient = X25519StaticSecret::generate();
        let a = SealedSecret::seal(&[2u8; 32], &recipient.public_key(), DOMAIN, b"").unwrap();
        let b = SealedSecret::seal(&[2u8; 32], &recipient.public_key(), DOMAIN, b"").unwrap();

        assert_ne!(a.ephemeral_public, b.ephemeral_public);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_truncated_ciphertext_rejected() {
        let recipient = X25519StaticSecret::generate();
        let mut sealed =
            SealedSecret::seal(&[3u8; 32], &recipient.public_key(), DOMAIN, b"").unwrap();
        sealed.ciphertext = sealed.ciphertext.slice(..20);

        assert!(matches!(
            sealed.open(&recipient, DOMAIN, b""),
            Err(PermsError::DecryptionError(_))
        ));
    }

    #[test]
    fn test_static_secret_from_seed_is_stable() {
        let a = X25519StaticSecret::from_bytes([9u8; 32]);
        let b = X25519StaticSecret::from_bytes([9u8; 32]);
        assert_eq!(a.public_key(), b.public_key());
    }
}
