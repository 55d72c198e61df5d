//! Convergence verification.
//!
//! Every `Change` carries a digest of the sender's materialized content after
//! the change. The receiver recomputes it over its own content; a mismatch
//! means the replicas have drifted and triggers a full resync.

use std::fmt;

use serde::{Deserialize, Serialize};

use tandem_core::{canonical_bytes, Blake3Hash};

use crate::error::Result;

const DIGEST_DOMAIN: &str = "tandem-content-digest-v0";

/// BLAKE3 digest of materialized document content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentDigest(pub Blake3Hash);

impl ContentDigest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", &self.0.to_hex()[..16])
    }
}

/// Digest of `content` over its canonical CBOR encoding.
///
/// Equal content gives equal digests regardless of map iteration order.
pub fn compute_digest<T: Serialize + ?Sized>(content: &T) -> Result<ContentDigest> {
    let bytes = canonical_bytes(content)?;
    Ok(ContentDigest(Blake3Hash::derive(DIGEST_DOMAIN, &bytes)))
}

/// Compare a local digest against the one a peer sent.
pub fn verify_convergence(local: &ContentDigest, remote: &ContentDigest) -> ConvergenceResult {
    if local == remote {
        ConvergenceResult::Converged
    } else {
        ConvergenceResult::Diverged {
            local: *local,
            remote: *remote,
        }
    }
}

/// Result of convergence verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Both replicas render the same content.
    Converged,
    /// The replicas differ; a full resync is needed.
    Diverged {
        local: ContentDigest,
        remote: ContentDigest,
    },
}

impl ConvergenceResult {
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }
}
