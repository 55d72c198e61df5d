//! The document engine contract.
//!
//! Tandem never looks inside a document. Replication only needs an engine
//! that can start from nothing, apply and produce change sets, merge two
//! replicas, and render the editable view that convergence digests cover.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// An opaque, engine-encoded set of causal edits.
///
/// The empty change set is zero bytes long; engines must return it from
/// [`DocumentEngine::diff`] when there is nothing to transfer.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet(Bytes);

impl ChangeSet {
    /// Wrap engine-encoded bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// The change set carrying no edits.
    pub fn empty() -> Self {
        Self(Bytes::new())
    }

    /// Whether this change set carries no edits.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encoded size in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Borrow the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Take the encoded bytes.
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl fmt::Debug for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeSet({} bytes)", self.0.len())
    }
}

/// External CRDT engine consumed by the replication layer.
///
/// # Contract
///
/// - `merge` is commutative, associative and idempotent.
/// - `apply_changes(init(), diff(init(), d))` reproduces `d`.
/// - `apply_changes` tolerates change sets that are already contained in
///   the document (re-delivery is a no-op).
/// - `materialize` is a pure function of the document state.
pub trait DocumentEngine: Send + Sync + 'static {
    /// One replica of the document.
    type Doc: Clone + Send + Sync + 'static;

    /// The editable view derived from a document.
    type Content: Serialize + Clone + PartialEq + fmt::Debug + Send + Sync + 'static;

    /// The empty document.
    fn init(&self) -> Self::Doc;

    /// Apply a change set, returning the new document.
    fn apply_changes(&self, doc: &Self::Doc, changes: &ChangeSet) -> Result<Self::Doc, CoreError>;

    /// Merge two replicas.
    fn merge(&self, a: &Self::Doc, b: &Self::Doc) -> Self::Doc;

    /// The changes present in `to` but not in `from`.
    fn diff(&self, from: &Self::Doc, to: &Self::Doc) -> ChangeSet;

    /// Render the editable view of a document.
    fn materialize(&self, doc: &Self::Doc) -> Self::Content;
}
