//! Document replication over the [`DocumentEngine`] contract.
//!
//! One [`Replicator`] holds a participant's replica. It never talks to the
//! network: callers feed it local snapshots and remote change sets and get
//! back what to send.

use tandem_core::{ChangeSet, DocumentEngine};

use crate::convergence::{compute_digest, verify_convergence, ContentDigest, ConvergenceResult};
use crate::error::Result;

/// Outcome of applying a remote `Change`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteChange {
    /// The materialized view differs from before.
    pub view_changed: bool,
    /// Digest comparison after applying.
    pub convergence: ConvergenceResult,
}

/// Outcome of merging a remote `FullDocument`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resync {
    /// The materialized view differs from before.
    pub view_changed: bool,
    /// Changes the local replica gained, with the digest after merging.
    pub gained: Option<(ChangeSet, ContentDigest)>,
    /// Changes the sender lacks, with the digest after merging.
    pub missing_remotely: Option<(ChangeSet, ContentDigest)>,
}

/// A participant's replica of the shared document.
pub struct Replicator<E: DocumentEngine> {
    engine: E,
    doc: E::Doc,
    unsaved: bool,
}

impl<E: DocumentEngine> Replicator<E> {
    /// Start from the empty document.
    pub fn new(engine: E) -> Self {
        let doc = engine.init();
        Self {
            engine,
            doc,
            unsaved: false,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn document(&self) -> &E::Doc {
        &self.doc
    }

    /// The editable view of the current document.
    pub fn content(&self) -> E::Content {
        self.engine.materialize(&self.doc)
    }

    /// Digest of the current materialized content.
    pub fn digest(&self) -> Result<ContentDigest> {
        compute_digest(&self.content())
    }

    /// Take in an edited document from the local editor.
    ///
    /// Only the edits `snapshot` adds on top of the current replica are
    /// applied, so remote changes that arrived meanwhile are kept. Returns
    /// the change and digest to broadcast, or `None` if nothing changed.
    pub fn local_edit(&mut self, snapshot: &E::Doc) -> Result<Option<(ChangeSet, ContentDigest)>> {
        let diff = self.engine.diff(&self.doc, snapshot);
        if diff.is_empty() {
            return Ok(None);
        }

        self.doc = self.engine.apply_changes(&self.doc, &diff)?;
        self.unsaved = true;
        Ok(Some((diff, self.digest()?)))
    }

    /// Apply a remote change and compare digests.
    pub fn on_change(&mut self, diff: &ChangeSet, remote: &ContentDigest) -> Result<RemoteChange> {
        let before = self.content();
        self.doc = self.engine.apply_changes(&self.doc, diff)?;
        let after = self.content();

        let view_changed = before != after;
        if view_changed {
            self.unsaved = true;
        }

        let local = compute_digest(&after)?;
        Ok(RemoteChange {
            view_changed,
            convergence: verify_convergence(&local, remote),
        })
    }

    /// The whole replica as one change set, `diff(empty, doc)`.
    pub fn full_document(&self) -> ChangeSet {
        self.engine.diff(&self.engine.init(), &self.doc)
    }

    /// Merge a peer's whole document into the replica.
    pub fn on_full_document(&mut self, diff: &ChangeSet) -> Result<Resync> {
        let remote = self.engine.apply_changes(&self.engine.init(), diff)?;
        let merged = self.engine.merge(&self.doc, &remote);

        let delta = self.engine.diff(&self.doc, &merged);
        let mut view_changed = false;
        if !delta.is_empty() {
            let before = self.content();
            self.doc = self.engine.apply_changes(&self.doc, &delta)?;
            self.unsaved = true;
            view_changed = before != self.content();
        }

        let outgoing = self.engine.diff(&remote, &self.doc);
        let digest = self.digest()?;

        Ok(Resync {
            view_changed,
            gained: (!delta.is_empty()).then(|| (delta, digest)),
            missing_remotely: (!outgoing.is_empty()).then(|| (outgoing, digest)),
        })
    }

    /// Drop every change and return to the empty document.
    ///
    /// Returns whether the view changed.
    pub fn reset(&mut self) -> bool {
        let was_empty = self.engine.diff(&self.engine.init(), &self.doc).is_empty();
        self.doc = self.engine.init();
        !was_empty
    }

    /// Load an archived snapshot into the replica.
    pub fn restore(&mut self, snapshot: &ChangeSet) -> Result<bool> {
        let remote = self.engine.apply_changes(&self.engine.init(), snapshot)?;
        let merged = self.engine.merge(&self.doc, &remote);
        let changed = !self.engine.diff(&self.doc, &merged).is_empty();
        self.doc = merged;
        Ok(changed)
    }

    /// If the replica changed since the last call, a snapshot to archive.
    pub fn take_unsaved(&mut self) -> Option<ChangeSet> {
        if !self.unsaved {
            return None;
        }
        self.unsaved = false;
        Some(self.full_document())
    }

    /// Flag the replica as needing another save (after a failed write).
    pub fn mark_unsaved(&mut self) {
        self.unsaved = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_testkit::{NotesDoc, NotesEngine};

    fn edit(r: &Replicator<NotesEngine>, actor: &str, key: &str, value: &str) -> NotesDoc {
        let mut doc = r.document().clone();
        doc.set(actor, key, value);
        doc
    }

    #[test]
    fn test_local_edit_produces_change() {
        let mut r = Replicator::new(NotesEngine);
        let snapshot = edit(&r, "a", "title", "draft");

        let (diff, digest) = r.local_edit(&snapshot).unwrap().unwrap();

        assert!(!diff.is_empty());
        assert_eq!(digest, r.digest().unwrap());
        assert_eq!(r.content().get("title").map(String::as_str), Some("draft"));
    }

    #[test]
    fn test_unchanged_snapshot_is_silent() {
        let mut r = Replicator::new(NotesEngine);
        let snapshot = r.document().clone();
        assert!(r.local_edit(&snapshot).unwrap().is_none());
    }

    #[test]
    fn test_change_then_matching_digest_converges() {
        let mut a = Replicator::new(NotesEngine);
        let mut b = Replicator::new(NotesEngine);

        let snapshot = edit(&a, "a", "body", "hello");
        let (diff, digest) = a.local_edit(&snapshot).unwrap().unwrap();

        let outcome = b.on_change(&diff, &digest).unwrap();
        assert!(outcome.view_changed);
        assert!(outcome.convergence.is_converged());
        assert_eq!(a.content(), b.content());
    }

    #[test]
    fn test_missed_change_is_detected_and_resynced() {
        let mut a = Replicator::new(NotesEngine);
        let mut b = Replicator::new(NotesEngine);

        let first = edit(&a, "a", "title", "one");
        a.local_edit(&first).unwrap();
        let second = edit(&a, "a", "body", "two");
        let (diff, digest) = a.local_edit(&second).unwrap().unwrap();

        // b never saw the first change.
        let outcome = b.on_change(&diff, &digest).unwrap();
        assert!(!outcome.convergence.is_converged());

        let resync = b.on_full_document(&a.full_document()).unwrap();
        assert!(resync.view_changed);
        assert!(resync.gained.is_some());
        assert!(resync.missing_remotely.is_none());
        assert_eq!(a.content(), b.content());
    }

    #[test]
    fn test_full_document_reports_what_sender_lacks() {
        let mut a = Replicator::new(NotesEngine);
        let mut b = Replicator::new(NotesEngine);

        let snapshot = edit(&b, "b", "mine", "only-b");
        b.local_edit(&snapshot).unwrap();

        let resync = b.on_full_document(&a.full_document()).unwrap();
        let (diff, digest) = resync.missing_remotely.unwrap();

        let outcome = a.on_change(&diff, &digest).unwrap();
        assert!(outcome.convergence.is_converged());
        assert_eq!(a.content(), b.content());
    }

    #[test]
    fn test_local_edit_keeps_concurrent_remote_changes() {
        let mut a = Replicator::new(NotesEngine);
        let mut b = Replicator::new(NotesEngine);

        // The editor on b starts from the empty document...
        let stale_snapshot = edit(&b, "b", "b-key", "b-value");

        // ...while a's change lands on b.
        let remote = edit(&a, "a", "a-key", "a-value");
        let (diff, digest) = a.local_edit(&remote).unwrap().unwrap();
        b.on_change(&diff, &digest).unwrap();

        b.local_edit(&stale_snapshot).unwrap();

        let content = b.content();
        assert_eq!(content.get("a-key").map(String::as_str), Some("a-value"));
        assert_eq!(content.get("b-key").map(String::as_str), Some("b-value"));
    }

    #[test]
    fn test_reset_and_save_tracking() {
        let mut r = Replicator::new(NotesEngine);
        assert!(r.take_unsaved().is_none());

        let snapshot = edit(&r, "a", "k", "v");
        r.local_edit(&snapshot).unwrap();

        let saved = r.take_unsaved().unwrap();
        assert!(r.take_unsaved().is_none());

        assert!(r.reset());
        assert!(r.content().is_empty());
        assert!(!r.reset());

        assert!(r.restore(&saved).unwrap());
        assert_eq!(r.content().get("k").map(String::as_str), Some("v"));
    }
}
