//! A deterministic test document engine.
//!
//! A note is a set of last-writer-wins register writes keyed by
//! `(lamport, actor)`. Merging is set union, so it is commutative,
//! associative and idempotent, and every replica holding the same writes
//! materializes the same map.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use tandem_core::{ChangeSet, CoreError, DocumentEngine};

/// One register write. `value: None` deletes the key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NoteOp {
    pub lamport: u64,
    pub actor: String,
    pub key: String,
    pub value: Option<String>,
}

/// One replica of a note.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotesDoc {
    ops: BTreeSet<NoteOp>,
}

impl NotesDoc {
    /// Write `value` under `key`, ordered after every write seen so far.
    pub fn set(&mut self, actor: impl Into<String>, key: impl Into<String>, value: impl Into<String>) {
        self.push(actor.into(), key.into(), Some(value.into()));
    }

    /// Delete `key`.
    pub fn remove(&mut self, actor: impl Into<String>, key: impl Into<String>) {
        self.push(actor.into(), key.into(), None);
    }

    fn push(&mut self, actor: String, key: String, value: Option<String>) {
        let lamport = self.clock() + 1;
        self.ops.insert(NoteOp {
            lamport,
            actor,
            key,
            value,
        });
    }

    /// Highest lamport timestamp seen.
    pub fn clock(&self) -> u64 {
        self.ops.iter().map(|op| op.lamport).max().unwrap_or(0)
    }

    pub fn ops(&self) -> impl Iterator<Item = &NoteOp> {
        self.ops.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// [`DocumentEngine`] over [`NotesDoc`]. Change sets are CBOR op lists.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotesEngine;

impl DocumentEngine for NotesEngine {
    type Doc = NotesDoc;
    type Content = BTreeMap<String, String>;

    fn init(&self) -> NotesDoc {
        NotesDoc::default()
    }

    fn apply_changes(&self, doc: &NotesDoc, changes: &ChangeSet) -> Result<NotesDoc, CoreError> {
        if changes.is_empty() {
            return Ok(doc.clone());
        }
        let ops: Vec<NoteOp> = ciborium::from_reader(changes.as_bytes())
            .map_err(|e| CoreError::MalformedChangeSet(e.to_string()))?;

        let mut next = doc.clone();
        next.ops.extend(ops);
        Ok(next)
    }

    fn merge(&self, a: &NotesDoc, b: &NotesDoc) -> NotesDoc {
        NotesDoc {
            ops: a.ops.union(&b.ops).cloned().collect(),
        }
    }

    fn diff(&self, from: &NotesDoc, to: &NotesDoc) -> ChangeSet {
        let missing: Vec<&NoteOp> = to.ops.difference(&from.ops).collect();
        if missing.is_empty() {
            return ChangeSet::empty();
        }

        let mut buf = Vec::new();
        match ciborium::into_writer(&missing, &mut buf) {
            Ok(()) => ChangeSet::new(buf),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode note ops");
                ChangeSet::empty()
            }
        }
    }

    fn materialize(&self, doc: &NotesDoc) -> BTreeMap<String, String> {
        let mut content = BTreeMap::new();
        for op in &doc.ops {
            match &op.value {
                Some(value) => {
                    content.insert(op.key.clone(), value.clone());
                }
                None => {
                    content.remove(&op.key);
                }
            }
        }
        content
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_later_write_wins() {
        let engine = NotesEngine;
        let mut doc = engine.init();
        doc.set("a", "title", "first");
        doc.set("b", "title", "second");

        let content = engine.materialize(&doc);
        assert_eq!(content.get("title").map(String::as_str), Some("second"));
    }

    #[test]
    fn test_concurrent_writes_tie_break_on_actor() {
        let engine = NotesEngine;
        let mut a = engine.init();
        let mut b = engine.init();
        a.set("alice", "k", "from-alice");
        b.set("bob", "k", "from-bob");

        let ab = engine.merge(&a, &b);
        let ba = engine.merge(&b, &a);

        assert_eq!(ab, ba);
        assert_eq!(
            engine.materialize(&ab).get("k").map(String::as_str),
            Some("from-bob")
        );
    }

    #[test]
    fn test_remove() {
        let engine = NotesEngine;
        let mut doc = engine.init();
        doc.set("a", "k", "v");
        doc.remove("a", "k");
        assert!(engine.materialize(&doc).is_empty());
        assert_eq!(doc.len(), 2);
    }

    #[test]
    fn test_diff_apply() {
        let engine = NotesEngine;
        let mut doc = engine.init();
        doc.set("a", "k1", "v1");
        let base = doc.clone();
        doc.set("a", "k2", "v2");

        let diff = engine.diff(&base, &doc);
        assert!(!diff.is_empty());
        assert!(engine.diff(&doc, &doc).is_empty());

        let applied = engine.apply_changes(&base, &diff).unwrap();
        assert_eq!(applied, doc);

        // Applying again is a no-op.
        assert_eq!(engine.apply_changes(&applied, &diff).unwrap(), doc);
    }

    #[test]
    fn test_garbage_change_set_rejected() {
        let engine = NotesEngine;
        let result = engine.apply_changes(&engine.init(), &ChangeSet::new(vec![0xff, 0x00]));
        assert!(matches!(result, Err(CoreError::MalformedChangeSet(_))));
    }
}
