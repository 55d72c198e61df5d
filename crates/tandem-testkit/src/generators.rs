//! Proptest generators for property-based testing.

use proptest::prelude::*;

use crate::engine::NotesDoc;

/// One editor action against a note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    Set {
        actor: String,
        key: String,
        value: String,
    },
    Remove {
        actor: String,
        key: String,
    },
}

/// A small actor pool so concurrent writes collide.
pub fn actor() -> impl Strategy<Value = String> {
    prop_oneof![Just("alice"), Just("bob"), Just("carol")].prop_map(String::from)
}

/// A small key space so writes overwrite each other.
pub fn key() -> impl Strategy<Value = String> {
    "[a-d]".prop_map(String::from)
}

pub fn value() -> impl Strategy<Value = String> {
    "[a-z0-9 ]{0,12}".prop_map(String::from)
}

/// Generate a single edit, mostly writes.
pub fn edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        4 => (actor(), key(), value()).prop_map(|(actor, key, value)| Edit::Set { actor, key, value }),
        1 => (actor(), key()).prop_map(|(actor, key)| Edit::Remove { actor, key }),
    ]
}

/// Generate up to `max` edits.
pub fn edits(max: usize) -> impl Strategy<Value = Vec<Edit>> {
    prop::collection::vec(edit(), 0..=max)
}

/// Apply `edits` to `doc` in order.
pub fn apply_edits(doc: &mut NotesDoc, edits: &[Edit]) {
    for edit in edits {
        match edit {
            Edit::Set { actor, key, value } => doc.set(actor.as_str(), key.as_str(), value.as_str()),
            Edit::Remove { actor, key } => doc.remove(actor.as_str(), key.as_str()),
        }
    }
}
