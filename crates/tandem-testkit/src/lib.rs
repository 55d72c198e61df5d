//! # Tandem Testkit
//!
//! Testing utilities for Tandem.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **NotesEngine**: a small deterministic [`DocumentEngine`] over a
//!   key/value note, enough to exercise replication end to end
//! - **Approval ports**: scripted and manually answered [`ApprovalPort`]s
//! - **Fixtures**: deterministic identities and pre-issued grants
//! - **Generators**: proptest strategies for edit sequences
//!
//! ## Example
//!
//! ```rust
//! use tandem_core::DocumentEngine;
//! use tandem_testkit::NotesEngine;
//!
//! let engine = NotesEngine;
//! let mut doc = engine.init();
//! doc.set("alice", "title", "Minutes");
//!
//! let content = engine.materialize(&doc);
//! assert_eq!(content.get("title").map(String::as_str), Some("Minutes"));
//! ```
//!
//! [`DocumentEngine`]: tandem_core::DocumentEngine
//! [`ApprovalPort`]: tandem_perms::ApprovalPort

pub mod approval;
pub mod engine;
pub mod fixtures;
pub mod generators;

pub use approval::{ApprovalRequest, ManualApproval, ScriptedApproval};
pub use engine::{NoteOp, NotesDoc, NotesEngine};
pub use fixtures::{identities, identity, issue_grant};
pub use generators::{apply_edits, edit, edits, Edit};
