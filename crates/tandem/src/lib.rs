//! # Tandem
//!
//! Host and client sessions for collaborative documents over peer links.
//!
//! ## Overview
//!
//! A host owns a document and admits clients per label:
//!
//! - **Grants**: a client without a stored grant asks for one; a person
//!   approves it through the host's [`ApprovalPort`](perms::ApprovalPort)
//! - **Challenges**: every connection proves it holds the grant's policy key
//!   before any document traffic flows, and is re-challenged periodically
//! - **Replication**: edits travel as change sets with a content digest;
//!   a digest mismatch triggers a full resync
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tandem::{ClientSession, HostSession};
//! use tandem::core::DocumentId;
//! use tandem::perms::{FixedApproval, Identity};
//! use tandem::store::MemoryStore;
//! use tandem::sync::MemoryNetwork;
//! use tandem_testkit::NotesEngine;
//!
//! async fn example() -> tandem::Result<()> {
//!     let network = MemoryNetwork::new();
//!
//!     let host = HostSession::new(
//!         Identity::generate(),
//!         NotesEngine,
//!         network.endpoint("host").await,
//!         FixedApproval(true),
//!         Arc::new(MemoryStore::new()),
//!         DocumentId::new("minutes"),
//!     )
//!     .start()
//!     .await?;
//!
//!     let client = ClientSession::new(
//!         Identity::generate(),
//!         "host",
//!         "editors",
//!         NotesEngine,
//!         network.endpoint("laptop").await,
//!         Arc::new(MemoryStore::new()),
//!     )
//!     .start()
//!     .await?;
//!
//!     let mut doc = client.document().await?;
//!     doc.set("laptop", "title", "Weekly sync");
//!     client.submit(doc).await?;
//!
//!     client.shutdown().await?;
//!     host.shutdown().await
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `tandem::core` - identifiers, keys and the document engine contract
//! - `tandem::store` - capability store and document archive
//! - `tandem::perms` - grants, challenges and authorization state
//! - `tandem::sync` - wire protocol, replication and transports

pub mod client;
pub mod config;
pub mod error;
pub mod host;
pub mod timer;

pub use tandem_core as core;
pub use tandem_perms as perms;
pub use tandem_store as store;
pub use tandem_sync as sync;

pub use client::{ClientHandle, ClientSession};
pub use config::SessionConfig;
pub use error::{Result, TandemError};
pub use host::{HostHandle, HostSession};
pub use timer::TimerHandle;

pub use tandem_sync::Notice;
