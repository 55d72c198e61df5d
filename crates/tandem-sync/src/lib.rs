//! # Tandem Sync
//!
//! Handshake, replication and wire protocol for collaborative documents.
//!
//! ## Overview
//!
//! A host owns a document and admits clients one label at a time. Each
//! client proves it holds the label's policy key by opening a sealed
//! challenge; only then does document traffic flow. Edits travel as
//! engine-defined change sets tagged with a digest of the sender's
//! materialized content, and a digest mismatch triggers a full resync.
//!
//! ## Layers
//!
//! - [`messages`]: the versioned CBOR frame format
//! - [`handshake`]: grant issuance and the challenge exchange
//! - [`replication`]: applying and producing change sets
//! - [`protocol`]: sans-IO dispatchers returning [`Action`]s
//! - [`transport`]: the frame transport trait and an in-memory network
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tandem_core::{Label, PeerId};
//! use tandem_perms::Identity;
//! use tandem_sync::{ClientProtocol, ProtocolConfig};
//! use tandem_testkit::NotesEngine;
//!
//! let mut client = ClientProtocol::new(
//!     PeerId::new("host"),
//!     Identity::generate(),
//!     Label::new("editors"),
//!     None,
//!     NotesEngine,
//!     ProtocolConfig::default(),
//! );
//! let actions = client.on_opened(PeerId::new("host"), std::time::Instant::now());
//! // Execute `actions` against a transport...
//! # let _ = actions;
//! ```

pub mod action;
pub mod convergence;
pub mod error;
pub mod handshake;
pub mod messages;
pub mod protocol;
pub mod registry;
pub mod replication;
pub mod transport;

pub use action::{Action, Notice};
pub use convergence::{compute_digest, verify_convergence, ContentDigest, ConvergenceResult};
pub use error::{Result, SyncError};
pub use handshake::{ChallengeReply, ClientHandshake, HostHandshake, ResponseVerdict};
pub use messages::{limits, PeerMessage, PROTOCOL_VERSION};
pub use protocol::{ClientProtocol, HostProtocol, ProtocolConfig};
pub use registry::{
    ConnectionRegistry, Outbound, OutstandingChallenge, PeerConnection, PendingGrant,
};
pub use replication::{RemoteChange, Replicator, Resync};
pub use transport::{
    memory::MemoryNetwork, memory::MemoryTransport, Direction, Transport, TransportEvent,
};
