//! Actions returned by the protocol state machines.
//!
//! The protocol layer performs no I/O. Every method returns a list of
//! actions; the session driver executes them in order.

use std::time::Duration;

use tandem_core::{Label, PeerId};
use tandem_perms::Requester;
use tandem_store::CapabilityGrant;

use crate::messages::PeerMessage;
use crate::registry::Outbound;

/// Something the driver must do on behalf of the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Encode and send a message.
    Send(Outbound),

    /// Close the transport link to a peer.
    Close { peer: PeerId },

    /// Ask the approval port about a grant request, then report back.
    RequestApproval {
        peer: PeerId,
        label: Label,
        requester: Requester,
    },

    /// Write a newly issued grant to the capability store.
    PersistGrant(CapabilityGrant),

    /// Delete the stored grant for a label.
    PurgeGrant(Label),

    /// Open a new link to `peer` after `delay`.
    Reconnect {
        peer: PeerId,
        attempt: u32,
        delay: Duration,
    },

    /// Call back into the protocol's handshake check after `after`.
    ScheduleHandshakeCheck { after: Duration },

    /// The materialized document changed; publish the new view.
    ViewChanged,

    /// Tell observers about a lifecycle event.
    Notice(Notice),
}

impl Action {
    pub fn send(peer: &PeerId, message: PeerMessage) -> Self {
        Action::Send(Outbound {
            peer: peer.clone(),
            message,
        })
    }
}

/// Lifecycle events surfaced to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A connection completed the challenge handshake.
    Authorized { peer: PeerId },

    /// A grant was issued (host) or received (client).
    GrantIssued { peer: PeerId, label: Label },

    /// A grant request was denied, or a grant was revoked.
    GrantRejected { peer: PeerId },

    /// A challenge response failed verification.
    AuthorizationFailed { peer: PeerId, label: Label },

    /// The host revoked every grant under a label.
    GrantRevoked { label: Label, connections: usize },

    /// A transport link closed.
    ConnectionClosed { peer: PeerId },

    /// The client gave up reconnecting.
    ReconnectExhausted { attempts: u32 },
}
