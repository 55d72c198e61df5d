//! Transport abstraction.
//!
//! A transport delivers whole frames over ordered, reliable, bidirectional
//! links and reports link lifecycle as [`TransportEvent`]s. Implementations
//! may sit on WebRTC data channels, WebSockets, or anything else.

use async_trait::async_trait;
use bytes::Bytes;

use tandem_core::PeerId;

use crate::error::Result;

/// Which side opened a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The remote connected to us.
    Inbound,
    /// We connected to the remote.
    Outbound,
}

/// Something that happened on a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A link to `peer` is open.
    Opened { peer: PeerId, direction: Direction },
    /// A frame arrived from `peer`.
    Frame { peer: PeerId, bytes: Bytes },
    /// The link to `peer` closed. Delivered once per link.
    Closed { peer: PeerId },
    /// The link to `peer` reported an error. A `Closed` may follow.
    Error { peer: PeerId, message: String },
}

/// Per-peer ordered frame delivery.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a link to `peer`. Completion is reported as `Opened`.
    async fn connect(&self, peer: &PeerId) -> Result<()>;

    /// Send one frame on an open link.
    async fn send(&self, peer: &PeerId, frame: Bytes) -> Result<()>;

    /// Close the link to `peer`. Closing a link that is not open is a no-op.
    async fn close(&self, peer: &PeerId) -> Result<()>;

    /// Wait for the next event. `None` once the transport is shut down.
    async fn next_event(&self) -> Option<TransportEvent>;

    /// This participant's own address.
    fn local_peer(&self) -> PeerId;
}

/// A simple in-memory transport for testing.
///
/// Every endpoint has one event queue; links are symmetric pairs.
pub mod memory {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;
    use tokio::sync::{mpsc, Mutex, RwLock};

    use crate::error::SyncError;

    #[derive(Default)]
    struct NetworkState {
        /// Event queues, one per endpoint.
        ///
        /// Unbounded so two loops sending to each other cannot deadlock.
        endpoints: HashMap<PeerId, mpsc::UnboundedSender<TransportEvent>>,
        /// Open links, stored with the smaller peer first.
        links: HashSet<(PeerId, PeerId)>,
    }

    impl NetworkState {
        fn deliver(&self, to: &PeerId, event: TransportEvent) -> bool {
            match self.endpoints.get(to) {
                Some(queue) => queue.send(event).is_ok(),
                None => false,
            }
        }
    }

    fn link(a: &PeerId, b: &PeerId) -> (PeerId, PeerId) {
        if a <= b {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        }
    }

    /// Shared state for the memory transport network.
    #[derive(Default)]
    pub struct MemoryNetwork {
        state: RwLock<NetworkState>,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Create an endpoint addressed as `peer`.
        pub async fn endpoint(self: &Arc<Self>, peer: impl Into<PeerId>) -> MemoryTransport {
            let peer = peer.into();
            let (tx, rx) = mpsc::unbounded_channel();
            self.state.write().await.endpoints.insert(peer.clone(), tx);

            MemoryTransport {
                local: peer,
                network: Arc::clone(self),
                events: Mutex::new(rx),
            }
        }

        /// Drop the link between two peers as if the network failed.
        pub async fn sever(&self, a: &PeerId, b: &PeerId) {
            let mut state = self.state.write().await;
            if state.links.remove(&link(a, b)) {
                state.deliver(a, TransportEvent::Closed { peer: b.clone() });
                state.deliver(b, TransportEvent::Closed { peer: a.clone() });
            }
        }

        /// Whether a link between two peers is open.
        pub async fn is_linked(&self, a: &PeerId, b: &PeerId) -> bool {
            self.state.read().await.links.contains(&link(a, b))
        }
    }

    /// In-memory transport implementation.
    pub struct MemoryTransport {
        local: PeerId,
        network: Arc<MemoryNetwork>,
        events: Mutex<mpsc::UnboundedReceiver<TransportEvent>>,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn connect(&self, peer: &PeerId) -> Result<()> {
            let mut state = self.network.state.write().await;
            if !state.endpoints.contains_key(peer) {
                return Err(SyncError::TransportError(format!("no endpoint {peer}")));
            }
            if !state.links.insert(link(&self.local, peer)) {
                return Ok(());
            }

            state.deliver(
                &self.local,
                TransportEvent::Opened {
                    peer: peer.clone(),
                    direction: Direction::Outbound,
                },
            );
            state.deliver(
                peer,
                TransportEvent::Opened {
                    peer: self.local.clone(),
                    direction: Direction::Inbound,
                },
            );
            Ok(())
        }

        async fn send(&self, peer: &PeerId, frame: Bytes) -> Result<()> {
            let state = self.network.state.read().await;
            if !state.links.contains(&link(&self.local, peer)) {
                return Err(SyncError::PeerNotConnected(peer.clone()));
            }

            let event = TransportEvent::Frame {
                peer: self.local.clone(),
                bytes: frame,
            };
            if !state.deliver(peer, event) {
                return Err(SyncError::TransportError("peer endpoint dropped".into()));
            }
            Ok(())
        }

        async fn close(&self, peer: &PeerId) -> Result<()> {
            self.network.sever(&self.local, peer).await;
            Ok(())
        }

        async fn next_event(&self) -> Option<TransportEvent> {
            self.events.lock().await.recv().await
        }

        fn local_peer(&self) -> PeerId {
            self.local.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryNetwork;
    use super::*;

    #[tokio::test]
    async fn test_connect_opens_both_ends() {
        let network = MemoryNetwork::new();
        let host = network.endpoint("host").await;
        let client = network.endpoint("client").await;

        client.connect(&host.local_peer()).await.unwrap();

        assert_eq!(
            client.next_event().await,
            Some(TransportEvent::Opened {
                peer: PeerId::new("host"),
                direction: Direction::Outbound,
            })
        );
        assert_eq!(
            host.next_event().await,
            Some(TransportEvent::Opened {
                peer: PeerId::new("client"),
                direction: Direction::Inbound,
            })
        );
    }

    #[tokio::test]
    async fn test_frames_arrive_in_order() {
        let network = MemoryNetwork::new();
        let host = network.endpoint("host").await;
        let client = network.endpoint("client").await;
        client.connect(&host.local_peer()).await.unwrap();
        host.next_event().await;

        for i in 0..5u8 {
            client
                .send(&host.local_peer(), Bytes::from(vec![i]))
                .await
                .unwrap();
        }

        for i in 0..5u8 {
            let Some(TransportEvent::Frame { peer, bytes }) = host.next_event().await else {
                panic!("expected frame");
            };
            assert_eq!(peer, PeerId::new("client"));
            assert_eq!(bytes, Bytes::from(vec![i]));
        }
    }

    #[tokio::test]
    async fn test_send_without_link_fails() {
        let network = MemoryNetwork::new();
        let host = network.endpoint("host").await;
        let _client = network.endpoint("client").await;

        let result = host.send(&PeerId::new("client"), Bytes::new()).await;
        assert!(matches!(result, Err(crate::SyncError::PeerNotConnected(_))));
    }

    #[tokio::test]
    async fn test_close_notifies_both_ends_once() {
        let network = MemoryNetwork::new();
        let host = network.endpoint("host").await;
        let client = network.endpoint("client").await;
        client.connect(&host.local_peer()).await.unwrap();
        client.next_event().await;
        host.next_event().await;

        host.close(&client.local_peer()).await.unwrap();
        host.close(&client.local_peer()).await.unwrap();

        assert_eq!(
            client.next_event().await,
            Some(TransportEvent::Closed {
                peer: PeerId::new("host")
            })
        );
        assert_eq!(
            host.next_event().await,
            Some(TransportEvent::Closed {
                peer: PeerId::new("client")
            })
        );
        assert!(!network.is_linked(&host.local_peer(), &client.local_peer()).await);
    }

    #[tokio::test]
    async fn test_connect_to_missing_endpoint_fails() {
        let network = MemoryNetwork::new();
        let client = network.endpoint("client").await;
        assert!(client.connect(&PeerId::new("nobody")).await.is_err());
    }
}
