//! Struct and implementation of the peer entry in the Kademlia routing table
use std::{
    fmt::{self, Debug, Formatter},
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use rand::Rng;

use crate::common::Id;

#[derive(Clone, PartialEq)]
/// Peer entry in the Kademlia routing table, cheap to clone.
///
/// Two records with the same [Id] denote the same peer, even if their
/// addresses differ (the peer may have moved).
pub struct PeerRecord(pub(crate) Arc<PeerInner>);

#[derive(Clone, PartialEq)]
pub(crate) struct PeerInner {
    pub(crate) id: Id,
    pub(crate) address: SocketAddr,
    pub(crate) payload: Bytes,
    pub(crate) latency: Option<Duration>,
}

impl PeerRecord {
    /// Creates a new peer record from an id and socket address.
    pub fn new(id: Id, address: SocketAddr) -> PeerRecord {
        PeerRecord(Arc::new(PeerInner {
            id,
            address,
            payload: Bytes::new(),
            latency: None,
        }))
    }

    /// Creates a peer with a random Id and a random IPv4 address.
    pub fn random() -> PeerRecord {
        let mut rng = rand::thread_rng();

        PeerRecord::new(
            Id::random(),
            SocketAddrV4::new(Ipv4Addr::from(rng.gen::<u32>()), rng.gen()).into(),
        )
    }

    // === Options ===

    /// Attach an opaque application payload to this peer.
    pub fn with_payload<T: Into<Bytes>>(mut self, payload: T) -> Self {
        Arc::make_mut(&mut self.0).payload = payload.into();
        self
    }

    /// Record the last measured round trip time to this peer.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        Arc::make_mut(&mut self.0).latency = Some(latency);
        self
    }

    pub fn with_address(mut self, address: SocketAddr) -> Self {
        Arc::make_mut(&mut self.0).address = address;
        self
    }

    // === Getters ===

    pub fn id(&self) -> &Id {
        &self.0.id
    }

    pub fn address(&self) -> SocketAddr {
        self.0.address
    }

    pub fn payload(&self) -> &Bytes {
        &self.0.payload
    }

    /// Last measured round trip time, if any.
    pub fn latency(&self) -> Option<Duration> {
        self.0.latency
    }

    /// Returns true if both records denote the same peer, regardless of address.
    pub fn same_peer(&self, other: &PeerRecord) -> bool {
        self.id() == other.id()
    }
}

impl Debug for PeerRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerRecord")
            .field("id", &self.0.id)
            .field("address", &self.0.address)
            .field("latency", &self.0.latency)
            .finish()
    }
}
