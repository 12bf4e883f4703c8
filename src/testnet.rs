//! In-process simulated network, to run lookups without sockets.

use std::{
    collections::{HashMap, HashSet},
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread,
    time::Duration,
};

use crate::capabilities::{AliveChecker, FindNode, PeerError};
use crate::common::{Id, PeerRecord, RoutingTable};
use crate::config::TableConfig;
use crate::table::SharedRoutingTable;

#[derive(Debug, Clone)]
/// Create a testnet of peers that all know each other, subject to the limits of
/// their own routing tables.
///
/// Implements [FindNode] by answering from the queried peer's routing table, and
/// [AliveChecker] by the peer's online status.
pub struct Testnet {
    inner: Arc<TestnetInner>,
}

#[derive(Debug)]
struct TestnetInner {
    peers: Vec<PeerRecord>,
    tables: HashMap<Id, RoutingTable>,
    addresses: HashMap<SocketAddr, Id>,
    offline: Mutex<HashSet<Id>>,
    latencies: Mutex<HashMap<Id, Duration>>,
    queries: AtomicUsize,
}

impl Testnet {
    pub fn new(size: usize) -> Testnet {
        Testnet::with_config(size, TableConfig::default())
    }

    pub fn with_config(size: usize, config: TableConfig) -> Testnet {
        let peers: Vec<PeerRecord> = (0..size)
            .map(|i| PeerRecord::new(Id::random(), testnet_address(i)))
            .collect();

        let always_alive = |_: SocketAddr| -> Result<bool, PeerError> { Ok(true) };

        let mut tables = HashMap::with_capacity(size);

        for peer in &peers {
            let mut table = RoutingTable::with_config(*peer.id(), config.clone());

            for other in &peers {
                if other.id() != peer.id() {
                    let _ = table.add(other.clone(), &always_alive);
                }
            }

            tables.insert(*peer.id(), table);
        }

        let addresses = peers
            .iter()
            .map(|peer| (peer.address(), *peer.id()))
            .collect();

        Testnet {
            inner: Arc::new(TestnetInner {
                peers,
                tables,
                addresses,
                offline: Mutex::new(HashSet::new()),
                latencies: Mutex::new(HashMap::new()),
                queries: AtomicUsize::new(0),
            }),
        }
    }

    // === Getters ===

    pub fn peers(&self) -> &[PeerRecord] {
        &self.inner.peers
    }

    pub fn size(&self) -> usize {
        self.inner.peers.len()
    }

    /// Routing table of the peer with `id`.
    pub fn table(&self, id: &Id) -> Option<&RoutingTable> {
        self.inner.tables.get(id)
    }

    /// Number of FIND_NODE queries answered or refused so far.
    pub fn queries(&self) -> usize {
        self.inner.queries.load(Ordering::SeqCst)
    }

    pub fn is_offline(&self, id: &Id) -> bool {
        self.inner
            .offline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    /// The `k` peers of the whole network closest to `target`, whatever their status.
    pub fn closest_to(&self, target: &Id, k: usize) -> Vec<PeerRecord> {
        let mut peers = self.inner.peers.clone();
        peers.sort_by_key(|peer| peer.id().distance(target));
        peers.truncate(k);

        peers
    }

    // === Public Methods ===

    pub fn set_offline(&self, id: &Id, offline: bool) {
        let mut set = self
            .inner
            .offline
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if offline {
            set.insert(*id);
        } else {
            set.remove(id);
        }
    }

    /// Make the peer with `id` sleep for `latency` before answering queries.
    pub fn set_latency(&self, id: &Id, latency: Duration) {
        self.inner
            .latencies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(*id, latency);
    }

    /// A routing table for a new node outside of the testnet, that only knows
    /// `bootstrap` random peers of it.
    pub fn joining_table(&self, bootstrap: usize) -> SharedRoutingTable {
        let table = SharedRoutingTable::new(Id::random(), self.clone());

        let mut rng = rand::thread_rng();

        for peer in rand::seq::index::sample(&mut rng, self.size(), bootstrap.min(self.size())) {
            let _ = table.add(self.inner.peers[peer].clone());
        }

        table
    }
}

impl FindNode for Testnet {
    fn find_node(&self, target: Id, peer: &PeerRecord) -> Result<Vec<PeerRecord>, PeerError> {
        self.inner.queries.fetch_add(1, Ordering::SeqCst);

        if self.is_offline(peer.id()) {
            return Err(PeerError::Unreachable(peer.address().to_string()));
        }

        let latency = self
            .inner
            .latencies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer.id())
            .copied();

        if let Some(latency) = latency {
            thread::sleep(latency);
        }

        match self.inner.tables.get(peer.id()) {
            Some(table) => Ok(table.closest(&target).into_vec()),
            None => Err(PeerError::Unreachable(peer.address().to_string())),
        }
    }
}

impl AliveChecker for Testnet {
    fn is_alive(&self, address: SocketAddr) -> Result<bool, PeerError> {
        match self.inner.addresses.get(&address) {
            Some(id) => Ok(!self.is_offline(id)),
            None => Err(PeerError::Unreachable(address.to_string())),
        }
    }
}

/// Unique loopback address of the `i`th testnet peer.
fn testnet_address(i: usize) -> SocketAddr {
    let ip = u32::from(Ipv4Addr::new(127, 0, 0, 1)).wrapping_add(i as u32);

    SocketAddrV4::new(Ipv4Addr::from(ip), 6881).into()
}
