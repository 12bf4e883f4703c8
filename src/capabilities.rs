//! Network capabilities the routing core relies on, supplied by the surrounding node.

use std::{
    net::{SocketAddr, TcpStream},
    time::Duration,
};

use tracing::debug;

use crate::common::{Id, PeerRecord};
use crate::config::DEFAULT_PROBE_TIMEOUT;

#[derive(thiserror::Error, Debug)]
/// Failure of a single peer to answer a probe or a query.
///
/// These never fail a lookup or an insertion, they only decide which peers
/// are kept.
pub enum PeerError {
    #[error("Peer did not respond in time")]
    Timeout,

    #[error("Peer is unreachable: {0}")]
    Unreachable(String),

    #[error("Peer responded with a malformed answer: {0}")]
    Malformed(String),

    #[error(transparent)]
    /// Transparent [std::io::Error]
    Io(#[from] std::io::Error),
}

/// Liveness probe against a peer's address, used by k-buckets to decide whether
/// their least recently seen peer can be evicted.
///
/// Errors are treated as "not alive".
pub trait AliveChecker: Send + Sync {
    fn is_alive(&self, address: SocketAddr) -> Result<bool, PeerError>;
}

impl<F> AliveChecker for F
where
    F: Fn(SocketAddr) -> Result<bool, PeerError> + Send + Sync,
{
    fn is_alive(&self, address: SocketAddr) -> Result<bool, PeerError> {
        self(address)
    }
}

/// FIND_NODE: ask `peer` for the peers it knows closest to `target`.
///
/// Called concurrently for distinct peers. An error and an empty answer are
/// equivalent for the lookup, neither contributes candidates.
pub trait FindNode: Send + Sync {
    fn find_node(&self, target: Id, peer: &PeerRecord) -> Result<Vec<PeerRecord>, PeerError>;
}

impl<F> FindNode for F
where
    F: Fn(Id, &PeerRecord) -> Result<Vec<PeerRecord>, PeerError> + Send + Sync,
{
    fn find_node(&self, target: Id, peer: &PeerRecord) -> Result<Vec<PeerRecord>, PeerError> {
        self(target, peer)
    }
}

#[derive(Debug, Clone)]
/// [AliveChecker] considering a peer alive if a TCP connection to its address
/// can be established within a timeout.
pub struct TcpAliveChecker {
    timeout: Duration,
}

impl TcpAliveChecker {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for TcpAliveChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl AliveChecker for TcpAliveChecker {
    fn is_alive(&self, address: SocketAddr) -> Result<bool, PeerError> {
        TcpStream::connect_timeout(&address, self.timeout)?;

        Ok(true)
    }
}

/// Run a liveness probe, folding errors into "dead".
pub(crate) fn probe<C: AliveChecker + ?Sized>(checker: &C, peer: &PeerRecord) -> bool {
    match checker.is_alive(peer.address()) {
        Ok(alive) => alive,
        Err(error) => {
            debug!(id = ?peer.id(), address = ?peer.address(), ?error, "Liveness probe failed");
            false
        }
    }
}
