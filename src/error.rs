//! Main Crate Error

use crate::common::{Id, PeerRecord};

#[derive(thiserror::Error, Debug)]
/// Kadcore crate error enum.
pub enum Error {
    /// The local node's own [Id] can not be stored in its routing table.
    #[error("Refusing to insert the local node id in its own routing table")]
    SelfInsertion,

    /// Lookup started with an empty routing table, no query was sent.
    #[error("Routing table has no peers to start a lookup from")]
    InsufficientPeers,

    /// Every peer queried during a lookup failed to answer.
    #[error("None of the {tried} queried peers responded to a lookup for {target}")]
    Unreachable { target: Id, tried: usize },

    /// Lookup reached its round limit without ever getting closer to the target.
    ///
    /// Contains the closest peers found anyway.
    #[error("Lookup did not get any closer to the target in {rounds} rounds")]
    NonConvergence {
        rounds: usize,
        closest: Box<[PeerRecord]>,
    },

    /// The thread running an awaited lookup exited without a result.
    #[error("Lookup thread exited before sending a result")]
    LookupAborted,

    #[error("Invalid Id size, expected 20, got {0}")]
    InvalidIdSize(usize),

    #[error("Invalid Id encoding, expected 40 hex characters, got {0:?}")]
    InvalidIdEncoding(String),
}

/// Alias for `Result<T, kadcore::Error>`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
