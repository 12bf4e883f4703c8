#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

mod capabilities;
mod common;
mod config;
mod error;
mod lookup;
mod table;
mod testnet;

#[cfg(feature = "async")]
pub mod async_lookup;

pub use crate::capabilities::{AliveChecker, FindNode, PeerError, TcpAliveChecker};
pub use crate::common::{
    closest_of, k_closest, Admission, ClosestNodes, Distance, Id, KBucket, PeerRecord,
    RoutingTable, ID_SIZE, MAX_DISTANCE,
};
pub use crate::config::{
    LookupConfig, SelectionStrategy, TableConfig, DEFAULT_ALPHA, DEFAULT_K, DEFAULT_MAX_ROUNDS,
    DEFAULT_PROBE_TIMEOUT, DEFAULT_REFRESH_INTERVAL,
};
pub use crate::error::{Error, Result};
pub use crate::lookup::{Lookup, LookupResult, Termination};
pub use crate::table::SharedRoutingTable;
pub use crate::testnet::Testnet;

pub use bytes::Bytes;
