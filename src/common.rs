//! Identifiers, peer records and the routing table structures built on them.

mod closest_nodes;
mod id;
mod kbucket;
mod node;
mod routing_table;

pub use closest_nodes::*;
pub use id::*;
pub use kbucket::*;
pub use node::*;
pub use routing_table::*;
