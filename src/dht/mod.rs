mod handler;
mod kademlia;
mod lookup;
mod network;
mod protocol;
mod routing;
mod server;
mod storage;

pub use kademlia::{KademliaConfig, KademliaError, NodeId, NodeInfo, ID_LENGTH};
pub use network::DhtNetwork;
pub use protocol::{DhtMessage, FindValueResult, MessageRoute, Rpc};
pub use routing::RoutingTable;
pub use server::Server;
pub use storage::{DhtStorage, TtlStorage, Truthy, DEFAULT_STORAGE_TTL};

/*
 * Distributed Hash Table (DHT) engine for grid nodes
 *
 * A compact Kademlia implementation:
 *
 * 1. Transport - UDP datagrams carrying bincode-encoded DhtMessage values,
 *    with request/response correlation by message id and per-request timeouts
 * 2. Routing   - XOR-distance k-buckets
 * 3. Lookup    - alpha-parallel iterative node/value lookup
 * 4. Storage   - pluggable backend (DhtStorage), TtlStorage by default
 *
 * Keys are addressed by their SHA-256 digest.
 */
