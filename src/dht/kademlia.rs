use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Length of node ids and key digests in bytes
pub const ID_LENGTH: usize = 32;

#[derive(Error, Debug)]
pub enum KademliaError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("Message encoding failed: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Request {message_id} to {addr} timed out")]
    Timeout { addr: SocketAddr, message_id: u64 },

    #[error("Unexpected response from {0}")]
    UnexpectedResponse(SocketAddr),

    #[error("Server is not listening")]
    NotListening,

    #[error("DHT operation failed: {0}")]
    OperationFailed(String),
}

/// Configuration for the Kademlia engine
#[derive(Debug, Clone)]
pub struct KademliaConfig {
    /// The number of nodes to keep in each k-bucket and to return from lookups
    pub k_value: usize,
    /// The number of nodes to query in parallel during lookups
    pub alpha_value: usize,
    /// Upper bound on every RPC round trip
    pub request_timeout: Duration,
    /// The interval for refreshing stale buckets and republishing old keys
    pub refresh_interval: Duration,
    /// Whether entries older than `refresh_interval` are pushed to the network again.
    /// Republishing resets their age, so stored entries then outlive the storage ttl.
    pub republish: bool,
}

impl Default for KademliaConfig {
    fn default() -> Self {
        Self {
            k_value: 20,
            alpha_value: 3,
            request_timeout: Duration::from_secs(5),
            refresh_interval: Duration::from_secs(3600), // 1 hour
            republish: false,
        }
    }
}

/// Identifier of a node, and of a key's content address
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub [u8; ID_LENGTH]);

impl NodeId {
    /// Derives an id from arbitrary bytes (SHA-256)
    pub fn digest(data: impl AsRef<[u8]>) -> Self {
        let digest = ring::digest::digest(&ring::digest::SHA256, data.as_ref());

        let mut id = [0u8; ID_LENGTH];
        id.copy_from_slice(digest.as_ref());

        Self(id)
    }

    /// Generates a random NodeId
    pub fn random() -> Self {
        let mut id = [0u8; ID_LENGTH];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut id);
        Self(id)
    }

    /// Generates a random id that falls into bucket `index` of `local`'s routing table.
    ///
    /// The id shares the first `index` bits with `local` and differs at bit `index`.
    pub fn random_in_bucket(local: &NodeId, index: usize) -> Self {
        let mut id = Self::random().0;
        let index = index.min(ID_LENGTH * 8 - 1);

        for bit in 0..=index {
            let byte = bit / 8;
            let mask = 0x80u8 >> (bit % 8);
            let local_bit = local.0[byte] & mask;
            let wanted = if bit < index { local_bit } else { !local_bit & mask };
            id[byte] = (id[byte] & !mask) | wanted;
        }

        Self(id)
    }

    /// Calculates the XOR distance between two NodeIds
    pub fn distance(&self, other: &Self) -> [u8; ID_LENGTH] {
        let mut result = [0u8; ID_LENGTH];

        for (i, byte) in result.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }

        result
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", hex::encode(&self.0[..6]))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Contact information for a node in the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// The node's ID
    pub id: NodeId,
    /// The node's network address
    pub addr: SocketAddr,
}

impl NodeInfo {
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self { id, addr }
    }

    /// XOR distance from this node to `target`
    pub fn distance_to(&self, target: &NodeId) -> [u8; ID_LENGTH] {
        self.id.distance(target)
    }

    /// Same node, reached at `addr`
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", &self.id.to_string()[..16], self.addr)
    }
}
