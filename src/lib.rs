//! Grid节点：带TTL存储和阻塞式键值接口的Kademlia DHT节点

pub mod cli;
pub mod codec;
pub mod dht;
pub mod node;
pub mod utils;

pub use codec::{decode, encode, CodecError, Payload, Value};
pub use dht::{DhtStorage, KademliaConfig, Server, TtlStorage, Truthy};
pub use node::{Node, NodeError, NodeOptions, NodeState};
pub use utils::{setup_logger, Settings};
