use crate::codec::Payload;
use crate::dht::{NodeId, NodeInfo};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// 节点之间交换的数据报
///
/// 请求的 `message_id` 由传输层分配，回复携带其所应答请求的id。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhtMessage {
    /// 发送方自报的联系信息
    pub sender: NodeInfo,
    pub message_id: u64,
    pub rpc: Rpc,
}

/// 消息携带的RPC
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Rpc {
    Ping,
    Pong,

    /// 查找离目标最近的k个节点
    FindNode { target: NodeId },
    Nodes { nodes: Vec<NodeInfo> },

    /// 查找特定键的值，找不到时返回最近的节点
    FindValue { key: NodeId },
    Value { result: FindValueResult },

    /// 存储键值对（Null值表示删除）
    Store { key: NodeId, value: Payload },
    Stored { success: bool },
}

/// FindValue操作的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FindValueResult {
    Found(Payload),
    NotFound(Vec<NodeInfo>),
}

impl Rpc {
    pub fn is_response(&self) -> bool {
        matches!(self, Rpc::Pong | Rpc::Nodes { .. } | Rpc::Value { .. } | Rpc::Stored { .. })
    }

    /// 日志中使用的简短名称
    pub fn name(&self) -> &'static str {
        match self {
            Rpc::Ping => "ping",
            Rpc::Pong => "pong",
            Rpc::FindNode { .. } => "find_node",
            Rpc::Nodes { .. } => "nodes",
            Rpc::FindValue { .. } => "find_value",
            Rpc::Value { .. } => "value",
            Rpc::Store { .. } => "store",
            Rpc::Stored { .. } => "stored",
        }
    }
}

impl DhtMessage {
    /// 请求，发送时由传输层分配id
    pub fn request(sender: NodeInfo, rpc: Rpc) -> Self {
        Self {
            sender,
            message_id: 0,
            rpc,
        }
    }

    /// 对id为 `message_id` 的请求的回复
    pub fn reply(sender: NodeInfo, message_id: u64, rpc: Rpc) -> Self {
        Self {
            sender,
            message_id,
            rpc,
        }
    }

    pub fn is_response(&self) -> bool {
        self.rpc.is_response()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

impl fmt::Display for DhtMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{} from {}", self.rpc.name(), self.message_id, self.sender)
    }
}

/// 入站消息及其实际来源地址
#[derive(Debug, Clone)]
pub struct MessageRoute {
    pub from: SocketAddr,
    pub message: DhtMessage,
}

impl MessageRoute {
    pub fn new(from: SocketAddr, message: DhtMessage) -> Self {
        Self { from, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn sender() -> NodeInfo {
        NodeInfo::new(
            NodeId::random(),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8000),
        )
    }

    #[test]
    fn test_message_serialization() {
        let message = DhtMessage::reply(
            sender(),
            12345,
            Rpc::Store {
                key: NodeId::digest("alpha"),
                value: Payload::Int(42),
            },
        );

        let bytes = message.to_bytes().unwrap();
        let decoded = DhtMessage::from_bytes(&bytes).unwrap();

        assert_eq!(decoded.message_id, 12345);
        assert_eq!(decoded.sender, message.sender);
        match decoded.rpc {
            Rpc::Store { key, value } => {
                assert_eq!(key, NodeId::digest("alpha"));
                assert_eq!(value, Payload::Int(42));
            }
            other => panic!("Expected store, got {:?}", other),
        }
    }

    #[test]
    fn test_requests_and_responses() {
        let ping = DhtMessage::request(sender(), Rpc::Ping);
        assert_eq!(ping.message_id, 0);
        assert!(!ping.is_response());

        let found = DhtMessage::reply(sender(), 3, Rpc::Value { result: FindValueResult::NotFound(vec![]) });
        assert!(found.is_response());
        assert!(found.to_string().starts_with("value#3 from "));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(DhtMessage::from_bytes(&[0xff, 0xff, 0xff, 0xff, 0x01]).is_err());
    }
}
