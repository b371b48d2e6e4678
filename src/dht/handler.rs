use crate::codec::Payload;
use crate::dht::network::DhtNetwork;
use crate::dht::protocol::{DhtMessage, FindValueResult, MessageRoute, Rpc};
use crate::dht::{DhtStorage, KademliaConfig, KademliaError, NodeId, NodeInfo, RoutingTable};
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 监听中服务器的RPC层
///
/// 用本地存储和路由表应答入站请求，并发出出站请求，
/// 根据节点是否应答维护路由表。
pub(crate) struct RpcHandler<S> {
    pub(crate) local: NodeInfo,
    pub(crate) config: KademliaConfig,
    pub(crate) storage: Arc<Mutex<S>>,
    pub(crate) routing_table: Arc<Mutex<RoutingTable>>,
    pub(crate) network: DhtNetwork,
}

impl<S: DhtStorage + 'static> RpcHandler<S> {
    /// 处理入站请求，直到传输层关闭通道
    pub(crate) async fn serve(self: Arc<Self>, mut inbound_rx: mpsc::Receiver<MessageRoute>) {
        while let Some(route) = inbound_rx.recv().await {
            let from = route.from;
            if let Err(e) = self.handle_request(route).await {
                warn!("Failed to answer request from {}: {}", from, e);
            }
        }

        debug!("Request handler stopped");
    }

    async fn handle_request(self: &Arc<Self>, route: MessageRoute) -> Result<(), KademliaError> {
        let MessageRoute { from, message } = route;

        // 以数据报的来源地址为准，而不是节点自报的地址
        let sender = message.sender.with_addr(from);
        self.welcome_if_new(&sender);

        let k = self.config.k_value;
        let reply = match message.rpc {
            Rpc::Ping => {
                debug!("Received ping from {}", sender);
                Rpc::Pong
            }
            Rpc::FindNode { target } => {
                debug!("Received find_node request for {} from {}", target, sender);
                let nodes = lock(&self.routing_table).get_closest(&target, k, Some(&sender.id));
                Rpc::Nodes { nodes }
            }
            Rpc::FindValue { key } => {
                debug!("Received find_value request for {} from {}", key, sender);
                let stored = lock(&self.storage).get(&key);
                let result = match stored {
                    Some(value) => FindValueResult::Found(value),
                    None => FindValueResult::NotFound(lock(&self.routing_table).get_closest(&key, k, Some(&sender.id))),
                };
                Rpc::Value { result }
            }
            Rpc::Store { key, value } => {
                debug!("Storing {} ({}) for {}", key, value.kind(), sender);
                lock(&self.storage).set(key, value);
                Rpc::Stored { success: true }
            }
            other => {
                debug!("Ignoring unexpected {} from {}", other.name(), from);
                return Ok(());
            }
        };

        let reply = DhtMessage::reply(self.local.clone(), message.message_id, reply);
        self.network.send_response(from, reply).await
    }

    /// 将节点加入路由表。
    ///
    /// 首次出现的节点会收到它现在负责的所有条目：
    /// 它比最远的已知邻居更近，且本节点比最近的邻居更近。
    pub(crate) fn welcome_if_new(self: &Arc<Self>, node: &NodeInfo) {
        let known = node.id == self.local.id || lock(&self.routing_table).contains(&node.id);
        if known {
            lock(&self.routing_table).update_node(node.clone());
            return;
        }

        info!("Welcoming new node {}", node);

        let entries = lock(&self.storage).entries();
        for (key, value) in entries {
            let neighbors = lock(&self.routing_table).get_closest(&key, self.config.k_value, None);

            let transfer = match (neighbors.first(), neighbors.last()) {
                (Some(first), Some(last)) => {
                    let new_node_close = node.distance_to(&key) < last.distance_to(&key);
                    let this_closest = self.local.distance_to(&key) < first.distance_to(&key);
                    new_node_close && this_closest
                }
                _ => true,
            };

            if transfer {
                let handler = Arc::clone(self);
                let target = node.clone();
                tokio::spawn(async move {
                    if let Err(e) = handler.call_store(&target, key, value).await {
                        debug!("Failed to hand over key to {}: {}", target, e);
                    }
                });
            }
        }

        lock(&self.routing_table).update_node(node.clone());
    }

    /// 发送请求并将结果记录到路由表
    async fn call(&self, node: &NodeInfo, rpc: Rpc) -> Result<Rpc, KademliaError> {
        let request = DhtMessage::request(self.local.clone(), rpc);

        match self
            .network
            .send_request(node.addr, request, self.config.request_timeout)
            .await
        {
            Ok(response) => {
                let responder = response.sender.with_addr(node.addr);
                lock(&self.routing_table).update_node(responder);
                Ok(response.rpc)
            }
            Err(e) => {
                debug!("No response from {}, removing it from the routing table: {}", node, e);
                lock(&self.routing_table).remove_node(&node.id);
                Err(e)
            }
        }
    }

    /// ping一个尚不知道节点ID的地址
    pub(crate) async fn call_ping(&self, addr: SocketAddr) -> Result<NodeInfo, KademliaError> {
        let request = DhtMessage::request(self.local.clone(), Rpc::Ping);
        let response = self
            .network
            .send_request(addr, request, self.config.request_timeout)
            .await?;

        match response.rpc {
            Rpc::Pong => {
                let node = response.sender.with_addr(addr);
                lock(&self.routing_table).update_node(node.clone());
                Ok(node)
            }
            _ => Err(KademliaError::UnexpectedResponse(addr)),
        }
    }

    pub(crate) async fn call_find_node(&self, node: &NodeInfo, target: &NodeId) -> Result<Vec<NodeInfo>, KademliaError> {
        match self.call(node, Rpc::FindNode { target: target.clone() }).await? {
            Rpc::Nodes { nodes } => Ok(nodes),
            _ => Err(KademliaError::UnexpectedResponse(node.addr)),
        }
    }

    pub(crate) async fn call_find_value(&self, node: &NodeInfo, key: &NodeId) -> Result<FindValueResult, KademliaError> {
        match self.call(node, Rpc::FindValue { key: key.clone() }).await? {
            Rpc::Value { result } => Ok(result),
            _ => Err(KademliaError::UnexpectedResponse(node.addr)),
        }
    }

    pub(crate) async fn call_store(&self, node: &NodeInfo, key: NodeId, value: Payload) -> Result<bool, KademliaError> {
        match self.call(node, Rpc::Store { key, value }).await? {
            Rpc::Stored { success } => Ok(success),
            _ => Err(KademliaError::UnexpectedResponse(node.addr)),
        }
    }
}
