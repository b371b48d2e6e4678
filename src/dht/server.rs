use crate::codec::Payload;
use crate::dht::handler::{lock, RpcHandler};
use crate::dht::lookup::{lookup, LookupOutcome};
use crate::dht::network::DhtNetwork;
use crate::dht::{DhtStorage, KademliaConfig, KademliaError, NodeId, NodeInfo, RoutingTable};
use log::{debug, info, warn};
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Kademlia DHT引擎
///
/// 持有本地存储后端和路由表。`listen` 绑定传输层并开始服务其他节点，
/// 之后由 `bootstrap`、`get`、`set` 和 `set_digest` 驱动网络操作。
/// 所有方法都必须在tokio运行时内调用。
pub struct Server<S> {
    config: KademliaConfig,
    local_id: NodeId,
    storage: Arc<Mutex<S>>,
    routing_table: Arc<Mutex<RoutingTable>>,
    handler: Option<Arc<RpcHandler<S>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<S: DhtStorage + 'static> Server<S> {
    pub fn new(local_id: NodeId, storage: S, config: KademliaConfig) -> Self {
        let routing_table = RoutingTable::new(local_id.clone(), config.k_value);

        Self {
            config,
            local_id,
            storage: Arc::new(Mutex::new(storage)),
            routing_table: Arc::new(Mutex::new(routing_table)),
            handler: None,
            tasks: Vec::new(),
        }
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    /// 监听后的绑定地址
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.handler.as_ref().map(|handler| handler.network.local_addr())
    }

    pub fn is_listening(&self) -> bool {
        self.handler.is_some()
    }

    /// 路由表中的节点数
    pub fn peer_count(&self) -> usize {
        lock(&self.routing_table).len()
    }

    /// 对存储后端执行 `f`
    pub fn with_storage<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut lock(&self.storage))
    }

    /// 绑定UDP传输层并开始服务其他节点
    pub async fn listen(&mut self, addr: SocketAddr) -> Result<SocketAddr, KademliaError> {
        if let Some(bound) = self.local_addr() {
            warn!("Server already listening on {}", bound);
            return Ok(bound);
        }

        let (network, inbound_rx) = DhtNetwork::bind(addr).await?;
        let local_addr = network.local_addr();

        let handler = Arc::new(RpcHandler {
            local: NodeInfo::new(self.local_id.clone(), local_addr),
            config: self.config.clone(),
            storage: self.storage.clone(),
            routing_table: self.routing_table.clone(),
            network,
        });

        self.tasks.push(tokio::spawn(handler.clone().serve(inbound_rx)));
        self.tasks.push(tokio::spawn(refresh_loop(handler.clone())));
        self.handler = Some(handler);

        info!("Node {} listening on {}", self.local_id, local_addr);

        Ok(local_addr)
    }

    /// 通过给定节点加入网络。
    ///
    /// 并发ping所有节点，然后查找本节点ID以填充路由表。
    /// 返回应答的节点。
    pub async fn bootstrap(&self, peers: &[SocketAddr]) -> Result<Vec<NodeInfo>, KademliaError> {
        let handler = self.handler()?;

        info!("Bootstrapping with {} nodes", peers.len());

        let tasks: Vec<_> = peers
            .iter()
            .map(|&addr| {
                let handler = Arc::clone(handler);
                tokio::spawn(async move { (addr, handler.call_ping(addr).await) })
            })
            .collect();

        let mut joined = Vec::new();
        for task in tasks {
            match task.await {
                Ok((_, Ok(node))) => {
                    debug!("Successfully connected to bootstrap node {}", node);
                    joined.push(node);
                }
                Ok((addr, Err(e))) => warn!("Bootstrap node {} did not answer: {}", addr, e),
                Err(e) => warn!("Bootstrap task failed: {}", e),
            }
        }

        if !joined.is_empty() {
            lookup(handler, &self.local_id, false).await;
            info!("Bootstrap complete, {} peers known", self.peer_count());
        }

        Ok(joined)
    }

    /// 查找 `key`：先查本地存储，再查网络。
    ///
    /// 从网络找到的值会再存到查询过但没有该值的最近节点上。
    pub async fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Payload>, KademliaError> {
        let handler = self.handler()?;
        let dkey = NodeId::digest(key);

        if let Some(value) = lock(&self.storage).get(&dkey) {
            return Ok(Some(value));
        }

        if lock(&self.routing_table).is_empty() {
            warn!("There are no known neighbors to get key {}", dkey);
            return Ok(None);
        }

        match lookup(handler, &dkey, true).await {
            LookupOutcome::Value { value, cache_at } => {
                if let Some(node) = cache_at {
                    debug!("Caching {} at {}", dkey, node);
                    if let Err(e) = handler.call_store(&node, dkey, value.clone()).await {
                        debug!("Caching store failed: {}", e);
                    }
                }
                Ok(Some(value))
            }
            LookupOutcome::Nodes(_) => Ok(None),
        }
    }

    /// 在离键摘要最近的节点上存储 `value`
    pub async fn set(&self, key: impl AsRef<[u8]>, value: Payload) -> Result<bool, KademliaError> {
        self.set_digest(NodeId::digest(key), value).await
    }

    /// 以已计算摘要的键存储 `value`。
    ///
    /// 本节点比找到的最远节点更接近该键，或完全没有已知邻居时，值保存在本地。
    /// 返回是否有存储成功。假值会删除该键。
    pub async fn set_digest(&self, dkey: NodeId, value: Payload) -> Result<bool, KademliaError> {
        let handler = self.handler()?;

        if lock(&self.routing_table).is_empty() {
            debug!("No known neighbors, storing {} locally", dkey);
            lock(&self.storage).set(dkey, value);
            return Ok(true);
        }

        let nodes = match lookup(handler, &dkey, false).await {
            LookupOutcome::Nodes(nodes) => nodes,
            LookupOutcome::Value { .. } => Vec::new(),
        };

        debug!("Setting {} on {} nodes", dkey, nodes.len());

        let furthest = nodes.iter().map(|node| node.distance_to(&dkey)).max();
        let store_locally = match furthest {
            Some(furthest) => self.local_id.distance(&dkey) < furthest,
            None => true,
        };

        let mut stored = false;
        if store_locally {
            lock(&self.storage).set(dkey.clone(), value.clone());
            stored = true;
        }

        let tasks: Vec<_> = nodes
            .into_iter()
            .map(|node| {
                let handler = Arc::clone(handler);
                let dkey = dkey.clone();
                let value = value.clone();
                tokio::spawn(async move { handler.call_store(&node, dkey, value).await })
            })
            .collect();

        for task in tasks {
            match task.await {
                Ok(Ok(success)) => stored |= success,
                Ok(Err(e)) => debug!("Store failed: {}", e),
                Err(e) => warn!("Store task failed: {}", e),
            }
        }

        Ok(stored)
    }

    /// 停止服务并关闭传输层
    pub fn stop(&mut self) -> Result<(), KademliaError> {
        let handler = self.handler.take().ok_or(KademliaError::NotListening)?;

        for task in self.tasks.drain(..) {
            task.abort();
        }
        handler.network.stop();

        info!("Node {} stopped", self.local_id);

        Ok(())
    }

    fn handler(&self) -> Result<&Arc<RpcHandler<S>>, KademliaError> {
        self.handler.as_ref().ok_or(KademliaError::NotListening)
    }
}

impl<S> Drop for Server<S> {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(handler) = self.handler.take() {
            handler.network.stop();
        }
    }
}

impl<S: DhtStorage> fmt::Display for Server<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addr = match &self.handler {
            Some(handler) => handler.network.local_addr().to_string(),
            None => "stopped".to_string(),
        };

        write!(
            f,
            "Server(id={}, addr={}, peers={}, entries={})",
            &self.local_id.to_string()[..16],
            addr,
            lock(&self.routing_table).len(),
            lock(&self.storage).len()
        )
    }
}

/// 每隔 `refresh_interval` 刷新过期的桶，启用时重新发布旧条目
async fn refresh_loop<S: DhtStorage + 'static>(handler: Arc<RpcHandler<S>>) {
    let interval = handler.config.refresh_interval;
    if interval.is_zero() {
        debug!("Bucket refresh disabled");
        return;
    }

    let mut ticker = tokio::time::interval(interval);
    // 第一次tick立即完成
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let stale = lock(&handler.routing_table).buckets_needing_refresh(interval);
        if !stale.is_empty() {
            debug!("Refreshing {} buckets", stale.len());
        }
        for index in stale {
            let target = NodeId::random_in_bucket(&handler.local.id, index);
            lookup(&handler, &target, false).await;
            lock(&handler.routing_table).mark_refreshed(index);
        }

        if !handler.config.republish {
            continue;
        }

        let old_entries = lock(&handler.storage).entries_older_than(interval);
        if old_entries.is_empty() {
            continue;
        }

        debug!("Republishing {} entries", old_entries.len());
        for (dkey, value) in old_entries {
            let nodes = match lookup(&handler, &dkey, false).await {
                LookupOutcome::Nodes(nodes) => nodes,
                LookupOutcome::Value { .. } => continue,
            };
            for node in nodes {
                if let Err(e) = handler.call_store(&node, dkey.clone(), value.clone()).await {
                    debug!("Republish to {} failed: {}", node, e);
                }
            }
            lock(&handler.storage).set(dkey, value);
        }
    }
}
