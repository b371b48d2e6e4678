use crate::dht::kademlia::{NodeId, NodeInfo, ID_LENGTH};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const BUCKET_COUNT: usize = ID_LENGTH * 8; // 桶的数量，对应NodeId的比特数

/// 路由表实现，基于Kademlia的k-bucket结构
pub struct RoutingTable {
    /// 本地节点ID
    local_id: NodeId,

    /// k值，每个bucket中存放的最大节点数
    bucket_size: usize,

    /// k-buckets，最近看到的节点在队尾
    buckets: Vec<VecDeque<NodeInfo>>,

    /// 上次刷新每个bucket的时间
    last_refresh: Vec<Instant>,
}

impl RoutingTable {
    /// 创建新的路由表
    pub fn new(local_id: NodeId, bucket_size: usize) -> Self {
        let now = Instant::now();

        Self {
            local_id,
            bucket_size,
            buckets: (0..BUCKET_COUNT).map(|_| VecDeque::with_capacity(bucket_size)).collect(),
            last_refresh: vec![now; BUCKET_COUNT],
        }
    }

    /// 计算应该放入哪个bucket（距离的前导零位数）
    pub fn bucket_index(&self, id: &NodeId) -> usize {
        let distance = self.local_id.distance(id);

        for (i, &byte) in distance.iter().enumerate() {
            if byte != 0 {
                return i * 8 + byte.leading_zeros() as usize;
            }
        }

        // 所有字节都是0，这是本地节点自己
        BUCKET_COUNT - 1
    }

    /// 添加或更新节点，返回是否是新节点
    pub fn update_node(&mut self, node: NodeInfo) -> bool {
        // 不添加本地节点
        if node.id == self.local_id {
            return false;
        }

        let index = self.bucket_index(&node.id);
        self.last_refresh[index] = Instant::now();
        let bucket = &mut self.buckets[index];

        if let Some(pos) = bucket.iter().position(|n| n.id == node.id) {
            // 节点已存在，移到队列末尾（最近看到的），地址以最新的为准
            bucket.remove(pos);
            bucket.push_back(node);
            return false;
        }

        if bucket.len() < self.bucket_size {
            bucket.push_back(node);
            return true;
        }

        // Bucket已满，保留长期在线的旧节点，忽略新节点
        false
    }

    /// 移除节点（通常是因为RPC失败）
    pub fn remove_node(&mut self, id: &NodeId) -> Option<NodeInfo> {
        let index = self.bucket_index(id);
        let bucket = &mut self.buckets[index];
        let pos = bucket.iter().position(|n| &n.id == id)?;
        bucket.remove(pos)
    }

    /// 检查节点是否在路由表中
    pub fn contains(&self, id: &NodeId) -> bool {
        let index = self.bucket_index(id);
        self.buckets[index].iter().any(|n| &n.id == id)
    }

    /// 获取离目标最近的count个节点，可排除一个节点（通常是请求者）
    pub fn get_closest(&self, target: &NodeId, count: usize, exclude: Option<&NodeId>) -> Vec<NodeInfo> {
        let mut nodes: Vec<NodeInfo> = self
            .buckets
            .iter()
            .flatten()
            .filter(|node| Some(&node.id) != exclude)
            .cloned()
            .collect();

        nodes.sort_by_key(|node| node.distance_to(target));
        nodes.truncate(count);
        nodes
    }

    /// 返回超过刷新间隔未被访问的bucket索引（只包括非空的bucket）
    pub fn buckets_needing_refresh(&self, refresh_interval: Duration) -> Vec<usize> {
        self.last_refresh
            .iter()
            .enumerate()
            .filter(|(i, last)| !self.buckets[*i].is_empty() && last.elapsed() >= refresh_interval)
            .map(|(i, _)| i)
            .collect()
    }

    /// 标记bucket已刷新
    pub fn mark_refreshed(&mut self, index: usize) {
        if let Some(last) = self.last_refresh.get_mut(index) {
            *last = Instant::now();
        }
    }

    /// 路由表中节点的数量
    pub fn len(&self) -> usize {
        self.buckets.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn node(port: u16) -> NodeInfo {
        NodeInfo::new(
            NodeId::random(),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port),
        )
    }

    #[test]
    fn test_update_and_remove() {
        let mut table = RoutingTable::new(NodeId::random(), 20);
        let peer = node(9000);

        assert!(table.update_node(peer.clone()));
        assert!(!table.update_node(peer.clone()));
        assert!(table.contains(&peer.id));
        assert_eq!(table.len(), 1);

        assert_eq!(table.remove_node(&peer.id), Some(peer.clone()));
        assert!(!table.contains(&peer.id));
        assert!(table.is_empty());
    }

    #[test]
    fn test_local_node_is_ignored() {
        let local = NodeId::random();
        let mut table = RoutingTable::new(local.clone(), 20);

        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000);
        assert!(!table.update_node(NodeInfo::new(local, addr)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_get_closest_sorted_and_excluding() {
        let mut table = RoutingTable::new(NodeId::random(), 20);
        let peers: Vec<NodeInfo> = (0..10).map(|i| node(9000 + i)).collect();
        for peer in &peers {
            table.update_node(peer.clone());
        }

        let target = NodeId::random();
        let closest = table.get_closest(&target, 5, None);
        assert_eq!(closest.len(), 5);
        for pair in closest.windows(2) {
            assert!(pair[0].distance_to(&target) <= pair[1].distance_to(&target));
        }

        let excluded = table.get_closest(&target, 20, Some(&peers[0].id));
        assert_eq!(excluded.len(), 9);
        assert!(excluded.iter().all(|n| n.id != peers[0].id));
    }

    #[test]
    fn test_full_bucket_keeps_old_nodes() {
        let local = NodeId::random();
        let mut table = RoutingTable::new(local.clone(), 2);

        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000);
        let ids: Vec<NodeId> = (0..3).map(|_| NodeId::random_in_bucket(&local, 3)).collect();

        assert!(table.update_node(NodeInfo::new(ids[0].clone(), addr)));
        assert!(table.update_node(NodeInfo::new(ids[1].clone(), addr)));
        assert!(!table.update_node(NodeInfo::new(ids[2].clone(), addr)));

        assert!(table.contains(&ids[0]));
        assert!(!table.contains(&ids[2]));
    }

    #[test]
    fn test_buckets_needing_refresh() {
        let mut table = RoutingTable::new(NodeId::random(), 20);
        let peer = node(9000);
        table.update_node(peer.clone());

        let index = table.bucket_index(&peer.id);
        assert!(table.buckets_needing_refresh(Duration::from_secs(60)).is_empty());
        assert_eq!(table.buckets_needing_refresh(Duration::ZERO), vec![index]);

        table.mark_refreshed(index);
        assert!(table.buckets_needing_refresh(Duration::from_secs(60)).is_empty());
    }
}
