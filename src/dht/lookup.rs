use crate::codec::Payload;
use crate::dht::handler::{lock, RpcHandler};
use crate::dht::protocol::FindValueResult;
use crate::dht::{DhtStorage, NodeId, NodeInfo};
use log::{debug, warn};
use std::collections::HashSet;
use std::sync::Arc;

/// 迭代查找的结果
#[derive(Debug)]
pub(crate) enum LookupOutcome {
    /// 有节点返回了该键的值；`cache_at` 为已查询但没有该值的最近节点
    Value {
        value: Payload,
        cache_at: Option<NodeInfo>,
    },
    /// 应答过的k个最近节点
    Nodes(Vec<NodeInfo>),
}

/// Kademlia迭代查找
///
/// 从路由表中最近的k个联系人开始，每轮查询`alpha`个尚未询问的最近节点，
/// 合并它们返回的节点，直到候选列表中的节点都已查询。
/// 未应答的节点从候选列表中移除。
/// 设置`find_value`时，在第一个得到值的轮次结束查找。
pub(crate) async fn lookup<S: DhtStorage + 'static>(
    handler: &Arc<RpcHandler<S>>,
    target: &NodeId,
    find_value: bool,
) -> LookupOutcome {
    let k = handler.config.k_value;
    let alpha = handler.config.alpha_value.max(1);

    let mut shortlist = lock(&handler.routing_table).get_closest(target, k, None);
    let mut queried: HashSet<NodeId> = HashSet::new();
    let mut without_value: Vec<NodeInfo> = Vec::new();

    debug!("Starting lookup for {} with {} initial nodes", target, shortlist.len());

    loop {
        let to_query: Vec<NodeInfo> = shortlist
            .iter()
            .filter(|node| !queried.contains(&node.id))
            .take(alpha)
            .cloned()
            .collect();

        if to_query.is_empty() {
            break;
        }

        // 并行查询选中的节点
        let mut tasks = Vec::with_capacity(to_query.len());
        for node in to_query {
            queried.insert(node.id.clone());

            let handler = Arc::clone(handler);
            let target = target.clone();
            tasks.push(tokio::spawn(async move {
                let result = if find_value {
                    handler.call_find_value(&node, &target).await
                } else {
                    handler
                        .call_find_node(&node, &target)
                        .await
                        .map(FindValueResult::NotFound)
                };
                (node, result)
            }));
        }

        let mut found = None;
        for task in tasks {
            let (node, result) = match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Lookup task failed: {}", e);
                    continue;
                }
            };

            match result {
                Ok(FindValueResult::Found(value)) => {
                    debug!("Found value for {} at {}", target, node);
                    found.get_or_insert(value);
                }
                Ok(FindValueResult::NotFound(nodes)) => {
                    if find_value {
                        without_value.push(node);
                    }
                    for candidate in nodes {
                        if candidate.id != handler.local.id && !shortlist.iter().any(|n| n.id == candidate.id) {
                            shortlist.push(candidate);
                        }
                    }
                }
                Err(e) => {
                    debug!("Dropping {} from lookup: {}", node, e);
                    shortlist.retain(|n| n.id != node.id);
                }
            }
        }

        if let Some(value) = found {
            let cache_at = without_value.into_iter().min_by_key(|node| node.distance_to(target));
            return LookupOutcome::Value { value, cache_at };
        }

        // 按距离排序并保留最近的k个节点
        shortlist.sort_by_key(|node| node.distance_to(target));
        shortlist.truncate(k);
    }

    debug!("Lookup for {} completed with {} nodes", target, shortlist.len());
    LookupOutcome::Nodes(shortlist)
}
