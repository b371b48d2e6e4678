use grid_node::node::{Node, NodeOptions, NodeState};
use grid_node::Value;
use std::thread::sleep;
use std::time::Duration;
use uuid::Uuid;

const TTL: Duration = Duration::from_secs(2);

fn node_options(port: u16) -> NodeOptions {
    NodeOptions {
        port,
        ttl: TTL,
        ..NodeOptions::default()
    }
}

/// 节点A监听8690，节点B在8691上通过A加入网络
#[test]
fn test_two_nodes_end_to_end() {
    let mut node_a = Node::new(node_options(8690)).unwrap();
    assert_eq!(node_a.state(), NodeState::Listening);

    let mut node_b = Node::new(node_options(8691).with_bootstrap("127.0.0.1:8690").unwrap()).unwrap();
    assert_eq!(node_b.state(), NodeState::Joined);
    assert!(node_b.info().contains("peers=1"));

    assert!(node_b.set("alpha", 42).unwrap());
    assert_eq!(node_a.get("alpha").unwrap(), Some(Value::Int(42)));

    // 结构化值经过网络后保持不变
    let id = Uuid::new_v4();
    node_a.set("owner", id).unwrap();
    assert_eq!(node_b.get("owner").unwrap(), Some(Value::Uuid(id)));

    node_b.set("gone", "soon").unwrap();
    node_b.remove("gone").unwrap();
    assert_eq!(node_a.get("gone").unwrap(), None);
    assert_eq!(node_b.get("gone").unwrap(), None);

    sleep(TTL + Duration::from_millis(500));
    assert_eq!(node_a.get("alpha").unwrap(), None);
    assert_eq!(node_b.get("alpha").unwrap(), None);

    node_b.shutdown();
    node_a.shutdown();

    // 再次关闭只输出警告
    node_a.shutdown();
    assert_eq!(node_a.state(), NodeState::Stopped);
}
