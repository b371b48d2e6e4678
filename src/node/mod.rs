mod options;

pub use options::NodeOptions;

use crate::codec::{self, CodecError, Payload, Value};
use crate::dht::{KademliaError, NodeId, Server, TtlStorage};
use crate::utils::random_node_id;
use log::{debug, error, info, warn};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// 默认监听端口
pub const DEFAULT_PORT: u16 = 8690;

/// 调试模式下超过该耗时的操作会被警告
const SLOW_OPERATION_THRESHOLD: Duration = Duration::from_millis(100);

type NodeServer = Server<TtlStorage<NodeId, Payload>>;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Failed to start reactor: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("Failed to listen: {0}")]
    Listen(KademliaError),

    #[error("Invalid bootstrap address: {0}")]
    InvalidBootstrap(String),

    #[error("Bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("DHT error: {0}")]
    Dht(#[from] KademliaError),

    #[error("Node is stopped")]
    Stopped,
}

/// 节点状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// 已在监听，未加入任何网络
    Listening,
    /// 已通过引导节点加入网络
    Joined,
    /// 已关闭，所有操作返回 `NodeError::Stopped`
    Stopped,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            NodeState::Listening => "listening",
            NodeState::Joined => "joined",
            NodeState::Stopped => "stopped",
        };
        write!(f, "{}", state)
    }
}

/// 发往反应器线程的操作
enum NodeOperation {
    /// 存储值（Payload::Null 表示删除）
    Set {
        key: Vec<u8>,
        payload: Payload,
        result_tx: oneshot::Sender<Result<bool, KademliaError>>,
    },
    /// 查找值
    Get {
        key: Vec<u8>,
        result_tx: oneshot::Sender<Result<Option<Payload>, KademliaError>>,
    },
    /// 服务器状态描述
    Info { result_tx: oneshot::Sender<String> },
    /// 停止服务器并退出反应器
    Stop {
        result_tx: oneshot::Sender<Result<(), KademliaError>>,
    },
}

impl NodeOperation {
    fn name(&self) -> &'static str {
        match self {
            NodeOperation::Set { payload: Payload::Null, .. } => "remove",
            NodeOperation::Set { .. } => "set",
            NodeOperation::Get { .. } => "get",
            NodeOperation::Info { .. } => "info",
            NodeOperation::Stop { .. } => "stop",
        }
    }
}

/// 提供阻塞式接口的DHT节点
///
/// 引擎运行在独立的反应器线程上，线程内有自己的单线程tokio运行时。
/// 每次调用都排队发往该线程并等待回复，多个线程的调用依次执行。
///
/// `Node` 的方法会阻塞，不要在异步运行时内调用。
pub struct Node {
    id: String,
    local_addr: SocketAddr,
    state: NodeState,
    op_tx: mpsc::UnboundedSender<NodeOperation>,
    reactor: Option<thread::JoinHandle<()>>,
}

impl Node {
    /// 启动节点：绑定 `0.0.0.0:port`，配置了引导节点时通过它加入网络。
    /// 两者完成后才返回。
    pub fn new(options: NodeOptions) -> Result<Self, NodeError> {
        let id = options.id.clone().unwrap_or_else(random_node_id);
        let storage = TtlStorage::new(options.ttl);
        let server = Server::new(NodeId::digest(&id), storage, options.kademlia.clone());

        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;

        let (op_tx, op_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let reactor = Reactor {
            server,
            debug: options.debug,
            op_rx,
        };

        let handle = thread::Builder::new()
            .name(format!("kad-node-{}", id.chars().take(8).collect::<String>()))
            .spawn(move || runtime.block_on(reactor.run(options, ready_tx)))?;

        let started = match ready_rx.blocking_recv() {
            Ok(started) => started,
            Err(_) => Err(NodeError::Stopped),
        };

        let (local_addr, state) = match started {
            Ok(ready) => ready,
            Err(e) => {
                if handle.join().is_err() {
                    error!("Reactor thread panicked during startup");
                }
                return Err(e);
            }
        };

        info!("Node {} {} on {}", id, state, local_addr);

        Ok(Self {
            id,
            local_addr,
            state,
            op_tx,
            reactor: Some(handle),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// 在 `key` 下存储 `value`，返回是否有节点接受
    pub fn set(&self, key: impl AsRef<[u8]>, value: impl Into<Value>) -> Result<bool, NodeError> {
        let payload = codec::encode(&value.into())?;
        let key = key.as_ref().to_vec();

        let stored = self.call(|result_tx| NodeOperation::Set {
            key,
            payload,
            result_tx,
        })??;

        Ok(stored)
    }

    /// 查找 `key`，不存在和已删除都返回 `None`
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Value>, NodeError> {
        let key = key.as_ref().to_vec();

        let payload = self.call(|result_tx| NodeOperation::Get { key, result_tx })??;

        Ok(payload.and_then(codec::decode))
    }

    /// 在本地及接受删除标记的副本上删除 `key`
    pub fn remove(&self, key: impl AsRef<[u8]>) -> Result<(), NodeError> {
        let key = key.as_ref().to_vec();

        self.call(|result_tx| NodeOperation::Set {
            key,
            payload: Payload::Null,
            result_tx,
        })??;

        Ok(())
    }

    /// 记录并返回 `"<id> <服务器状态>"`
    pub fn info(&self) -> String {
        let server = self
            .call(|result_tx| NodeOperation::Info { result_tx })
            .unwrap_or_else(|_| "Server(stopped)".to_string());

        let info = format!("{} {}", self.id, server);
        info!("{}", info);
        info
    }

    /// 停止引擎和反应器线程。
    ///
    /// 失败只记录日志，不返回错误。重复调用只输出警告。
    pub fn shutdown(&mut self) {
        if self.state == NodeState::Stopped {
            warn!("Node {} is already stopped", self.id);
            return;
        }
        self.state = NodeState::Stopped;

        let (result_tx, result_rx) = oneshot::channel();
        if self.op_tx.send(NodeOperation::Stop { result_tx }).is_ok() {
            match result_rx.blocking_recv() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Failed to stop DHT server: {}", e),
                Err(_) => warn!("Reactor exited before the server was stopped"),
            }
        }

        if let Some(reactor) = self.reactor.take() {
            if reactor.join().is_err() {
                error!("Reactor thread panicked");
            }
        }

        info!("Node {} stopped", self.id);
    }

    fn call<T>(&self, operation: impl FnOnce(oneshot::Sender<T>) -> NodeOperation) -> Result<T, NodeError> {
        if self.state == NodeState::Stopped {
            return Err(NodeError::Stopped);
        }

        let (result_tx, result_rx) = oneshot::channel();
        self.op_tx
            .send(operation(result_tx))
            .map_err(|_| NodeError::Stopped)?;

        result_rx.blocking_recv().map_err(|_| NodeError::Stopped)
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if self.state != NodeState::Stopped {
            self.shutdown();
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("local_addr", &self.local_addr)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// 反应器：在专用线程上运行DHT服务器并依次处理操作
struct Reactor {
    server: NodeServer,
    debug: bool,
    op_rx: mpsc::UnboundedReceiver<NodeOperation>,
}

impl Reactor {
    async fn run(mut self, options: NodeOptions, ready_tx: oneshot::Sender<Result<(SocketAddr, NodeState), NodeError>>) {
        let started = self.start(&options).await;
        let failed = started.is_err();

        let _ = ready_tx.send(started);
        if failed {
            self.stop_server();
            return;
        }

        while let Some(operation) = self.op_rx.recv().await {
            let name = operation.name();
            let started_at = Instant::now();

            if self.debug {
                debug!("Executing {}", name);
            }

            let stop = self.execute(operation).await;

            let elapsed = started_at.elapsed();
            if self.debug && elapsed > SLOW_OPERATION_THRESHOLD {
                warn!("Executing {} took {:.3} seconds", name, elapsed.as_secs_f64());
            }

            if stop {
                return;
            }
        }

        // 所有Node句柄都已释放，没有收到停止请求
        self.stop_server();
    }

    async fn start(&mut self, options: &NodeOptions) -> Result<(SocketAddr, NodeState), NodeError> {
        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, options.port));
        let local_addr = self.server.listen(bind_addr).await.map_err(NodeError::Listen)?;

        let (host, port) = match options.bootstrap_peer() {
            Some(peer) => peer,
            None => return Ok((local_addr, NodeState::Listening)),
        };

        let peers: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|e| NodeError::InvalidBootstrap(format!("{}:{} ({})", host, port, e)))?
            .filter(|addr| addr.is_ipv4())
            .collect();

        if peers.is_empty() {
            return Err(NodeError::InvalidBootstrap(format!("{}:{}", host, port)));
        }

        let joined = self.server.bootstrap(&peers).await?;
        if joined.is_empty() {
            return Err(NodeError::Bootstrap(format!("no answer from {}:{}", host, port)));
        }

        Ok((local_addr, NodeState::Joined))
    }

    /// 执行一个操作，返回true表示反应器应当退出
    async fn execute(&mut self, operation: NodeOperation) -> bool {
        match operation {
            NodeOperation::Set { key, payload, result_tx } => {
                let result = self.server.set(&key, payload).await;
                let _ = result_tx.send(result);
            }
            NodeOperation::Get { key, result_tx } => {
                let result = self.server.get(&key).await;
                let _ = result_tx.send(result);
            }
            NodeOperation::Info { result_tx } => {
                let _ = result_tx.send(self.server.to_string());
            }
            NodeOperation::Stop { result_tx } => {
                let _ = result_tx.send(self.server.stop());
                return true;
            }
        }

        false
    }

    fn stop_server(&mut self) {
        if self.server.is_listening() {
            if let Err(e) = self.server.stop() {
                warn!("Failed to stop DHT server: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::KademliaConfig;

    fn standalone_options() -> NodeOptions {
        NodeOptions {
            port: 0,
            ..NodeOptions::default()
        }
    }

    #[test]
    fn test_node_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Node>();
    }

    #[test]
    fn test_standalone_node_stores_locally() {
        let mut node = Node::new(standalone_options()).unwrap();
        assert_eq!(node.state(), NodeState::Listening);
        assert!(node.local_addr().port() > 0);

        assert!(node.set("alpha", 42).unwrap());
        assert_eq!(node.get("alpha").unwrap(), Some(Value::Int(42)));

        node.remove("alpha").unwrap();
        assert_eq!(node.get("alpha").unwrap(), None);
        assert_eq!(node.get("never-set").unwrap(), None);

        node.shutdown();
    }

    #[test]
    fn test_explicit_id_and_info() {
        let mut node = Node::new(NodeOptions {
            id: Some("1234567890".to_string()),
            ..standalone_options()
        })
        .unwrap();

        assert_eq!(node.id(), "1234567890");

        node.set("k", "v").unwrap();
        let info = node.info();
        assert!(info.starts_with("1234567890 Server("));
        assert!(info.contains("entries=1"));

        node.shutdown();
        assert_eq!(node.info(), "1234567890 Server(stopped)");
    }

    #[test]
    fn test_operations_after_shutdown_fail() {
        let mut node = Node::new(standalone_options()).unwrap();
        node.shutdown();
        assert_eq!(node.state(), NodeState::Stopped);

        assert!(matches!(node.set("k", 1), Err(NodeError::Stopped)));
        assert!(matches!(node.get("k"), Err(NodeError::Stopped)));

        // 再次关闭只输出警告
        node.shutdown();
    }

    #[test]
    fn test_json_null_is_rejected_before_the_network() {
        let mut node = Node::new(standalone_options()).unwrap();
        assert!(matches!(
            node.set("k", Value::Json(serde_json::Value::Null)),
            Err(NodeError::Codec(CodecError::UnsupportedValueKind(_)))
        ));
        node.shutdown();
    }

    #[test]
    fn test_unreachable_bootstrap_fails() {
        // 占用一个无人应答的端口
        let silent = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = silent.local_addr().unwrap().port();

        let options = NodeOptions {
            bootstrap_host: Some("127.0.0.1".to_string()),
            bootstrap_port: Some(port),
            kademlia: KademliaConfig {
                request_timeout: Duration::from_millis(200),
                ..KademliaConfig::default()
            },
            ..standalone_options()
        };

        assert!(matches!(Node::new(options), Err(NodeError::Bootstrap(_))));
    }

    #[test]
    fn test_port_in_use_fails() {
        let mut first = Node::new(standalone_options()).unwrap();
        let port = first.local_addr().port();

        let result = Node::new(NodeOptions {
            port,
            ..standalone_options()
        });
        assert!(matches!(result, Err(NodeError::Listen(_))));

        first.shutdown();
    }
}
