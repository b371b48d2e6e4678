use crate::dht::{KademliaConfig, DEFAULT_STORAGE_TTL};
use crate::node::{NodeError, DEFAULT_PORT};
use crate::utils::Settings;
use std::time::Duration;

/// 节点启动参数
#[derive(Debug, Clone)]
pub struct NodeOptions {
    /// 节点ID，为空时随机生成
    pub id: Option<String>,

    /// UDP监听端口，0表示由系统分配
    pub port: u16,

    /// 引导节点主机
    pub bootstrap_host: Option<String>,

    /// 引导节点端口
    pub bootstrap_port: Option<u16>,

    /// 存储条目的生存时间
    pub ttl: Duration,

    /// 调试模式
    pub debug: bool,

    /// DHT引擎参数
    pub kademlia: KademliaConfig,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            id: None,
            port: DEFAULT_PORT,
            bootstrap_host: None,
            bootstrap_port: None,
            ttl: DEFAULT_STORAGE_TTL,
            debug: true,
            kademlia: KademliaConfig::default(),
        }
    }
}

impl NodeOptions {
    /// 从配置的 `node` 部分构建启动参数
    pub fn from_settings(settings: &Settings) -> Result<Self, NodeError> {
        let node = &settings.node;

        let (bootstrap_host, bootstrap_port) = match node.bootstrap.as_deref() {
            Some(peer) => {
                let (host, port) = parse_bootstrap(peer)?;
                (Some(host), Some(port))
            }
            None => (None, None),
        };

        Ok(Self {
            id: None,
            port: node.port,
            bootstrap_host,
            bootstrap_port,
            ttl: Duration::from_secs(node.ttl_secs),
            debug: node.debug,
            kademlia: KademliaConfig {
                k_value: node.k_value,
                alpha_value: node.alpha_value,
                request_timeout: Duration::from_millis(node.request_timeout_ms),
                refresh_interval: Duration::from_secs(node.refresh_interval_secs),
                republish: node.republish,
            },
        })
    }

    /// 从 `host:port` 字符串设置引导节点
    pub fn with_bootstrap(mut self, peer: &str) -> Result<Self, NodeError> {
        let (host, port) = parse_bootstrap(peer)?;
        self.bootstrap_host = Some(host);
        self.bootstrap_port = Some(port);
        Ok(self)
    }

    /// 主机和端口都配置时返回引导节点
    pub fn bootstrap_peer(&self) -> Option<(String, u16)> {
        match (&self.bootstrap_host, self.bootstrap_port) {
            (Some(host), Some(port)) => Some((host.clone(), port)),
            _ => None,
        }
    }
}

/// 解析 `<host>:<port>`。节点只监听IPv4，IPv6主机会被拒绝
fn parse_bootstrap(peer: &str) -> Result<(String, u16), NodeError> {
    let (host, port) = peer
        .rsplit_once(':')
        .ok_or_else(|| NodeError::InvalidBootstrap(peer.to_string()))?;

    if host.is_empty() || host.contains(':') || host.starts_with('[') {
        return Err(NodeError::InvalidBootstrap(peer.to_string()));
    }

    let port = port
        .parse::<u16>()
        .map_err(|_| NodeError::InvalidBootstrap(peer.to_string()))?;

    Ok((host.to_string(), port))
}
