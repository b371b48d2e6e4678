use crate::dht::handler::lock;
use crate::dht::protocol::{DhtMessage, MessageRoute};
use crate::dht::KademliaError;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// 单个UDP数据报的最大长度
const MAX_DATAGRAM_SIZE: usize = 65_536;

type PendingRequests = Arc<Mutex<HashMap<u64, oneshot::Sender<DhtMessage>>>>;

/// DHT网络传输层
#[derive(Clone)]
pub struct DhtNetwork {
    /// UDP socket用于消息传输
    socket: Arc<UdpSocket>,

    /// 本地绑定地址
    local_addr: SocketAddr,

    /// 待处理的请求
    pending_requests: PendingRequests,

    /// 消息ID计数器
    message_id_counter: Arc<AtomicU64>,

    /// 接收任务
    receive_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl DhtNetwork {
    /// 绑定UDP socket，返回网络实例和入站请求通道
    pub async fn bind(bind_addr: SocketAddr) -> Result<(Self, mpsc::Receiver<MessageRoute>), KademliaError> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|source| KademliaError::Bind { addr: bind_addr, source })?;

        let local_addr = socket.local_addr()?;

        info!("DHT network bound to {}", local_addr);

        let (inbound_tx, inbound_rx) = mpsc::channel(1000);

        let network = Self {
            socket: Arc::new(socket),
            local_addr,
            pending_requests: Arc::new(Mutex::new(HashMap::new())),
            message_id_counter: Arc::new(AtomicU64::new(1)),
            receive_task: Arc::new(Mutex::new(None)),
        };

        network.spawn_receive_task(inbound_tx);

        Ok((network, inbound_rx))
    }

    /// 停止接收任务，丢弃所有待处理的请求
    pub fn stop(&self) {
        if let Some(task) = lock(&self.receive_task).take() {
            task.abort();
        }

        lock(&self.pending_requests).clear();

        info!("DHT network on {} stopped", self.local_addr);
    }

    /// 发送请求并等待响应
    pub async fn send_request(
        &self,
        target_addr: SocketAddr,
        mut message: DhtMessage,
        timeout_duration: Duration,
    ) -> Result<DhtMessage, KademliaError> {
        let message_id = self.generate_message_id();
        message.message_id = message_id;

        // 创建响应通道并记录待处理请求
        let (response_tx, response_rx) = oneshot::channel();
        lock(&self.pending_requests).insert(message_id, response_tx);

        let sent = self.send_message(target_addr, &message).await;
        if let Err(e) = sent {
            self.remove_pending_request(message_id);
            return Err(e);
        }

        debug!("Sent {} to {}", message, target_addr);

        // 等待响应
        match timeout(timeout_duration, response_rx).await {
            Ok(Ok(response)) => {
                debug!("Received response for message {}", message_id);
                Ok(response)
            }
            Ok(Err(_)) => Err(KademliaError::OperationFailed("Response channel closed".to_string())),
            Err(_) => {
                self.remove_pending_request(message_id);
                Err(KademliaError::Timeout {
                    addr: target_addr,
                    message_id,
                })
            }
        }
    }

    /// 发送响应消息（不等待回复）
    pub async fn send_response(&self, target_addr: SocketAddr, message: DhtMessage) -> Result<(), KademliaError> {
        self.send_message(target_addr, &message).await?;
        debug!("Sent {} to {}", message, target_addr);
        Ok(())
    }

    /// 获取本地地址
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn send_message(&self, target_addr: SocketAddr, message: &DhtMessage) -> Result<(), KademliaError> {
        let bytes = message.to_bytes()?;
        self.socket.send_to(&bytes, target_addr).await?;
        Ok(())
    }

    /// 生成唯一的消息ID
    fn generate_message_id(&self) -> u64 {
        self.message_id_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// 移除待处理的请求
    fn remove_pending_request(&self, message_id: u64) {
        lock(&self.pending_requests).remove(&message_id);
    }

    /// 启动接收任务：响应交给等待的请求，其余消息进入入站通道
    fn spawn_receive_task(&self, inbound_tx: mpsc::Sender<MessageRoute>) {
        let socket = self.socket.clone();
        let pending_requests = self.pending_requests.clone();

        let task = tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

            loop {
                let (len, addr) = match socket.recv_from(&mut buffer).await {
                    Ok(received) => received,
                    Err(e) => {
                        // 部分平台上，对端失效时的ICMP端口不可达会在这里出现
                        debug!("Failed to receive datagram: {}", e);
                        continue;
                    }
                };

                let message = match DhtMessage::from_bytes(&buffer[..len]) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("Failed to parse message from {}: {}", addr, e);
                        continue;
                    }
                };

                if message.is_response() {
                    let waiter = lock(&pending_requests).remove(&message.message_id);
                    match waiter {
                        Some(response_tx) => {
                            let _ = response_tx.send(message);
                        }
                        None => debug!("Dropping unsolicited {} at {}", message, addr),
                    }
                    continue;
                }

                if inbound_tx.send(MessageRoute::new(addr, message)).await.is_err() {
                    break;
                }
            }

            debug!("DHT network receive task stopped");
        });

        *lock(&self.receive_task) = Some(task);
    }
}
