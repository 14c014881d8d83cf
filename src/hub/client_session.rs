// src/hub/client_session.rs

//! 单个已接受连接在事件中心内的句柄。

use crate::error::WsError;
use crate::message::Envelope;
use crate::server::transport::{split_connection, ConnectionHandler, FrameStream};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

/// 关闭时等待写锁并发送 Close 帧的最长时间。
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// 代表一个已连接的 WebSocket 客户端。
///
/// `Client` 独占连接的写半部分，并用异步互斥锁串行化所有写操作，
/// 因此多个任务同时对同一客户端 `send` 不会产生交错或损坏的帧。
/// 读半部分在构造时交还给调用方（通常是事件中心的接收循环）。
///
/// 客户端还带有一个线程安全的属性存储，值为 `serde_json::Value`，读取方自行检查类型。
pub struct Client {
    /// 由服务端生成的唯一客户端标识 (UUID v4)，在连接生命周期内不变。
    pub id: String,
    /// 客户端创建时间 (UTC)。
    pub connected_at: DateTime<Utc>,
    connection: Mutex<ConnectionHandler>,
    data: DashMap<String, Value>,
    closed: watch::Sender<bool>,
}

impl Client {
    /// 用一个已经完成握手的 WebSocket 流创建客户端。
    ///
    /// 服务端接受的流和主动拨号得到的流都可以使用。
    ///
    /// # Returns
    /// 返回客户端的共享句柄以及连接的读流。
    pub fn new<S>(ws_stream: WebSocketStream<S>) -> (Arc<Client>, FrameStream)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (handler, frames) = split_connection(ws_stream);
        let (closed, _) = watch::channel(false);
        let client = Arc::new(Client {
            id: Uuid::new_v4().to_string(),
            connected_at: Utc::now(),
            connection: Mutex::new(handler),
            data: DashMap::new(),
            closed,
        });
        debug!("[Client {}] 客户端已创建", client.id);
        (client, frames)
    }

    /// 序列化信封并作为一帧写出。
    pub async fn send(&self, envelope: &Envelope) -> Result<(), WsError> {
        let text = envelope.to_json()?;
        self.send_text(text).await
    }

    /// 写出已序列化好的文本帧。广播路径只序列化一次，然后逐个调用本方法。
    pub(crate) async fn send_text(&self, text: String) -> Result<(), WsError> {
        if self.is_closed() {
            return Err(WsError::NotConnected);
        }
        let mut connection = self.connection.lock().await;
        connection.send_text(text).await
    }

    /// 构造 `{command, payload}` 信封并发送。
    pub async fn emit(&self, command: &str, payload: impl Into<Value>) -> Result<(), WsError> {
        self.send(&Envelope::new(command, payload)).await
    }

    /// 发送 `{"command": "error", "message": text}`。
    pub async fn emit_error(&self, text: &str) -> Result<(), WsError> {
        self.send(&Envelope::error(text)).await
    }

    /// 写入属性，同名键会被覆盖。
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    /// 读取属性，键不存在时返回 `None`。
    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.get(key).map(|entry| entry.value().clone())
    }

    /// 按指定类型读取属性。键不存在或值的形状不匹配时返回 `None`。
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.data.remove(key).map(|(_, value)| value)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// 等待客户端被关闭。已经关闭时立即返回。
    pub async fn closed(&self) {
        let mut receiver = self.closed.subscribe();
        // 发送端由 self 持有，等待期间不会被丢弃
        let _ = receiver.wait_for(|closed| *closed).await;
    }

    /// 关闭连接。可重复调用，底层连接只会被关闭一次。
    ///
    /// 关闭后对端会收到 Close 帧，本端的接收循环也会被唤醒并结束。
    /// 若另一个发送正卡在不再读取的对端上，最多等待 `CLOSE_TIMEOUT` 后放弃发送 Close 帧。
    pub async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        let closing = async {
            let mut connection = self.connection.lock().await;
            connection.close().await
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, closing).await {
            Ok(Ok(())) => info!("[Client {}] 连接已关闭", self.id),
            Ok(Err(e)) => debug!("[Client {}] 关闭连接时出错（连接可能已断开）: {}", self.id, e),
            Err(_) => warn!("[Client {}] 等待写通道超时，放弃发送 Close 帧", self.id),
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("connected_at", &self.connected_at)
            .field("closed", &self.is_closed())
            .field("attributes", &self.data.len())
            .finish()
    }
}

impl PartialEq for Client {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Client {}
