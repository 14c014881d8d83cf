// src/client/transport.rs

//! 客户端（拨号端）WebSocket 传输。
//!
//! 用于主动连接一个事件中心：返回的 `ClientConnection` 复用服务端的 `Client` 句柄来发送信封，
//! 并持有读流以接收事件中心推送的信封。集成测试也通过它驱动事件中心。

use crate::error::WsError;
use crate::hub::client_session::Client;
use crate::message::Envelope;
use crate::server::transport::{receive_message, FrameStream};
use log::{debug, error, info};
use serde_json::Value;
use std::sync::Arc;
use tokio_tungstenite::connect_async;
use url::Url;

/// 一个已建立的拨号端连接。
pub struct ClientConnection {
    /// 写句柄，带串行化写锁和属性存储。
    pub client: Arc<Client>,
    /// 读流。
    pub frames: FrameStream,
}

impl ClientConnection {
    pub async fn send_message(&self, envelope: &Envelope) -> Result<(), WsError> {
        self.client.send(envelope).await
    }

    pub async fn emit(&self, command: &str, payload: impl Into<Value>) -> Result<(), WsError> {
        self.client.emit(command, payload).await
    }

    /// 接收下一个信封；语义同 `server::transport::receive_message`。
    pub async fn receive_message(&mut self) -> Option<Result<Envelope, WsError>> {
        receive_message(&mut self.frames).await
    }

    pub async fn close(&self) {
        self.client.close().await;
    }
}

/// 异步连接到指定的 WebSocket 服务器。
///
/// # Arguments
/// * `url_str` - 服务器的完整 URL，例如 "ws://127.0.0.1:8088/ws"。
///
/// # Returns
/// * `Result<ClientConnection, WsError>` - URL 无效时返回 `WsError::InvalidUrl`，
///   连接或握手失败时返回 `WsError::WebSocketProtocolError`。
pub async fn connect_client(url_str: &str) -> Result<ClientConnection, WsError> {
    info!("[Client] 开始尝试连接到 WebSocket 服务器，URL: {}", url_str);
    let parsed_url = Url::parse(url_str)
        .map_err(|e| WsError::InvalidUrl(format!("无效的 WebSocket URL '{}': {}", url_str, e)))?;
    if !matches!(parsed_url.scheme(), "ws" | "wss") {
        return Err(WsError::InvalidUrl(format!(
            "URL '{}' 的协议必须是 ws 或 wss",
            url_str
        )));
    }

    match connect_async(parsed_url.as_str()).await {
        Ok((ws_stream, response)) => {
            info!("[Client] 已成功连接到 {} (HTTP 状态码: {})", url_str, response.status());
            debug!("[Client] WebSocket 连接响应头: {:?}", response.headers());
            let (client, frames) = Client::new(ws_stream);
            Ok(ClientConnection { client, frames })
        }
        Err(e) => {
            error!("[Client] 连接到 {} 失败，错误: {}", url_str, e);
            Err(WsError::WebSocketProtocolError(e))
        }
    }
}
