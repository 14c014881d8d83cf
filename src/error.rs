// src/error.rs

//! 定义事件中心相关的错误类型。

use std::fmt;
use thiserror::Error; // 引入 thiserror 来简化错误类型的定义

/// 事件中心的统一错误类型。
#[derive(Error, Debug)]
pub enum WsError {
    /// 当 serde 序列化失败时返回。
    #[error("序列化错误: {0}")]
    SerializationError(String),

    /// 当 serde 反序列化失败时返回，例如收到的帧不是合法的 JSON 信封。
    #[error("反序列化错误: {0}")]
    DeserializationError(String),

    /// WebSocket 协议相关的错误，包括握手失败和读写失败。
    #[error("WebSocket协议错误: {0}")]
    WebSocketProtocolError(#[from] tokio_tungstenite::tungstenite::Error),

    /// 底层 I/O 错误。
    #[error("I/O错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 连接已经关闭，无法继续发送。
    #[error("未连接")]
    NotConnected,

    /// 无效的 URL 格式。
    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    /// 配置文件读取或解析失败。
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// 连接回调拒绝了本次连接。
    #[error("连接被拒绝: {0}")]
    ConnectRejected(String),

    /// 广播时部分成员发送失败。
    #[error("{0}")]
    Broadcast(BroadcastError),

    /// 通用消息错误，用于其他未明确分类的错误。
    #[error("消息错误: {0}")]
    Message(String),
}

/// 广播中单个成员的发送失败记录。
#[derive(Debug)]
pub struct SendFailure {
    /// 发送失败的客户端 ID。
    pub client_id: String,
    /// 该客户端的具体错误。
    pub error: WsError,
}

/// 一次广播的汇总失败信息。
///
/// 广播不会因为某个成员失败而中断，所有失败都会被收集到 `failures` 中，
/// 调用方可以据此逐个诊断。
#[derive(Debug)]
pub struct BroadcastError {
    /// 本次广播尝试发送的成员总数。
    pub attempted: usize,
    /// 发送失败的成员及原因。
    pub failures: Vec<SendFailure>,
}

impl BroadcastError {
    /// 失败的客户端 ID 列表。
    pub fn failed_ids(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.client_id.as_str()).collect()
    }
}

impl fmt::Display for BroadcastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "广播失败: {}/{} 个成员发送失败",
            self.failures.len(),
            self.attempted
        )?;
        if let Some(first) = self.failures.first() {
            write!(f, " (首个失败: {} -> {})", first.client_id, first.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for BroadcastError {}

impl From<BroadcastError> for WsError {
    fn from(err: BroadcastError) -> Self {
        WsError::Broadcast(err)
    }
}
