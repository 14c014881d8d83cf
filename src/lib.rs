//! `ws_event_hub` 是一个基于 WebSocket 的实时事件中心。
//!
//! 它接受入站连接并为每个连接分配唯一身份，把客户端组织进命名房间，
//! 并把入站的 JSON 信封 `{"command", "message"}` 分发给注册的命令处理函数；
//! 处理函数可以向单个客户端、一个房间或全部在线客户端推送信封。
//!
//! 主要模块包括：
//! - `message`: 信封结构 `Envelope`。
//! - `error`: 统一错误类型 `WsError` 以及广播失败详情。
//! - `config`: 服务配置 `HubConfig`。
//! - `server`: 服务端传输层（监听、握手、按帧收发）。
//! - `client`: 拨号端传输层。
//! - `hub`: 客户端 `Client`、房间 `Room`、事件中心 `Hub` 与全局单例 `get_hub`。

pub mod client;
pub mod config;
pub mod error;
pub mod hub;
pub mod message;
pub mod server;

pub use error::WsError;
pub use hub::client_session::Client;
pub use hub::connection_manager::{get_hub, Hub};
pub use hub::room::Room;
pub use message::Envelope;
pub use server::transport::ConnectRequest;
