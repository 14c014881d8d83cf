// src/client/mod.rs

//! WebSocket 客户端（拨号端）模块，`transport` 子模块提供 `connect_client`。

pub mod transport;
