// src/server/mod.rs

//! WebSocket 服务端传输模块。
//!
//! `transport` 子模块封装了监听、握手和按帧收发信封的细节，
//! 事件中心 (`crate::hub`) 在其之上实现客户端注册、房间和命令分发。

pub mod transport;
