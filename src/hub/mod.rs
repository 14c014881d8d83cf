// src/hub/mod.rs

//! 事件中心：客户端、房间、注册表与命令分发。

pub mod client_session;
pub mod connection_manager;
pub mod message_router;
pub mod room;
pub mod service;
