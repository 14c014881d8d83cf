// src/hub/connection_manager.rs

//! 事件中心的注册表：所有在线客户端、所有房间，以及进程级单例。

use crate::error::WsError;
use crate::hub::client_session::Client;
use crate::hub::message_router::{CommandHandler, ConnectCallback, DisconnectCallback};
use crate::hub::room::{broadcast, Room};
use crate::message::Envelope;
use dashmap::DashMap;
use log::{debug, info};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

/// 进程级共享的事件中心实例
static GLOBAL_HUB: OnceLock<Arc<Hub>> = OnceLock::new();

/// 获取进程级共享的事件中心。
///
/// 第一次调用时构造实例，之后的每次调用都返回同一个实例。
/// 需要相互隔离的实例（例如测试）请直接使用 `Hub::new()`。
pub fn get_hub() -> Arc<Hub> {
    Arc::clone(GLOBAL_HUB.get_or_init(|| {
        info!("[Hub] 全局事件中心实例已创建");
        Arc::new(Hub::new())
    }))
}

/// 事件中心。
///
/// 持有客户端注册表、房间注册表、命令处理函数表以及连接/断开回调列表。
/// 所有表都可以被多个连接任务并发访问。
pub struct Hub {
    /// 客户端 ID -> 客户端，"谁在线"的唯一权威来源。
    pub(crate) clients: DashMap<String, Arc<Client>>,
    /// 房间名 -> 房间。
    pub(crate) rooms: DashMap<String, Arc<Room>>,
    pub(crate) handlers: DashMap<String, CommandHandler>,
    pub(crate) connect_callbacks: RwLock<Vec<ConnectCallback>>,
    pub(crate) disconnect_callbacks: RwLock<Vec<DisconnectCallback>>,
}

impl Hub {
    /// 创建一个独立的事件中心实例，与 `get_hub()` 返回的全局实例无关。
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            rooms: DashMap::new(),
            handlers: DashMap::new(),
            connect_callbacks: RwLock::new(Vec::new()),
            disconnect_callbacks: RwLock::new(Vec::new()),
        }
    }

    /// 注册客户端。同一 ID 重复注册时替换引用。
    pub fn add_client(&self, client: Arc<Client>) {
        self.clients.insert(client.id.clone(), client);
        debug!("[Hub] 当前在线客户端总数: {}", self.clients.len());
    }

    /// 从注册表移除客户端。不存在时返回 `None`，不视为错误。
    pub fn remove_client(&self, id: &str) -> Option<Arc<Client>> {
        let removed = self.clients.remove(id).map(|(_, client)| client);
        if removed.is_some() {
            debug!("[Hub] 客户端 {} 已移出注册表，剩余 {} 个", id, self.clients.len());
        }
        removed
    }

    pub fn get_client(&self, id: &str) -> Option<Arc<Client>> {
        self.clients.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// 在线客户端的快照。
    pub fn get_clients(&self) -> HashMap<String, Arc<Client>> {
        self.clients
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    pub fn find_client<F>(&self, predicate: F) -> Option<Arc<Client>>
    where
        F: Fn(&Client) -> bool,
    {
        self.client_snapshot().into_iter().find(|client| predicate(client))
    }

    pub fn filter_client<F>(&self, predicate: F) -> Vec<Arc<Client>>
    where
        F: Fn(&Client) -> bool,
    {
        self.client_snapshot()
            .into_iter()
            .filter(|client| predicate(client))
            .collect()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// 获取或创建房间：已存在则返回现有房间，否则注册一个新的空房间。
    pub fn room(&self, name: &str) -> Arc<Room> {
        let room = self.rooms.entry(name.to_string()).or_insert_with(|| {
            debug!("[Hub] 创建房间 '{}'", name);
            Arc::new(Room::new(name))
        });
        Arc::clone(room.value())
    }

    /// 删除房间。只移除房间对象，不会断开其中任何客户端。
    pub fn remove_room(&self, name: &str) -> Option<Arc<Room>> {
        let removed = self.rooms.remove(name).map(|(_, room)| room);
        if removed.is_some() {
            debug!("[Hub] 房间 '{}' 已删除", name);
        }
        removed
    }

    /// 房间注册表的快照。
    pub fn get_rooms(&self) -> HashMap<String, Arc<Room>> {
        self.rooms
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    /// 向所有在线客户端广播，失败语义与 `Room::send_json` 相同。
    pub async fn send_json(&self, envelope: &Envelope) -> Result<(), WsError> {
        broadcast("Hub", self.client_snapshot(), envelope).await
    }

    pub async fn emit(&self, command: &str, payload: impl Into<Value>) -> Result<(), WsError> {
        self.send_json(&Envelope::new(command, payload)).await
    }

    pub async fn emit_error(&self, text: &str) -> Result<(), WsError> {
        self.send_json(&Envelope::error(text)).await
    }

    /// 主动关闭某个客户端。
    ///
    /// 立即把它从注册表和所有房间中移除并关闭连接；其接收循环随后结束并执行断开回调。
    /// 返回该 ID 是否在线。
    pub async fn close(&self, id: &str) -> bool {
        match self.detach_client(id) {
            Some(client) => {
                info!("[Hub] 主动关闭客户端 {}", id);
                client.close().await;
                true
            }
            None => false,
        }
    }

    /// 从注册表和所有房间中移除客户端。
    pub(crate) fn detach_client(&self, id: &str) -> Option<Arc<Client>> {
        let removed = self.remove_client(id);
        let rooms: Vec<Arc<Room>> = self.rooms.iter().map(|entry| Arc::clone(entry.value())).collect();
        for room in rooms {
            room.remove_client(id);
        }
        removed
    }

    fn client_snapshot(&self) -> Vec<Arc<Client>> {
        self.clients.iter().map(|entry| Arc::clone(entry.value())).collect()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
