// src/hub/room.rs

//! 房间：按名称组织的一组客户端引用，用于组播。

use crate::error::{BroadcastError, SendFailure, WsError};
use crate::hub::client_session::Client;
use crate::message::Envelope;
use dashmap::DashMap;
use futures_util::future::join_all;
use log::{debug, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// 一个命名房间。
///
/// 房间只共享客户端引用，不拥有连接：移除成员或删除房间都不会关闭任何客户端。
/// 一个客户端可以同时属于多个房间。
#[derive(Debug)]
pub struct Room {
    /// 房间名，创建后不可变。
    pub name: String,
    clients: DashMap<String, Arc<Client>>,
}

impl Room {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clients: DashMap::new(),
        }
    }

    /// 按 ID 加入客户端。同一 ID 重复加入时替换引用，不会重复计数。
    pub fn add_client(&self, client: Arc<Client>) {
        debug!("[Room {}] 客户端 {} 加入", self.name, client.id);
        self.clients.insert(client.id.clone(), client);
    }

    /// 按 ID 移除客户端。不存在时什么也不做。
    pub fn remove_client(&self, id: &str) -> Option<Arc<Client>> {
        let removed = self.clients.remove(id).map(|(_, client)| client);
        if removed.is_some() {
            debug!("[Room {}] 客户端 {} 离开", self.name, id);
        }
        removed
    }

    pub fn get_client(&self, id: &str) -> Option<Arc<Client>> {
        self.clients.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// 当前成员的快照。修改返回值不会影响房间。
    pub fn get_clients(&self) -> HashMap<String, Arc<Client>> {
        self.clients
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    /// 返回第一个满足条件的成员。遍历顺序不保证稳定。
    pub fn find_client<F>(&self, predicate: F) -> Option<Arc<Client>>
    where
        F: Fn(&Client) -> bool,
    {
        self.members().into_iter().find(|client| predicate(client))
    }

    /// 返回所有满足条件的成员，顺序不保证。
    pub fn filter_client<F>(&self, predicate: F) -> Vec<Arc<Client>>
    where
        F: Fn(&Client) -> bool,
    {
        self.members().into_iter().filter(|client| predicate(client)).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.clients.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// 向所有成员广播信封。
    ///
    /// 单个成员发送失败不会中断对其余成员的发送；只要有失败，返回
    /// `WsError::Broadcast`，其中包含每个失败成员的详情。
    pub async fn send_json(&self, envelope: &Envelope) -> Result<(), WsError> {
        broadcast(&format!("Room {}", self.name), self.members(), envelope).await
    }

    pub async fn emit(&self, command: &str, payload: impl Into<Value>) -> Result<(), WsError> {
        self.send_json(&Envelope::new(command, payload)).await
    }

    pub async fn emit_error(&self, text: &str) -> Result<(), WsError> {
        self.send_json(&Envelope::error(text)).await
    }

    // 先取快照再调用用户代码或做 I/O，避免持有分片锁
    fn members(&self) -> Vec<Arc<Client>> {
        self.clients.iter().map(|entry| Arc::clone(entry.value())).collect()
    }
}

/// 把信封发给一组客户端并汇总失败。房间和事件中心的广播共用此函数。
pub(crate) async fn broadcast(
    scope: &str,
    members: Vec<Arc<Client>>,
    envelope: &Envelope,
) -> Result<(), WsError> {
    let text = envelope.to_json()?;
    let attempted = members.len();
    let results = join_all(members.iter().map(|client| {
        let text = text.clone();
        async move { (client.id.clone(), client.send_text(text).await) }
    }))
    .await;

    let failures: Vec<SendFailure> = results
        .into_iter()
        .filter_map(|(client_id, result)| result.err().map(|error| SendFailure { client_id, error }))
        .collect();

    if failures.is_empty() {
        debug!("[{}] 命令 '{}' 已广播给 {} 个客户端", scope, envelope.command, attempted);
        Ok(())
    } else {
        let err = BroadcastError { attempted, failures };
        warn!("[{}] 命令 '{}' {}", scope, envelope.command, err);
        Err(WsError::Broadcast(err))
    }
}
