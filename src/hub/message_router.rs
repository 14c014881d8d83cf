// src/hub/message_router.rs

//! 命令分发：命令名到处理函数的映射，以及连接/断开回调列表。

use crate::error::WsError;
use crate::hub::client_session::Client;
use crate::hub::connection_manager::Hub;
use crate::message::Envelope;
use crate::server::transport::ConnectRequest;
use futures_util::future::BoxFuture;
use log::{debug, error, warn};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, RwLock};

/// 处理函数和回调统一返回的 future 类型。
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

/// 命令处理函数：接收发起请求的客户端和解码后的 `message` 负载。
pub type CommandHandler = Arc<dyn Fn(Arc<Client>, Value) -> HandlerFuture + Send + Sync>;

/// 连接回调：接收新客户端和握手请求上下文。返回错误会拒绝该连接。
pub type ConnectCallback = Arc<dyn Fn(Arc<Client>, ConnectRequest) -> HandlerFuture + Send + Sync>;

/// 断开回调：返回的错误只记录日志。
pub type DisconnectCallback = Arc<dyn Fn(Arc<Client>) -> HandlerFuture + Send + Sync>;

impl Hub {
    /// 注册命令处理函数。同名命令后注册的覆盖先注册的。
    pub fn on<F, Fut>(&self, command: &str, handler: F)
    where
        F: Fn(Arc<Client>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let boxed: CommandHandler =
            Arc::new(move |client: Arc<Client>, message: Value| -> HandlerFuture { Box::pin(handler(client, message)) });
        if self.handlers.insert(command.to_string(), boxed).is_some() {
            debug!("[Hub] 命令 '{}' 的处理函数已被覆盖", command);
        }
    }

    /// 追加一个连接回调。所有连接回调按注册顺序对每个新连接执行。
    pub fn on_connect<F, Fut>(&self, callback: F)
    where
        F: Fn(Arc<Client>, ConnectRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let boxed: ConnectCallback = Arc::new(
            move |client: Arc<Client>, request: ConnectRequest| -> HandlerFuture { Box::pin(callback(client, request)) },
        );
        write_lock(&self.connect_callbacks).push(boxed);
    }

    /// 追加一个断开回调。所有断开回调按注册顺序对每次断开执行。
    pub fn on_disconnect<F, Fut>(&self, callback: F)
    where
        F: Fn(Arc<Client>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let boxed: DisconnectCallback =
            Arc::new(move |client: Arc<Client>| -> HandlerFuture { Box::pin(callback(client)) });
        write_lock(&self.disconnect_callbacks).push(boxed);
    }

    pub fn has_handler(&self, command: &str) -> bool {
        self.handlers.contains_key(command)
    }

    /// 把信封分发给对应命令的处理函数。
    ///
    /// 处理函数在调用方的任务中同步执行（对接收循环而言，慢处理函数只会拖慢该客户端自己的后续读取）。
    /// 未注册的命令是静默的空操作，返回 `Ok(())`。处理函数的错误原样返回给调用方。
    pub async fn dispatch_command(&self, client: &Arc<Client>, envelope: Envelope) -> anyhow::Result<()> {
        // 先克隆出处理函数，避免在 await 期间持有表锁
        let handler = self.handlers.get(&envelope.command).map(|entry| Arc::clone(entry.value()));
        match handler {
            Some(handler) => {
                debug!("[Client {}] 分发命令 '{}'", client.id, envelope.command);
                handler(Arc::clone(client), envelope.message).await
            }
            None => {
                debug!("[Client {}] 命令 '{}' 没有注册处理函数，忽略", client.id, envelope.command);
                Ok(())
            }
        }
    }

    /// 依次执行所有连接回调。
    ///
    /// 每个回调都会被执行；只要有任何一个失败，返回 `WsError::ConnectRejected`。
    pub(crate) async fn run_connect_callbacks(
        &self,
        client: &Arc<Client>,
        request: &ConnectRequest,
    ) -> Result<(), WsError> {
        let callbacks = read_lock(&self.connect_callbacks).clone();
        let mut rejections = Vec::new();
        for callback in callbacks {
            if let Err(e) = callback(Arc::clone(client), request.clone()).await {
                warn!("[Client {}] 连接回调返回错误: {:#}", client.id, e);
                rejections.push(format!("{:#}", e));
            }
        }
        if rejections.is_empty() {
            Ok(())
        } else {
            Err(WsError::ConnectRejected(rejections.join("; ")))
        }
    }

    /// 依次执行所有断开回调，错误只记录日志。
    pub(crate) async fn run_disconnect_callbacks(&self, client: &Arc<Client>) {
        let callbacks = read_lock(&self.disconnect_callbacks).clone();
        for callback in callbacks {
            if let Err(e) = callback(Arc::clone(client)).await {
                error!("[Client {}] 断开回调返回错误: {:#}", client.id, e);
            }
        }
    }
}

fn read_lock<T: Clone>(lock: &RwLock<Vec<T>>) -> std::sync::RwLockReadGuard<'_, Vec<T>> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<Vec<T>>) -> std::sync::RwLockWriteGuard<'_, Vec<T>> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
