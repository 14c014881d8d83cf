// src/hub/service.rs

//! 连接生命周期：握手升级、连接回调、每个客户端独立的接收循环以及断开清理。

use crate::error::WsError;
use crate::hub::client_session::Client;
use crate::hub::connection_manager::Hub;
use crate::server::transport::{accept_connection, receive_message, ConnectRequest, FrameStream, ServerTransport};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;

impl Hub {
    /// 升级入口：在原始流上完成 WebSocket 握手，然后接管该连接直到其结束。
    ///
    /// - 握手失败时立即返回错误，不会创建客户端。
    /// - 握手成功后本函数在连接结束前不会返回（接收循环在当前任务中运行）。
    /// - 连接回调拒绝时返回 `WsError::ConnectRejected`，连接在接收循环开始前被关闭。
    pub async fn handle_connection<S>(&self, stream: S, peer_addr: SocketAddr) -> Result<(), WsError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (ws_stream, request) = match accept_connection(stream, Some(peer_addr)).await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("[Hub] 与 {} 的 WebSocket 握手失败: {}", peer_addr, e);
                return Err(e);
            }
        };
        info!("[Hub] 与 {} 的 WebSocket 握手成功，请求路径: {}", peer_addr, request.uri);
        self.serve_connection(ws_stream, request).await
    }

    /// 接管一个已经完成握手的连接。
    ///
    /// 创建客户端并注册，执行连接回调，然后运行接收循环直到连接结束并完成清理。
    pub async fn serve_connection<S>(&self, ws_stream: WebSocketStream<S>, request: ConnectRequest) -> Result<(), WsError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (client, mut frames) = Client::new(ws_stream);
        self.add_client(Arc::clone(&client));
        info!(
            "[Hub] 新客户端已连接: id={}, addr={:?}",
            client.id, request.peer_addr
        );

        if let Err(e) = self.run_connect_callbacks(&client, &request).await {
            warn!("[Hub] 客户端 {} 被连接回调拒绝: {}", client.id, e);
            self.detach_client(&client.id);
            client.close().await;
            return Err(e);
        }

        self.receive_loop(&client, &mut frames).await;
        self.terminate(&client).await;
        Ok(())
    }

    /// 绑定地址并为每个接受的连接派生任务执行 `handle_connection`。
    pub async fn serve(self: Arc<Self>, addr: &str) -> Result<(), WsError> {
        let transport = ServerTransport::bind(addr).await?;
        self.serve_on(transport).await;
        Ok(())
    }

    /// 在已经绑定的监听器上提供服务。只在任务被取消时返回。
    pub async fn serve_on(self: Arc<Self>, transport: ServerTransport) {
        transport
            .run(move |tcp_stream, peer_addr| {
                let hub = Arc::clone(&self);
                async move {
                    match hub.handle_connection(tcp_stream, peer_addr).await {
                        Ok(()) => debug!("[Hub] 与 {} 的连接处理任务已结束", peer_addr),
                        Err(e) => warn!("[Hub] 与 {} 的连接以错误结束: {}", peer_addr, e),
                    }
                }
            })
            .await;
    }

    /// 每个客户端一个的接收循环。
    ///
    /// 读取失败（包括对端正常关闭）或本端调用 `close` 时结束；
    /// 单个格式错误的帧和处理函数的错误都只会上报给该客户端，不会结束循环。
    async fn receive_loop(&self, client: &Arc<Client>, frames: &mut FrameStream) {
        loop {
            let next = tokio::select! {
                biased;
                _ = client.closed() => {
                    info!("[Client {}] 连接已被本端关闭，接收循环结束", client.id);
                    break;
                }
                next = receive_message(frames) => next,
            };

            match next {
                Some(Ok(envelope)) => {
                    let command = envelope.command.clone();
                    if let Err(e) = self.dispatch_command(client, envelope).await {
                        warn!("[Client {}] 处理命令 '{}' 失败: {:#}", client.id, command, e);
                        self.report_error(client, &format!("{:#}", e)).await;
                    }
                }
                Some(Err(WsError::DeserializationError(e))) => {
                    warn!("[Client {}] 收到无法解析的帧: {}", client.id, e);
                    self.report_error(client, &format!("无效的消息格式: {}", e)).await;
                }
                Some(Err(e)) => {
                    warn!("[Client {}] 读取失败，视为断开: {}", client.id, e);
                    break;
                }
                None => {
                    info!("[Client {}] 对端关闭了连接", client.id);
                    break;
                }
            }
        }
    }

    /// 向客户端发送错误信封，发送失败只记录日志。
    async fn report_error(&self, client: &Arc<Client>, text: &str) {
        if let Err(e) = client.emit_error(text).await {
            debug!("[Client {}] 发送错误通知失败: {}", client.id, e);
        }
    }

    /// 连接结束后的清理：移出注册表和所有房间、执行断开回调、释放连接。
    async fn terminate(&self, client: &Arc<Client>) {
        self.detach_client(&client.id);
        self.run_disconnect_callbacks(client).await;
        client.close().await;
        let duration = Utc::now().signed_duration_since(client.connected_at);
        info!(
            "[Hub] 客户端 {} 已断开，会话时长 {} 秒，剩余在线 {} 个",
            client.id,
            duration.num_seconds(),
            self.client_count()
        );
    }
}
