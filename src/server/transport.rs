// src/server/transport.rs

//! 服务端 WebSocket 传输层：监听、握手以及按帧读写信封。
//!
//! 本模块把 `tokio-tungstenite` 的细节收拢在一处，事件中心的其余部分只面对
//! `ConnectionHandler`（写半部分）、`FrameStream`（读半部分）和 `ConnectRequest`（握手请求上下文）。

use crate::error::WsError;
use crate::message::Envelope;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, error, info, warn};
use std::borrow::Cow;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderMap, Uri};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as TungsteniteError;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

/// 连接写半部分的类型擦除形式，服务端和拨号端的流都可以放进来。
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = TungsteniteError> + Send>>;

/// 连接读半部分的类型擦除形式。
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Message, TungsteniteError>> + Send>>;

/// 握手时捕获的升级请求上下文，会交给连接回调使用。
#[derive(Debug, Clone, Default)]
pub struct ConnectRequest {
    /// 对端地址。通过非 TCP 流（例如测试中的内存管道）建立的连接可能没有地址。
    pub peer_addr: Option<SocketAddr>,
    /// 升级请求的 URI，包括路径和查询字符串。
    pub uri: Uri,
    /// 升级请求的全部 HTTP 头。
    pub headers: HeaderMap,
}

impl ConnectRequest {
    /// 读取某个请求头的字符串值。
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// 读取查询字符串中的某个参数，按 `application/x-www-form-urlencoded` 规则解码。
    pub fn query_param(&self, key: &str) -> Option<String> {
        let query = self.uri.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| Cow::into_owned(v))
    }
}

/// 持有一个连接的写半部分，负责把信封编码为文本帧写出。
///
/// 本身不做并发保护；`Client` 用一把异步互斥锁包住它来保证帧不会交错。
pub struct ConnectionHandler {
    ws_sender: FrameSink,
}

impl ConnectionHandler {
    pub fn new(ws_sender: FrameSink) -> Self {
        Self { ws_sender }
    }

    /// 序列化并发送一个信封。
    pub async fn send_message(&mut self, envelope: &Envelope) -> Result<(), WsError> {
        let text = envelope.to_json()?;
        self.send_text(text).await
    }

    /// 发送已经序列化好的文本帧，广播时只需序列化一次。
    pub async fn send_text(&mut self, text: String) -> Result<(), WsError> {
        debug!("[Transport] 发送文本帧: {}", text);
        self.ws_sender.send(Message::Text(text)).await?;
        Ok(())
    }

    /// 发起关闭握手（发送 Close 帧）并关闭写半部分。
    pub async fn close(&mut self) -> Result<(), WsError> {
        self.ws_sender.close().await?;
        Ok(())
    }
}

/// 把一个已经完成握手的 WebSocket 流拆成写句柄和读流。
pub fn split_connection<S>(ws_stream: WebSocketStream<S>) -> (ConnectionHandler, FrameStream)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws_stream.split();
    (ConnectionHandler::new(Box::pin(sink)), Box::pin(stream))
}

/// 从读流中接收并解析下一个信封。
///
/// # Returns
/// * `Some(Ok(envelope))` - 收到并成功解析了一个文本帧。
/// * `Some(Err(WsError::DeserializationError))` - 帧内容不是合法信封，或者是二进制帧；调用方可以继续读取。
/// * `Some(Err(WsError::WebSocketProtocolError))` - 读取失败，连接应视为断开。
/// * `None` - 收到 Close 帧或流已结束。
///
/// Ping/Pong 帧由 tungstenite 自动应答，这里直接跳过。
pub async fn receive_message(frames: &mut FrameStream) -> Option<Result<Envelope, WsError>> {
    loop {
        match frames.next().await? {
            Ok(Message::Text(text)) => {
                debug!("[Transport] 收到文本帧: {}", text);
                break Some(Envelope::from_json(&text));
            }
            Ok(Message::Binary(bytes)) => {
                break Some(Err(WsError::DeserializationError(format!(
                    "不支持二进制帧 ({} 字节)，信封必须以文本帧发送",
                    bytes.len()
                ))));
            }
            Ok(Message::Close(frame)) => {
                debug!("[Transport] 收到 Close 帧: {:?}", frame);
                break None;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
            Err(TungsteniteError::ConnectionClosed) | Err(TungsteniteError::AlreadyClosed) => break None,
            Err(e) => break Some(Err(WsError::WebSocketProtocolError(e))),
        }
    }
}

/// 握手失败时写回给对端的响应。
const UPGRADE_FAILURE_RESPONSE: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";

/// 握手期间包裹原始流。
///
/// tungstenite 在握手失败时会直接丢弃流而不写任何响应；本类型在被丢弃时把原始流
/// 通过 oneshot 交还给 `accept_connection`，由它写回 400 响应。握手成功后解除交还。
pub struct UpgradeStream<S> {
    inner: Option<S>,
    rescue: Option<oneshot::Sender<S>>,
}

impl<S> UpgradeStream<S> {
    fn new(stream: S) -> (Self, oneshot::Receiver<S>) {
        let (rescue, rescued) = oneshot::channel();
        let wrapped = Self {
            inner: Some(stream),
            rescue: Some(rescue),
        };
        (wrapped, rescued)
    }

    fn disarm(&mut self) {
        self.rescue = None;
    }

    fn inner_mut(&mut self) -> io::Result<&mut S> {
        self.inner
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }
}

impl<S> Drop for UpgradeStream<S> {
    fn drop(&mut self) {
        if let (Some(rescue), Some(stream)) = (self.rescue.take(), self.inner.take()) {
            let _ = rescue.send(stream);
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for UpgradeStream<S> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().inner_mut() {
            Ok(stream) => Pin::new(stream).poll_read(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for UpgradeStream<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut().inner_mut() {
            Ok(stream) => Pin::new(stream).poll_write(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().inner_mut() {
            Ok(stream) => Pin::new(stream).poll_flush(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().inner_mut() {
            Ok(stream) => Pin::new(stream).poll_shutdown(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

/// 在给定的流上执行 WebSocket 服务端握手，同时捕获升级请求。
///
/// 握手失败时先向对端写回 `400 Bad Request` 并关闭写方向，再把错误返回给调用方，
/// 此时不会产生任何客户端。
pub async fn accept_connection<S>(
    stream: S,
    peer_addr: Option<SocketAddr>,
) -> Result<(WebSocketStream<UpgradeStream<S>>, ConnectRequest), WsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (upgrade_stream, mut rescued) = UpgradeStream::new(stream);
    let mut captured: Option<(Uri, HeaderMap)> = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        captured = Some((request.uri().clone(), request.headers().clone()));
        Ok(response)
    };
    let result = accept_hdr_async(upgrade_stream, callback).await;

    match result {
        Ok(mut ws_stream) => {
            ws_stream.get_mut().disarm();
            let (uri, headers) = captured.unwrap_or_default();
            Ok((
                ws_stream,
                ConnectRequest {
                    peer_addr,
                    uri,
                    headers,
                },
            ))
        }
        Err(e) => {
            if let Ok(mut raw) = rescued.try_recv() {
                let written = async {
                    raw.write_all(UPGRADE_FAILURE_RESPONSE).await?;
                    raw.shutdown().await
                };
                if let Err(write_err) = written.await {
                    debug!("[Transport] 写回握手失败响应出错（对端可能已断开）: {}", write_err);
                }
            }
            Err(WsError::WebSocketProtocolError(e))
        }
    }
}

/// `ServerTransport` 负责 TCP 监听并为每个连接派生独立任务。
pub struct ServerTransport {
    listener: TcpListener,
}

impl ServerTransport {
    /// 绑定监听地址。地址端口为 0 时由系统分配，可通过 `local_addr` 查询。
    pub async fn bind(addr: &str) -> Result<Self, WsError> {
        let listener = TcpListener::bind(addr).await?;
        info!("[Transport] WebSocket 服务器正在监听地址: {}", listener.local_addr()?);
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, WsError> {
        Ok(self.listener.local_addr()?)
    }

    /// 持续接受连接，对每个 TCP 连接在新任务中调用 `on_connect`。
    ///
    /// 握手交给 `on_connect` 完成，这样握手失败只影响该连接。
    /// 接受单个连接失败只记录日志，监听继续。此函数只在任务被取消时结束。
    pub async fn run<F, Fut>(self, on_connect: F)
    where
        F: Fn(TcpStream, SocketAddr) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        loop {
            match self.listener.accept().await {
                Ok((tcp_stream, peer_addr)) => {
                    debug!("[Transport] 从 {} 接受了新的 TCP 连接", peer_addr);
                    if let Err(e) = tcp_stream.set_nodelay(true) {
                        warn!("[Transport] 为 {} 设置 TCP_NODELAY 失败: {}", peer_addr, e);
                    }
                    let on_connect_callback = on_connect.clone();
                    tokio::spawn(async move {
                        on_connect_callback(tcp_stream, peer_addr).await;
                    });
                }
                Err(e) => {
                    error!("[Transport] 接受 TCP 连接失败: {}。服务器将继续运行。", e);
                }
            }
        }
    }
}
