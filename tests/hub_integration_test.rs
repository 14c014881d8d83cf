// tests/hub_integration_test.rs

use futures_util::{SinkExt, StreamExt};
use log::{info, LevelFilter};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message as TungsteniteMessage;
use ws_event_hub::client::transport::{connect_client, ClientConnection};
use ws_event_hub::server::transport::ServerTransport;
use ws_event_hub::{Envelope, Hub, WsError};

// 辅助函数：初始化日志，仅用于测试，避免多次初始化
fn init_test_logger() {
    let _ = env_logger::builder().filter_level(LevelFilter::Info).is_test(true).try_init();
}

/// 在随机端口上启动事件中心，返回 ws:// 地址和服务任务句柄。
async fn start_hub(hub: Arc<Hub>) -> (String, tokio::task::JoinHandle<()>) {
    init_test_logger();
    let transport = ServerTransport::bind("127.0.0.1:0").await.expect("无法绑定到随机端口");
    let addr = transport.local_addr().expect("无法获取本地监听地址");
    let handle = tokio::spawn(hub.serve_on(transport));
    info!("[Test Main] 事件中心监听地址: {}", addr);
    (format!("ws://{}", addr), handle)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("等待条件成立超时");
}

async fn next_envelope(conn: &mut ClientConnection) -> Envelope {
    tokio::time::timeout(Duration::from_secs(5), conn.receive_message())
        .await
        .expect("等待消息超时")
        .expect("连接意外关闭")
        .expect("消息解析失败")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connect_registers_client_and_runs_connect_callback() {
    let hub = Arc::new(Hub::new());
    let seen_header = Arc::new(std::sync::Mutex::new(None::<String>));
    let recorded = Arc::clone(&seen_header);
    hub.on_connect(move |_, request| {
        let recorded = Arc::clone(&recorded);
        async move {
            *recorded.lock().unwrap() = request.header("x-test").map(str::to_string);
            Ok(())
        }
    });
    let (url, server) = start_hub(Arc::clone(&hub)).await;

    let mut request = url.as_str().into_client_request().unwrap();
    request.headers_mut().insert("x-test", "hello-header".parse().unwrap());
    let (_ws, response) = connect_async(request).await.expect("客户端连接失败");
    info!("[Test Main] 客户端连接成功，服务器响应状态: {}", response.status());

    wait_until(|| hub.client_count() == 1).await;
    assert_eq!(seen_header.lock().unwrap().as_deref(), Some("hello-header"));
    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_command_roundtrip_and_unknown_command() {
    let hub = Arc::new(Hub::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    hub.on("test", move |client, message| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            client.emit("test", message).await?;
            Ok(())
        }
    });
    let (url, server) = start_hub(Arc::clone(&hub)).await;

    let mut conn = connect_client(&url).await.unwrap();
    conn.emit("nobody-listens", "ignored").await.unwrap();
    conn.send_message(&Envelope::new("test", "hello")).await.unwrap();

    // 未注册的命令没有任何回应，第一条回应就是 test 的回显
    assert_eq!(next_envelope(&mut conn).await, Envelope::new("test", "hello"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(hub.client_count(), 1);
    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_raw_malformed_frame_gets_error_envelope() {
    let hub = Arc::new(Hub::new());
    let (url, server) = start_hub(Arc::clone(&hub)).await;

    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
    ws.send(TungsteniteMessage::Text("{not json".to_string())).await.unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match reply {
        TungsteniteMessage::Text(text) => {
            let envelope = Envelope::from_json(&text).unwrap();
            assert_eq!(envelope.command, "error");
        }
        other => panic!("预期文本帧，实际: {:?}", other),
    }
    assert_eq!(hub.client_count(), 1);
    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_room_and_hub_broadcast() {
    let hub = Arc::new(Hub::new());
    let rooms_hub = Arc::clone(&hub);
    hub.on("join", move |client, message| {
        let hub = Arc::clone(&rooms_hub);
        async move {
            let name = message.as_str().unwrap_or_default().to_string();
            hub.room(&name).add_client(Arc::clone(&client));
            client.emit("joined", name).await?;
            Ok(())
        }
    });
    let (url, server) = start_hub(Arc::clone(&hub)).await;

    let mut alice = connect_client(&url).await.unwrap();
    let mut bob = connect_client(&url).await.unwrap();
    let mut carol = connect_client(&url).await.unwrap();
    for conn in [&alice, &bob] {
        conn.emit("join", "lobby").await.unwrap();
    }
    assert_eq!(next_envelope(&mut alice).await.command, "joined");
    assert_eq!(next_envelope(&mut bob).await.command, "joined");

    let room = hub.room("lobby");
    assert_eq!(room.len(), 2);
    room.emit("test", "hello").await.unwrap();
    assert_eq!(next_envelope(&mut alice).await, Envelope::new("test", "hello"));
    assert_eq!(next_envelope(&mut bob).await, Envelope::new("test", "hello"));

    wait_until(|| hub.client_count() == 3).await;
    hub.emit("announce", json!({"text": "everyone"})).await.unwrap();
    for conn in [&mut alice, &mut bob, &mut carol] {
        assert_eq!(next_envelope(conn).await, Envelope::new("announce", json!({"text": "everyone"})));
    }
    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnect_removes_client_everywhere() {
    let hub = Arc::new(Hub::new());
    let disconnects = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&disconnects);
    hub.on_disconnect(move |_| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });
    let (url, server) = start_hub(Arc::clone(&hub)).await;

    let conn = connect_client(&url).await.unwrap();
    wait_until(|| hub.client_count() == 1).await;
    let id = hub.get_clients().into_keys().next().unwrap();
    hub.room("a").add_client(hub.get_client(&id).unwrap());

    conn.close().await;
    wait_until(|| hub.client_count() == 0).await;
    wait_until(|| disconnects.load(Ordering::SeqCst) == 1).await;
    assert!(!hub.room("a").contains(&id));
    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_hub_close_disconnects_peer() {
    let hub = Arc::new(Hub::new());
    let (url, server) = start_hub(Arc::clone(&hub)).await;

    let mut conn = connect_client(&url).await.unwrap();
    wait_until(|| hub.client_count() == 1).await;
    for id in hub.get_clients().into_keys() {
        assert!(hub.close(&id).await);
    }
    assert_eq!(hub.client_count(), 0);

    let after_close = tokio::time::timeout(Duration::from_secs(5), conn.receive_message())
        .await
        .expect("对端应很快观察到关闭");
    assert!(after_close.is_none());
    // 没有在线客户端时广播是空操作
    assert!(hub.emit("nobody", json!(null)).await.is_ok());
    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rejected_connection_is_closed() {
    let hub = Arc::new(Hub::new());
    hub.on_connect(|_, request| async move {
        match request.query_param("token").as_deref() {
            Some("secret") => Ok(()),
            _ => anyhow::bail!("missing token"),
        }
    });
    let (url, server) = start_hub(Arc::clone(&hub)).await;

    let mut rejected = connect_client(&url).await.unwrap();
    let end = tokio::time::timeout(Duration::from_secs(5), rejected.receive_message())
        .await
        .expect("被拒绝的连接应被关闭");
    assert!(end.is_none());
    assert_eq!(hub.client_count(), 0);

    let _accepted = connect_client(&format!("{}/?token=secret", url)).await.unwrap();
    wait_until(|| hub.client_count() == 1).await;
    server.abort();
}

#[tokio::test]
async fn test_handshake_failure_creates_no_client() {
    init_test_logger();
    let hub = Arc::new(Hub::new());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let plain_http = tokio::spawn(async move {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf).await;
        String::from_utf8_lossy(&buf).to_string()
    });

    let (stream, peer) = listener.accept().await.unwrap();
    let result = hub.handle_connection(stream, peer).await;
    assert!(matches!(result, Err(WsError::WebSocketProtocolError(_))));
    assert_eq!(hub.client_count(), 0);

    let response = plain_http.await.unwrap();
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"), "预期握手失败响应，实际: {}", response);
}

#[test]
fn test_get_hub_is_process_wide() {
    assert!(Arc::ptr_eq(&ws_event_hub::get_hub(), &ws_event_hub::get_hub()));
}
