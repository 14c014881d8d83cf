// src/main.rs

use anyhow::Context;
use log::{info, LevelFilter};
use serde::Deserialize;
use std::sync::Arc;
use ws_event_hub::config::HubConfig;
use ws_event_hub::get_hub;

/// `say` 命令的负载
#[derive(Deserialize)]
struct SayPayload {
    room: String,
    text: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志记录器，RUST_LOG 可覆盖默认级别
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_millis()
        .init();
    info!("[主程序] 日志系统已初始化 (env_logger)，默认级别: Info。");

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "hub_settings.json".to_string());
    let config = HubConfig::load_or_default(&config_path);

    let hub = get_hub();

    hub.on_connect(|client, request| async move {
        info!("[主程序] 客户端 {} 已连接，路径: {}", client.id, request.uri);
        if let Some(name) = request.query_param("name") {
            client.set("name", name);
        }
        Ok(())
    });

    hub.on_disconnect(|client| async move {
        info!("[主程序] 客户端 {} 已断开", client.id);
        Ok(())
    });

    hub.on("echo", |client, message| async move {
        client.emit("echo", message).await?;
        Ok(())
    });

    let rooms_hub = Arc::clone(&hub);
    hub.on("join", move |client, message| {
        let hub = Arc::clone(&rooms_hub);
        async move {
            let name = message.as_str().context("join 的 message 必须是房间名字符串")?;
            let room = hub.room(name);
            room.add_client(Arc::clone(&client));
            room.emit("joined", client.id.clone()).await?;
            Ok(())
        }
    });

    let rooms_hub = Arc::clone(&hub);
    hub.on("leave", move |client, message| {
        let hub = Arc::clone(&rooms_hub);
        async move {
            let name = message.as_str().context("leave 的 message 必须是房间名字符串")?;
            let room = hub.room(name);
            room.remove_client(&client.id);
            room.emit("left", client.id.clone()).await?;
            Ok(())
        }
    });

    let rooms_hub = Arc::clone(&hub);
    hub.on("say", move |client, message| {
        let hub = Arc::clone(&rooms_hub);
        async move {
            let payload: SayPayload = serde_json::from_value(message).context("say 的负载格式无效")?;
            let room = hub.room(&payload.room);
            if !room.contains(&client.id) {
                anyhow::bail!("尚未加入房间 '{}'", payload.room);
            }
            let sender = client.get("name").unwrap_or_else(|| client.id.clone().into());
            room.emit("said", serde_json::json!({ "from": sender, "text": payload.text })).await?;
            Ok(())
        }
    });

    info!("[主程序] 正在启动事件中心，监听 {}", config.listen_addr());
    hub.serve(&config.listen_addr())
        .await
        .context("事件中心服务启动失败")?;
    Ok(())
}
