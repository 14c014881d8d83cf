// src/config.rs

//! 事件中心服务的配置信息。

use crate::error::WsError;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// WebSocket 服务的默认主机地址
pub const DEFAULT_WS_HOST: &str = "0.0.0.0";
/// WebSocket 服务的默认端口号
pub const DEFAULT_WS_PORT: u16 = 8088;

/// 事件中心服务配置
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct HubConfig {
    /// 服务绑定的主机地址
    pub host: String,
    /// 服务监听的端口号
    pub port: u16,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_WS_HOST.to_string(),
            port: DEFAULT_WS_PORT,
        }
    }
}

impl HubConfig {
    /// 从 JSON 文件加载配置。缺省的字段取默认值。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WsError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| WsError::ConfigError(format!("读取配置文件 {:?} 失败: {}", path, e)))?;
        let config = serde_json::from_str::<HubConfig>(&content)
            .map_err(|e| WsError::ConfigError(format!("解析配置文件 {:?} 失败: {}", path, e)))?;
        info!("[Config] 已从 {:?} 加载配置: {}:{}", path, config.host, config.port);
        Ok(config)
    }

    /// 加载配置，失败时记录日志并使用默认配置。
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("[Config] {}，将使用默认配置", e);
                Self::default()
            }
        }
    }

    /// 监听地址，形如 `host:port`。
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
