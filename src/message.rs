// src/message.rs

//! 定义 WebSocket 通信中使用的信封结构 `Envelope`。
//!
//! 线上格式固定为 `{"command": <string>, "message": <any>}`。
//! 入站帧按此格式解析，出站帧按此格式写出；`message` 可以是任意 JSON 值，也可以缺省。

use crate::error::WsError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 约定的错误命令名，`emit_error` 系列方法使用它。
pub const ERROR_COMMAND: &str = "error";

/// `Envelope` 是客户端与事件中心之间交换的基本单元。
///
/// - `command`: 命令名，接收方据此把信封分发给对应的处理函数。
/// - `message`: 任意负载。入站帧缺省该字段时解析为 `Value::Null`。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Envelope {
    pub command: String,
    #[serde(default)]
    pub message: Value,
}

impl Envelope {
    /// 用命令名和已经是 JSON 值的负载创建信封。
    pub fn new(command: impl Into<String>, message: impl Into<Value>) -> Self {
        Envelope {
            command: command.into(),
            message: message.into(),
        }
    }

    /// 用任意可序列化的负载创建信封。
    ///
    /// # Returns
    /// * `Result<Envelope, WsError>` - 负载无法序列化为 JSON 时返回 `WsError::SerializationError`。
    pub fn from_payload<T: Serialize>(command: impl Into<String>, payload: &T) -> Result<Self, WsError> {
        let message = serde_json::to_value(payload)
            .map_err(|e| WsError::SerializationError(format!("创建 Envelope 时序列化载荷失败: {}", e)))?;
        Ok(Envelope {
            command: command.into(),
            message,
        })
    }

    /// 便捷构造：`{"command": "error", "message": text}`。
    pub fn error(text: impl Into<String>) -> Self {
        Envelope::new(ERROR_COMMAND, Value::String(text.into()))
    }

    /// 将负载反序列化为指定的目标类型 `T`。
    pub fn deserialize_payload<T: DeserializeOwned>(&self) -> Result<T, WsError> {
        serde_json::from_value(self.message.clone()).map_err(|e| {
            WsError::DeserializationError(format!(
                "Envelope 载荷反序列化为目标类型失败: {}, 原始载荷: '{}'",
                e, self.message
            ))
        })
    }

    /// 序列化为一帧文本。
    pub fn to_json(&self) -> Result<String, WsError> {
        serde_json::to_string(self)
            .map_err(|e| WsError::SerializationError(format!("Envelope 序列化为JSON失败: {}", e)))
    }

    /// 从一帧文本解析信封。格式错误或缺少 `command` 时显式返回错误，不会静默丢弃。
    pub fn from_json(text: &str) -> Result<Self, WsError> {
        serde_json::from_str(text).map_err(|e| {
            WsError::DeserializationError(format!("无法将文本解析为 Envelope: {}, 原始文本: '{}'", e, text))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct ChatPayload {
        room: String,
        text: String,
    }

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = Envelope::new("test", "hello");
        let text = envelope.to_json().expect("序列化不应失败");
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"command": "test", "message": "hello"}));
    }

    #[test]
    fn test_null_message_is_still_written() {
        let text = Envelope::new("ping", Value::Null).to_json().unwrap();
        assert_eq!(text, r#"{"command":"ping","message":null}"#);
    }

    #[test]
    fn test_missing_message_decodes_as_null() {
        let envelope = Envelope::from_json(r#"{"command":"ping"}"#).expect("缺省 message 应被接受");
        assert_eq!(envelope.command, "ping");
        assert_eq!(envelope.message, Value::Null);
    }

    #[test]
    fn test_malformed_json_fails_explicitly() {
        for bad in ["not json", r#"{"command": "x""#, r#"{"message": "no command"}"#, "[1,2]"] {
            match Envelope::from_json(bad) {
                Err(WsError::DeserializationError(_)) => {}
                other => panic!("输入 {:?} 预期得到 DeserializationError，实际: {:?}", bad, other),
            }
        }
    }

    #[test]
    fn test_typed_payload() {
        let payload = ChatPayload {
            room: "lobby".to_string(),
            text: "hi".to_string(),
        };
        let envelope = Envelope::from_payload("chat", &payload).unwrap();
        assert_eq!(envelope.message, json!({"room": "lobby", "text": "hi"}));
        let back: ChatPayload = envelope.deserialize_payload().unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_deserialize_payload_to_mismatched_type() {
        let envelope = Envelope::new("chat", json!({"other": 1}));
        let result: Result<ChatPayload, WsError> = envelope.deserialize_payload();
        assert!(matches!(result, Err(WsError::DeserializationError(_))));
    }

    #[test]
    fn test_error_envelope() {
        let envelope = Envelope::error("bad thing");
        assert_eq!(envelope.command, ERROR_COMMAND);
        assert_eq!(envelope.message, json!("bad thing"));
    }
}
