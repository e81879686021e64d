//! 实时通道消息格式
//!
//! 每个 WebSocket 文本帧是一个 JSON 对象: `{"type": "<kind>", "content": <payload>}`
//!
//! 客户端 → 服务端:
//! - `newEntry`: content 为文本
//! - `delEntry` / `deleteEntry`: content 为条目 ID
//! - `clearClipboard`: 无 content
//!
//! 服务端 → 客户端只有 `refreshClipboard`，提示浏览器重新拉取剪贴板。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 原始帧
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub content: Value,
}

/// 解析后的客户端事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    NewEntry(String),
    DeleteEntry(u64),
    ClearClipboard,
    Unknown(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid payload for {kind}: {reason}")]
    InvalidPayload { kind: String, reason: String },
}

impl Frame {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// 把帧解释为客户端事件
    pub fn event(&self) -> Result<ClientEvent, ProtocolError> {
        match self.kind.as_str() {
            "newEntry" => match &self.content {
                Value::String(text) => Ok(ClientEvent::NewEntry(text.clone())),
                Value::Null => Ok(ClientEvent::NewEntry(String::new())),
                other => Err(self.invalid(format!("expected text, got {other}"))),
            },
            "delEntry" | "deleteEntry" => entry_id(&self.content)
                .map(ClientEvent::DeleteEntry)
                .ok_or_else(|| self.invalid(format!("expected entry id, got {}", self.content))),
            "clearClipboard" => Ok(ClientEvent::ClearClipboard),
            other => Ok(ClientEvent::Unknown(other.to_string())),
        }
    }

    fn invalid(&self, reason: String) -> ProtocolError {
        ProtocolError::InvalidPayload {
            kind: self.kind.clone(),
            reason,
        }
    }
}

/// ID 可以是数字、数字字符串，或 `{"id": n}` / `{"content": n}`
fn entry_id(content: &Value) -> Option<u64> {
    match content {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(map) => map
            .get("id")
            .or_else(|| map.get("content"))
            .and_then(entry_id),
        _ => None,
    }
}

/// 服务端下发的帧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundFrame {
    RefreshClipboard,
}

impl OutboundFrame {
    pub fn to_frame(self) -> Frame {
        match self {
            OutboundFrame::RefreshClipboard => Frame {
                kind: "refreshClipboard".to_string(),
                content: Value::Null,
            },
        }
    }

    pub fn to_text(self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_frame())
    }
}
