//! 共享剪贴板
//!
//! 所有浏览器会话共享的文本条目列表，仅保存在内存中。
//!
//! - 读写通过同一把 `RwLock` 串行化，持锁期间不做任何 IO
//! - 每次成功修改后发出 [`ClipboardEvent`]，由同步中心决定如何通知会话

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;

/// 事件通道容量，订阅者落后时只会收到 `Lagged`，不会阻塞写入方
const EVENT_CAPACITY: usize = 64;

/// 剪贴板条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: u64,
    pub text: String,
    /// 创建时间（本地时间，仅用于展示）
    pub time: String,
}

/// 剪贴板变更事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipboardEvent {
    Added(u64),
    Deleted(u64),
    Cleared,
}

#[derive(Debug, thiserror::Error)]
pub enum ClipboardError {
    #[error("Clipboard entry {0} not found")]
    NotFound(u64),
}

#[derive(Debug, Default)]
struct ClipboardState {
    entries: Vec<Entry>,
    /// 下一个分配的 ID，清空后也不回退
    next_id: u64,
}

/// 剪贴板存储
#[derive(Debug)]
pub struct Clipboard {
    state: RwLock<ClipboardState>,
    events_tx: broadcast::Sender<ClipboardEvent>,
}

impl Default for Clipboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Clipboard {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: RwLock::new(ClipboardState::default()),
            events_tx,
        }
    }

    /// 订阅变更事件
    pub fn subscribe(&self) -> broadcast::Receiver<ClipboardEvent> {
        self.events_tx.subscribe()
    }

    /// 追加条目，返回新分配的 ID
    pub fn add(&self, text: impl Into<String>) -> u64 {
        let id = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let id = state.next_id;
            state.next_id += 1;
            state.entries.push(Entry {
                id,
                text: text.into(),
                time: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            });
            id
        };
        self.emit(ClipboardEvent::Added(id));
        id
    }

    /// 按 ID 删除条目
    pub fn delete(&self, id: u64) -> Result<(), ClipboardError> {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let index = state
                .entries
                .iter()
                .position(|e| e.id == id)
                .ok_or(ClipboardError::NotFound(id))?;
            state.entries.remove(index);
        }
        self.emit(ClipboardEvent::Deleted(id));
        Ok(())
    }

    /// 清空全部条目
    pub fn clear(&self) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clear();
        self.emit(ClipboardEvent::Cleared);
    }

    /// 当前条目的只读副本
    pub fn snapshot(&self) -> Vec<Entry> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clone()
    }

    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 导出为 JSON（用于下载）
    pub fn export(&self) -> Result<Vec<u8>, serde_json::Error> {
        let snapshot = self.snapshot();
        serde_json::to_vec_pretty(&snapshot)
    }

    fn emit(&self, event: ClipboardEvent) {
        // 没有订阅者时发送失败是正常情况
        let _ = self.events_tx.send(event);
    }
}
