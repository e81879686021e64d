//! 同步中心
//!
//! 单个控制循环独占会话注册表，注册、注销、广播三类事件都经由同一个
//! 命令通道串行处理，因此注册表本身不需要锁。
//!
//! 广播对每个会话是尽力而为的：会话的发送队列满了或已关闭，就直接把它
//! 移出注册表，不会等待慢会话。

use crate::clipboard::ClipboardEvent;
use crate::sync::protocol::OutboundFrame;
use log::{debug, info, warn};
use std::collections::HashMap;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 命令通道容量
const COMMAND_CAPACITY: usize = 256;

pub type SessionId = Uuid;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("Sync hub is not running")]
    Closed,
}

enum HubCommand {
    Register {
        id: SessionId,
        outbound: mpsc::Sender<OutboundFrame>,
        done: oneshot::Sender<()>,
    },
    Unregister {
        id: SessionId,
    },
    Broadcast(OutboundFrame),
    SessionCount(oneshot::Sender<usize>),
}

/// 控制循环
pub struct SyncHub {
    commands: mpsc::Receiver<HubCommand>,
    clipboard_events: Option<broadcast::Receiver<ClipboardEvent>>,
    sessions: HashMap<SessionId, mpsc::Sender<OutboundFrame>>,
}

/// 与控制循环通信的句柄，可任意克隆
#[derive(Clone, Debug)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
}

impl SyncHub {
    /// 创建控制循环和对应的句柄
    ///
    /// `clipboard_events` 中的每个事件都会触发一次 `refreshClipboard` 广播。
    pub fn new(clipboard_events: Option<broadcast::Receiver<ClipboardEvent>>) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let hub = Self {
            commands: rx,
            clipboard_events,
            sessions: HashMap::new(),
        };
        (hub, HubHandle { commands: tx })
    }

    /// 运行直到 `shutdown` 被取消或所有句柄都被丢弃
    ///
    /// 退出时丢弃所有会话的发送端，各会话的写任务随之发送关闭帧并退出。
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Sync hub started");

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    debug!("Sync hub received shutdown");
                    break;
                }

                cmd = self.commands.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => break,
                    }
                }

                event = next_clipboard_event(&mut self.clipboard_events),
                    if self.clipboard_events.is_some() =>
                {
                    match event {
                        Ok(event) => {
                            debug!("Clipboard changed: {:?}", event);
                            self.fan_out(OutboundFrame::RefreshClipboard);
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            // 刷新是幂等的，补发一次即可
                            debug!("Clipboard events lagged by {}", skipped);
                            self.fan_out(OutboundFrame::RefreshClipboard);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("Clipboard event channel closed");
                            self.clipboard_events = None;
                        }
                    }
                }
            }
        }

        info!("Sync hub stopped, closing {} session(s)", self.sessions.len());
        self.sessions.clear();
    }

    fn handle_command(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register { id, outbound, done } => {
                self.sessions.insert(id, outbound);
                debug!("Session {} registered ({} active)", id, self.sessions.len());
                let _ = done.send(());
            }
            HubCommand::Unregister { id } => {
                if self.sessions.remove(&id).is_some() {
                    debug!("Session {} unregistered ({} active)", id, self.sessions.len());
                }
            }
            HubCommand::Broadcast(frame) => self.fan_out(frame),
            HubCommand::SessionCount(reply) => {
                let _ = reply.send(self.sessions.len());
            }
        }
    }

    fn fan_out(&mut self, frame: OutboundFrame) {
        let mut dropped = Vec::new();

        for (id, outbound) in &self.sessions {
            match outbound.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("Session {} outbound queue full, dropping session", id);
                    dropped.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Session {} already closed", id);
                    dropped.push(*id);
                }
            }
        }

        for id in dropped {
            self.sessions.remove(&id);
        }
    }
}

async fn next_clipboard_event(
    events: &mut Option<broadcast::Receiver<ClipboardEvent>>,
) -> Result<ClipboardEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl HubHandle {
    /// 注册会话；返回时控制循环已经把它加入注册表
    pub async fn register(
        &self,
        id: SessionId,
        outbound: mpsc::Sender<OutboundFrame>,
    ) -> Result<(), HubError> {
        let (done, ack) = oneshot::channel();
        self.commands
            .send(HubCommand::Register { id, outbound, done })
            .await
            .map_err(|_| HubError::Closed)?;
        ack.await.map_err(|_| HubError::Closed)
    }

    /// 注销会话；重复注销是无害的
    pub async fn unregister(&self, id: SessionId) {
        let _ = self.commands.send(HubCommand::Unregister { id }).await;
    }

    pub async fn broadcast(&self, frame: OutboundFrame) -> Result<(), HubError> {
        self.commands
            .send(HubCommand::Broadcast(frame))
            .await
            .map_err(|_| HubError::Closed)
    }

    /// 当前注册的会话数量
    pub async fn session_count(&self) -> Result<usize, HubError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(HubCommand::SessionCount(reply))
            .await
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)
    }
}
