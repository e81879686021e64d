//! 实时会话
//!
//! 每个 WebSocket 连接对应一个会话，恰好由两个任务组成：
//!
//! - 读任务：处理入站帧并修改剪贴板（运行在升级回调所在的任务中）
//! - 写任务：独占连接的写端，消费有界发送队列并定时发送 ping
//!
//! 任一方向结束都会取消会话令牌，另一方向随之退出，最后从同步中心注销。

use crate::clipboard::{Clipboard, ClipboardError};
use crate::sync::hub::{HubHandle, SessionId};
use crate::sync::protocol::{ClientEvent, Frame, OutboundFrame};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, info, warn};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at, timeout};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 发送队列容量
pub const OUTBOUND_QUEUE: usize = 64;

/// 入站帧大小上限
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// 心跳与写入超时
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimings {
    /// ping 周期，必须小于 `pong_wait`
    pub ping_period: Duration,
    /// 超过该时间没有任何入站帧（包括 pong）即视为断线
    pub pong_wait: Duration,
    /// 单次写入的超时
    pub write_wait: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            ping_period: Duration::from_secs(54),
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
        }
    }
}

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

pub struct Session {
    id: SessionId,
    state: SessionState,
    timings: SessionTimings,
    hub: HubHandle,
    clipboard: Arc<Clipboard>,
}

impl Session {
    pub fn new(hub: HubHandle, clipboard: Arc<Clipboard>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Connecting,
            timings: SessionTimings::default(),
            hub,
            clipboard,
        }
    }

    pub fn with_timings(mut self, timings: SessionTimings) -> Self {
        self.timings = timings;
        self
    }

    /// 驱动会话直到连接关闭
    pub async fn run(self, socket: WebSocket) {
        let (sink, stream) = socket.split();
        self.serve(sink, stream).await;
    }

    /// 在任意一对读写端上驱动会话
    ///
    /// 写端交给独立任务，读端在当前任务中消费。返回时会话已经注销，
    /// 写任务也已结束。
    pub async fn serve<Tx, Rx, E>(mut self, mut sink: Tx, stream: Rx)
    where
        Tx: Sink<Message> + Unpin + Send + 'static,
        Tx::Error: Display + Send,
        Rx: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);

        if let Err(e) = self.hub.register(self.id, outbound_tx).await {
            warn!("Session {} rejected: {}", self.id, e);
            let _ = sink.send(Message::Close(None)).await;
            self.transition(SessionState::Closed);
            return;
        }
        self.transition(SessionState::Active);

        let closed = CancellationToken::new();
        let writer = tokio::spawn(write_pump(
            self.id,
            sink,
            outbound_rx,
            self.timings,
            closed.clone(),
        ));
        read_pump(
            self.id,
            stream,
            &self.clipboard,
            &self.hub,
            self.timings.pong_wait,
            &closed,
        )
        .await;

        self.transition(SessionState::Closing);
        closed.cancel();
        self.hub.unregister(self.id).await;
        if let Err(e) = writer.await {
            warn!("Session {} writer task failed: {}", self.id, e);
        }
        self.transition(SessionState::Closed);
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }
}

async fn read_pump<Rx, E>(
    id: SessionId,
    mut stream: Rx,
    clipboard: &Clipboard,
    hub: &HubHandle,
    pong_wait: Duration,
    closed: &CancellationToken,
) where
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let next = tokio::select! {
            () = closed.cancelled() => break,
            next = timeout(pong_wait, stream.next()) => next,
        };

        let msg = match next {
            Err(_) => {
                info!("Session {} heartbeat timed out", id);
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!("Session {} read error: {}", id, e);
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => {
                if let Some(frame) = handle_text(id, clipboard, &text) {
                    if let Err(e) = hub.broadcast(frame).await {
                        debug!("Session {} could not broadcast: {}", id, e);
                    }
                }
            }
            Message::Close(_) => break,
            Message::Binary(data) => {
                warn!("Session {} sent {} bytes of binary data, ignored", id, data.len());
            }
            // 读到任何帧都已经刷新了超时
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}

async fn write_pump<Tx>(
    id: SessionId,
    mut sink: Tx,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    timings: SessionTimings,
    closed: CancellationToken,
) where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
{
    let mut heartbeat = interval_at(Instant::now() + timings.ping_period, timings.ping_period);

    loop {
        let message = tokio::select! {
            () = closed.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => match frame.to_text() {
                    Ok(text) => Message::Text(text),
                    Err(e) => {
                        warn!("Session {} failed to encode {:?}: {}", id, frame, e);
                        continue;
                    }
                },
                None => {
                    debug!("Session {} outbound queue closed by hub", id);
                    break;
                }
            },
            _ = heartbeat.tick() => Message::Ping(Vec::new()),
        };

        match timeout(timings.write_wait, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Session {} write error: {}", id, e);
                closed.cancel();
                return;
            }
            Err(_) => {
                warn!("Session {} write timed out", id);
                closed.cancel();
                return;
            }
        }
    }

    let _ = timeout(timings.write_wait, sink.send(Message::Close(None))).await;
    closed.cancel();
}

/// 处理一个入站文本帧；所有错误只记录日志，连接保持打开
///
/// 剪贴板的成功修改由同步中心订阅后广播刷新；删除不存在的条目不会
/// 产生剪贴板事件，此时返回需要会话自己广播的刷新帧。
pub fn handle_text(id: SessionId, clipboard: &Clipboard, text: &str) -> Option<OutboundFrame> {
    let event = match Frame::parse(text).and_then(|frame| frame.event()) {
        Ok(event) => event,
        Err(e) => {
            warn!("Session {} sent an invalid frame: {}", id, e);
            return None;
        }
    };

    debug!("Session {} event: {:?}", id, event);

    match event {
        ClientEvent::NewEntry(text) => {
            clipboard.add(text);
        }
        ClientEvent::DeleteEntry(entry_id) => {
            if let Err(ClipboardError::NotFound(missing)) = clipboard.delete(entry_id) {
                warn!("Session {} tried to delete missing entry {}", id, missing);
                return Some(OutboundFrame::RefreshClipboard);
            }
        }
        ClientEvent::ClearClipboard => clipboard.clear(),
        ClientEvent::Unknown(kind) => {
            warn!("Session {} sent an unhandled event: {}", id, kind);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::hub::SyncHub;
    use futures_util::{sink, stream};
    use std::pin::Pin;

    type Recorded = Pin<Box<dyn Sink<Message, Error = &'static str> + Send>>;

    /// 把会话写出的帧记录到通道里的写端
    fn recording_sink(tx: mpsc::UnboundedSender<Message>) -> Recorded {
        Box::pin(sink::unfold(tx, |tx, msg: Message| async move {
            tx.send(msg).map_err(|_| "recorder dropped")?;
            Ok::<_, &'static str>(tx)
        }))
    }

    fn spawn_hub() -> (HubHandle, CancellationToken) {
        let (hub, handle) = SyncHub::new(None);
        let shutdown = CancellationToken::new();
        tokio::spawn(hub.run(shutdown.clone()));
        (handle, shutdown)
    }

    #[test]
    fn test_handle_text_mutates_clipboard() {
        let clipboard = Clipboard::new();
        let id = Uuid::new_v4();

        assert_eq!(handle_text(id, &clipboard, r#"{"type":"newEntry","content":"alpha"}"#), None);
        handle_text(id, &clipboard, r#"{"type":"newEntry","content":"beta"}"#);
        assert_eq!(clipboard.len(), 2);

        let first = clipboard.snapshot()[0].id;
        let reply = handle_text(id, &clipboard, &format!(r#"{{"type":"delEntry","content":{first}}}"#));
        assert_eq!(reply, None);
        let texts: Vec<String> = clipboard.snapshot().into_iter().map(|e| e.text).collect();
        assert_eq!(texts, vec!["beta".to_string()]);

        handle_text(id, &clipboard, r#"{"type":"clearClipboard"}"#);
        assert!(clipboard.is_empty());
    }

    #[test]
    fn test_bad_frames_are_ignored() {
        let clipboard = Clipboard::new();
        let id = Uuid::new_v4();
        clipboard.add("keep me");

        assert_eq!(handle_text(id, &clipboard, "garbage"), None);
        assert_eq!(handle_text(id, &clipboard, r#"{"type":"unknownKind"}"#), None);
        handle_text(id, &clipboard, r#"{"type":"delEntry","content":999}"#);
        handle_text(id, &clipboard, r#"{"type":"newEntry","content":{"nested":true}}"#);

        assert_eq!(clipboard.len(), 1);
    }

    #[test]
    fn test_missing_entry_delete_still_refreshes() {
        let clipboard = Clipboard::new();
        let mut events = clipboard.subscribe();

        let reply = handle_text(Uuid::new_v4(), &clipboard, r#"{"type":"delEntry","content":42}"#);
        assert_eq!(reply, Some(OutboundFrame::RefreshClipboard));
        // 剪贴板本身没有变化，也没有事件
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_default_ping_period_is_within_pong_wait() {
        let timings = SessionTimings::default();
        assert!(timings.ping_period < timings.pong_wait);
    }

    #[tokio::test]
    async fn test_missing_entry_delete_is_broadcast() {
        let (hub, _shutdown) = spawn_hub();
        let (observer_tx, mut observer) = mpsc::channel(8);
        hub.register(Uuid::new_v4(), observer_tx).await.unwrap();

        let (sent_tx, _sent) = mpsc::unbounded_channel();
        let frames = stream::iter(vec![Ok::<_, &'static str>(Message::Text(
            r#"{"type":"delEntry","content":7}"#.to_string(),
        ))]);
        Session::new(hub.clone(), Arc::new(Clipboard::new()))
            .serve(recording_sink(sent_tx), frames)
            .await;

        let frame = timeout(Duration::from_secs(1), observer.recv()).await.unwrap();
        assert_eq!(frame, Some(OutboundFrame::RefreshClipboard));
    }

    #[tokio::test]
    async fn test_closed_stream_unregisters_session() {
        let (hub, _shutdown) = spawn_hub();
        let (sent_tx, mut sent) = mpsc::unbounded_channel();

        let frames = stream::iter(vec![Ok::<_, &'static str>(Message::Close(None))]);
        Session::new(hub.clone(), Arc::new(Clipboard::new()))
            .serve(recording_sink(sent_tx), frames)
            .await;

        assert_eq!(hub.session_count().await.unwrap(), 0);
        assert!(matches!(sent.recv().await, Some(Message::Close(None))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_client_is_torn_down() {
        let (hub, _shutdown) = spawn_hub();
        let timings = SessionTimings {
            ping_period: Duration::from_secs(2),
            pong_wait: Duration::from_secs(5),
            write_wait: Duration::from_secs(1),
        };
        let (sent_tx, mut sent) = mpsc::unbounded_channel();

        let started = Instant::now();
        let session = tokio::spawn(
            Session::new(hub.clone(), Arc::new(Clipboard::new()))
                .with_timings(timings)
                .serve(
                    recording_sink(sent_tx),
                    stream::pending::<Result<Message, &'static str>>(),
                ),
        );

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(hub.session_count().await.unwrap(), 1);
        assert!(!session.is_finished());

        session.await.unwrap();
        assert!(started.elapsed() >= timings.pong_wait);
        assert_eq!(hub.session_count().await.unwrap(), 0);

        // 超时前按周期发出 ping，最后发送关闭帧
        let mut pings = 0;
        let mut last = None;
        while let Ok(msg) = sent.try_recv() {
            if matches!(msg, Message::Ping(_)) {
                pings += 1;
            }
            last = Some(msg);
        }
        assert_eq!(pings, 2);
        assert!(matches!(last, Some(Message::Close(None))));
    }
}
