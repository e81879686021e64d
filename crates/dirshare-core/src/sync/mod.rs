//! 剪贴板实时同步
//!
//! - **protocol**: WebSocket 文本帧的 JSON 格式
//! - **hub**: 会话注册表与广播
//! - **session**: 单个 WebSocket 连接的读写任务

pub mod hub;
pub mod protocol;
pub mod session;

pub use hub::{HubError, HubHandle, SessionId, SyncHub};
pub use protocol::{ClientEvent, Frame, OutboundFrame, ProtocolError};
pub use session::{MAX_FRAME_SIZE, Session, SessionState, SessionTimings};
