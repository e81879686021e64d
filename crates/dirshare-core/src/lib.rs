//! Dirshare Core Library
//!
//! 局域网目录共享服务的核心实现：浏览、下载、打包下载、上传，
//! 以及在所有浏览器之间实时同步的共享剪贴板。
//!
//! # 模块
//!
//! - **share**: 路径解析、目录列表、ZIP 流式打包、multipart 上传
//! - **clipboard**: 内存中的共享剪贴板
//! - **sync**: WebSocket 会话与广播中心
//! - **server**: axum 路由、基本认证、TLS 与优雅退出
//! - **config**: TOML 配置
//!
//! # 使用示例
//!
//! ```ignore
//! use dirshare_core::{FileServer, ServerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = ServerConfig::load().validate()?;
//! let server = FileServer::bind(&config).await?;
//! let shutdown = CancellationToken::new();
//! server.run(shutdown).await?;
//! ```

pub mod clipboard;
pub mod config;
pub mod error;
pub mod server;
pub mod share;
pub mod sync;

pub use clipboard::{Clipboard, ClipboardError, ClipboardEvent, Entry};
pub use config::ServerConfig;
pub use error::{ShareError, ShareResult};
pub use server::{AUTH_USERNAME, AppState, FileServer, SHUTDOWN_GRACE, VERSION};
pub use share::{DirectoryView, Item, PathResolver, UploadIngestor, ZipStreamer};
pub use sync::{HubHandle, Session, SessionTimings, SyncHub};
