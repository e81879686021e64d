//! 文件共享
//!
//! - **path**: 请求路径到 webroot 内路径的安全映射
//! - **listing**: 目录列表视图模型
//! - **archive**: 多文件 ZIP 流式打包
//! - **upload**: multipart 上传落盘

pub mod archive;
pub mod listing;
pub mod path;
pub mod upload;

pub use archive::{ArchiveSummary, ZipStreamer};
pub use listing::{DirectoryView, Item, list_directory};
pub use path::PathResolver;
pub use upload::{UploadIngestor, UploadOutcome};

/// 内置静态资源路由前缀
pub const STATIC_PREFIX: &str = "8c1e0f6b5a3d47e2b9f04d1a6c7e3b52";

/// 实时通道（WebSocket 与剪贴板导出）路由前缀
pub const REALTIME_PREFIX: &str = "d3a94f2e7b6c41058e1f9a0b2c4d6e87";

/// 批量下载路由前缀
pub const BULK_PREFIX: &str = "4b7e2c9d1f0a46e38a5b6c7d8e9f0a1b";

/// 上传表单提交的路由标记（目录路径之后的最后一段）
pub const UPLOAD_MARKER: &str = "upload";

/// 是否为内部路由占用的名称，目录列表中不显示这些条目
pub fn is_reserved(name: &str) -> bool {
    let name = name.trim_end_matches('/');
    name == STATIC_PREFIX || name == REALTIME_PREFIX || name == BULK_PREFIX
}
