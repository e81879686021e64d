//! 错误类型
//!
//! 文件服务请求链路上的错误分类，以及与 HTTP 状态码的对应关系。

use axum::http::StatusCode;
use std::io;

/// 文件服务错误
#[derive(Debug, thiserror::Error)]
pub enum ShareError {
    #[error("Not found")]
    NotFound,

    #[error("Permission denied")]
    PermissionDenied,

    /// 路径越过了 webroot，对外与 NotFound 不可区分
    #[error("Path traversal rejected")]
    PathTraversal,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("IO error: {0}")]
    Io(io::Error),
}

impl ShareError {
    /// 对应的 HTTP 状态码
    pub fn status(&self) -> StatusCode {
        match self {
            ShareError::NotFound | ShareError::PathTraversal => StatusCode::NOT_FOUND,
            ShareError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ShareError::PermissionDenied | ShareError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 返回给客户端的消息（不包含文件系统细节）
    pub fn public_message(&self) -> String {
        match self {
            ShareError::NotFound | ShareError::PathTraversal => "Not found".to_string(),
            ShareError::BadRequest(msg) => msg.clone(),
            ShareError::PermissionDenied | ShareError::Io(_) => {
                "Internal server error".to_string()
            }
        }
    }
}

impl From<io::Error> for ShareError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => ShareError::NotFound,
            io::ErrorKind::PermissionDenied => ShareError::PermissionDenied,
            _ => ShareError::Io(err),
        }
    }
}

pub type ShareResult<T> = Result<T, ShareError>;
