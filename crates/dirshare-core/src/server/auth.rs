//! HTTP 基本认证
//!
//! 设置了密码时，所有路由（包括 WebSocket 升级）都要求固定用户名加该密码。

use crate::server::AppState;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::warn;
use sha2::{Digest, Sha256};

/// 固定的认证用户名
pub const AUTH_USERNAME: &str = "dirshare";

pub async fn basic_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(password) = state.password.as_deref() else {
        return next.run(req).await;
    };

    if authorized(req.headers(), AUTH_USERNAME, password) {
        return next.run(req).await;
    }

    if req.headers().contains_key(header::AUTHORIZATION) {
        warn!("Rejected credentials for {}", req.uri().path());
    }
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"Restricted\"")],
        "Not authorized",
    )
        .into_response()
}

/// 校验 `Authorization: Basic ...` 头
pub fn authorized(headers: &HeaderMap, username: &str, password: &str) -> bool {
    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };

    let Some((scheme, encoded)) = value.trim().split_once(' ') else {
        return false;
    };
    if !scheme.eq_ignore_ascii_case("basic") {
        return false;
    }

    let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
        return false;
    };
    let Ok(credentials) = String::from_utf8(decoded) else {
        return false;
    };

    // 按固定长度的摘要比较
    let expected = Sha256::digest(format!("{username}:{password}"));
    let supplied = Sha256::digest(credentials.as_bytes());
    expected == supplied
}
