//! 路由与处理器
//!
//! 固定前缀的内部路由优先匹配，其余所有路径由 [`serve_or_upload`] 兜底：
//! GET 返回文件或目录列表，POST 视为上传。

use crate::error::ShareError;
use crate::server::{AppState, VERSION, assets, auth, render};
use crate::share::{BULK_PREFIX, REALTIME_PREFIX, STATIC_PREFIX, list_directory};
use crate::sync::{MAX_FRAME_SIZE, Session};
use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, FromRequest, Multipart, Path, Query, Request, State};
use axum::http::{HeaderValue, Method, StatusCode, Uri, header};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Router, extract::DefaultBodyLimit};
use log::{debug, info, warn};
use percent_encoding::percent_decode_str;
use std::net::SocketAddr;
use std::path::Path as FsPath;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::io::ReaderStream;

/// 构建完整的应用路由
///
/// `upload_limit` 为 None 时不限制请求体大小。
pub fn router(state: AppState, upload_limit: Option<usize>) -> Router {
    let body_limit = match upload_limit {
        Some(limit) => DefaultBodyLimit::max(limit),
        None => DefaultBodyLimit::disable(),
    };

    Router::new()
        .route(&format!("/{STATIC_PREFIX}/*file"), get(static_asset))
        .route(&format!("/{REALTIME_PREFIX}/ws"), get(websocket))
        .route(&format!("/{REALTIME_PREFIX}/download"), get(clipboard_download))
        .route(&format!("/{BULK_PREFIX}"), get(bulk_download))
        .route(&format!("/{BULK_PREFIX}/"), get(bulk_download))
        .route("/favicon.ico", get(favicon))
        .fallback(serve_or_upload)
        .layer(body_limit)
        .layer(middleware::from_fn_with_state(state.clone(), auth::basic_auth))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// 访问日志
async fn log_request(req: Request, next: Next) -> Response {
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "-".to_string(), |ConnectInfo(addr)| addr.to_string());
    let method = req.method().clone();
    let uri = req.uri().clone();
    let version = req.version();

    let response = next.run(req).await;
    info!(
        "{} - \"{} {} {:?}\" {}",
        remote,
        method,
        uri,
        version,
        response.status().as_u16()
    );
    response
}

async fn favicon() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn static_asset(Path(file): Path<String>) -> Response {
    match assets::lookup(&file) {
        Some((content, mime)) => {
            ([(header::CONTENT_TYPE, mime.to_string())], content).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn websocket(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.max_message_size(MAX_FRAME_SIZE)
        .on_failed_upgrade(|e| warn!("WebSocket upgrade failed: {}", e))
        .on_upgrade(move |socket| {
            Session::new(state.hub, state.clipboard)
                .with_timings(state.session_timings)
                .run(socket)
        })
}

async fn clipboard_download(State(state): State<AppState>) -> Response {
    let data = match state.clipboard.export() {
        Ok(data) => data,
        Err(e) => {
            warn!("Failed to export clipboard: {}", e);
            return error_response(&state, "/", &ShareError::Io(std::io::Error::other(e)));
        }
    };

    let filename = format!("{}-clipboard.json", unix_now());
    (
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (header::CONTENT_DISPOSITION, attachment(&filename)),
        ],
        data,
    )
        .into_response()
}

async fn bulk_download(
    State(state): State<AppState>,
    Query(query): Query<Vec<(String, String)>>,
) -> Response {
    let selections: Vec<String> = query
        .into_iter()
        .filter(|(key, _)| key == "file")
        .map(|(_, value)| value)
        .collect();

    let roots = match state.zip.select(&selections) {
        Ok(roots) => roots,
        Err(e) => return error_response(&state, &format!("/{BULK_PREFIX}/"), &e),
    };

    info!("Zip download of {} selection(s)", roots.len());
    let filename = format!("{}_dirshare_download.zip", unix_now());
    (
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, attachment(&filename)),
        ],
        Body::from_stream(state.zip.stream(roots)),
    )
        .into_response()
}

/// 兜底处理器：按方法分派到文件服务或上传
async fn serve_or_upload(State(state): State<AppState>, req: Request) -> Response {
    match *req.method() {
        Method::GET | Method::HEAD => serve_path(&state, req.uri()).await,
        Method::POST => {
            let path = req.uri().path().to_string();
            match Multipart::from_request(req, &state).await {
                Ok(multipart) => upload(&state, &path, multipart).await,
                Err(rejection) => {
                    warn!("Rejected upload to {}: {}", path, rejection);
                    rejection.into_response()
                }
            }
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

async fn serve_path(state: &AppState, uri: &Uri) -> Response {
    match try_serve_path(state, uri).await {
        Ok(response) => response,
        Err(e) => error_response(state, uri.path(), &e),
    }
}

async fn try_serve_path(state: &AppState, uri: &Uri) -> Result<Response, ShareError> {
    let request_path = uri.path();
    let path = state.resolver.resolve(request_path)?;
    let metadata = tokio::fs::metadata(&path).await?;

    if metadata.is_dir() {
        let rel = state.resolver.clean(request_path)?;
        let view = list_directory(&path, &rel).await?;
        let html = render::directory_page(&view, &state.clipboard.snapshot(), VERSION);
        return Ok(Html(html).into_response());
    }

    send_file(&path, metadata.len(), wants_download(uri.query())).await
}

async fn send_file(path: &FsPath, len: u64, download: bool) -> Result<Response, ShareError> {
    let file = tokio::fs::File::open(path).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let content_type = if download {
        "application/octet-stream".to_string()
    } else {
        mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string()
    };

    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    if download {
        if let Ok(value) = HeaderValue::from_bytes(attachment(&name).as_bytes()) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
        info!("Download of {:?}", path);
    } else {
        debug!("Serving {:?}", path);
    }
    Ok(response)
}

async fn upload(state: &AppState, request_path: &str, multipart: Multipart) -> Response {
    match state.uploads.ingest(request_path, multipart).await {
        Ok(outcome) => {
            info!("Upload to {} stored {} file(s)", request_path, outcome.written.len());
            if !outcome.failed.is_empty() {
                warn!("Upload to {} had {} failure(s)", request_path, outcome.failed.len());
            }
            Redirect::to(&outcome.redirect).into_response()
        }
        Err(e) => error_response(state, request_path, &e),
    }
}

/// 错误页响应，内部细节只写日志
fn error_response(state: &AppState, request_path: &str, err: &ShareError) -> Response {
    let status = err.status();
    match err {
        ShareError::NotFound | ShareError::BadRequest(_) => {
            debug!("{} {}: {}", status.as_u16(), request_path, err);
        }
        _ => warn!("{} {}: {}", status.as_u16(), request_path, err),
    }

    let decoded = percent_decode_str(request_path).decode_utf8_lossy();
    let abs_path = format!(
        "{}{}",
        state.resolver.root().display(),
        decoded.trim_end_matches('/')
    );
    let html = render::error_page(status, &err.public_message(), &abs_path, VERSION);
    (status, Html(html)).into_response()
}

/// 查询串中是否带有 `download` 标志（有无值均可）
fn wants_download(query: Option<&str>) -> bool {
    query.is_some_and(|q| {
        q.split('&')
            .any(|pair| pair.split('=').next() == Some("download"))
    })
}

fn attachment(filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|c| if c == '"' || c.is_control() { '_' } else { c })
        .collect();
    format!("attachment; filename=\"{safe}\"")
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
