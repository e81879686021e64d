//! multipart 上传
//!
//! 表单提交到 `<目录>/upload`，`files` 字段中的每个文件分片写入该目录。
//! 文件名只保留最后一段，这是上传路径穿越的主要防线。

use crate::error::{ShareError, ShareResult};
use crate::share::listing::encode_segments;
use crate::share::path::PathResolver;
use axum::body::Bytes;
use axum::extract::Multipart;
use futures_util::{Stream, StreamExt};
use log::{debug, info, warn};
use std::fmt::Display;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// 承载文件的表单字段名
pub const FILES_FIELD: &str = "files";

/// 一次上传的结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    /// 上传目标目录的链接，用于重定向回列表页
    pub redirect: String,
    pub written: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct UploadIngestor {
    resolver: PathResolver,
}

impl UploadIngestor {
    pub fn new(resolver: PathResolver) -> Self {
        Self { resolver }
    }

    /// 把 multipart 中的文件写入请求路径对应的目录
    ///
    /// 目标目录不存在时整体失败；单个文件失败只记录日志，其余照常写入。
    pub async fn ingest(&self, request_path: &str, mut multipart: Multipart) -> ShareResult<UploadOutcome> {
        let target = target_dir(request_path);
        let rel = self.resolver.clean(target)?;
        let dir = self.resolver.resolve(target)?;

        if !tokio::fs::metadata(&dir).await?.is_dir() {
            return Err(ShareError::NotFound);
        }

        let segments: Vec<&str> = rel.split('/').filter(|s| !s.is_empty()).collect();
        let mut outcome = UploadOutcome {
            redirect: encode_segments(&segments),
            ..Default::default()
        };

        loop {
            let field = match multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(e) => {
                    warn!("Error parsing multipart request: {}", e);
                    break;
                }
            };

            if field.name() != Some(FILES_FIELD) {
                debug!("Ignoring multipart field {:?}", field.name());
                continue;
            }

            let Some(supplied) = field.file_name().map(str::to_string) else {
                debug!("Ignoring file part without a filename");
                continue;
            };

            let Some(name) = base_name(&supplied) else {
                warn!("Rejecting upload with unusable filename {:?}", supplied);
                outcome.failed.push(supplied);
                continue;
            };

            let dest = dir.join(&name);
            match write_part(&dest, field).await {
                Ok(bytes) => {
                    info!("Uploaded {:?} ({} bytes)", dest, bytes);
                    outcome.written.push(name);
                }
                Err(e) => {
                    warn!("Not able to write {:?} to disk: {}", dest, e);
                    outcome.failed.push(name);
                }
            }
        }

        Ok(outcome)
    }
}

/// 请求路径去掉最后的上传标记后即为目标目录
pub fn target_dir(request_path: &str) -> &str {
    let trimmed = request_path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[..idx],
        None => "",
    }
}

/// 只保留文件名的最后一段
pub fn base_name(supplied: &str) -> Option<String> {
    let name = supplied.rsplit(['/', '\\']).next()?.trim();
    match name {
        "" | "." | ".." => None,
        name if name.contains('\0') => None,
        name => Some(name.to_string()),
    }
}

/// 把数据块流写入文件，失败时删除不完整的文件
pub async fn write_part<S, E>(dest: &Path, chunks: S) -> std::io::Result<u64>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let mut chunks = std::pin::pin!(chunks);
    let mut file = File::create(dest).await?;
    let mut written = 0u64;

    let result = async {
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| std::io::Error::other(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await
    }
    .await;

    if let Err(e) = result {
        drop(file);
        let _ = tokio::fs::remove_file(dest).await;
        return Err(e);
    }
    Ok(written)
}
