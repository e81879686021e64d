//! 请求路径解析
//!
//! 把 URL 路径映射到 webroot 下的文件系统路径。先做百分号解码，
//! 再按段词法清理 `.` / `..`，保证结果一定是 webroot 本身或其子孙。

use crate::error::{ShareError, ShareResult};
use percent_encoding::percent_decode_str;
use std::path::{Path, PathBuf};

/// webroot 范围内的路径解析器
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// `root` 应为启动时确定的绝对路径
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 解析请求路径
    ///
    /// `..` 段会被抵消（`/a/../b` 等价于 `/b`），一旦向上越过 webroot
    /// 即返回 [`ShareError::PathTraversal`]。
    pub fn resolve(&self, request_path: &str) -> ShareResult<PathBuf> {
        let segments = clean_segments(request_path, false)?;
        Ok(self.join(&segments))
    }

    /// 严格解析：出现任何 `..` 段都拒绝
    pub fn resolve_strict(&self, request_path: &str) -> ShareResult<PathBuf> {
        let segments = clean_segments(request_path, true)?;
        Ok(self.join(&segments))
    }

    /// 清理后的相对路径，形如 `/a/b`，根目录为 `/`
    pub fn clean(&self, request_path: &str) -> ShareResult<String> {
        let segments = clean_segments(request_path, false)?;
        Ok(format!("/{}", segments.join("/")))
    }

    /// 文件在 webroot 下的相对名称，使用 `/` 分隔
    pub fn relative_name(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }

    fn join(&self, segments: &[String]) -> PathBuf {
        let mut path = self.root.clone();
        for segment in segments {
            path.push(segment);
        }
        path
    }
}

fn clean_segments(request_path: &str, strict: bool) -> ShareResult<Vec<String>> {
    let decoded = percent_decode_str(request_path)
        .decode_utf8()
        .map_err(|_| ShareError::NotFound)?;

    if decoded.contains('\0') {
        return Err(ShareError::NotFound);
    }

    let mut segments: Vec<String> = Vec::new();
    for segment in decoded.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                if strict || segments.pop().is_none() {
                    return Err(ShareError::PathTraversal);
                }
            }
            other => segments.push(other.to_string()),
        }
    }
    Ok(segments)
}
