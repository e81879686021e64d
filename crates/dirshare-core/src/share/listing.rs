//! 目录列表
//!
//! 枚举目录的直接子项，生成排序稳定的视图模型。默认按显示名称
//! 不区分大小写升序排列，同时保留原始大小和修改时间，方便浏览器端按列重排。

use crate::error::ShareResult;
use crate::share::is_reserved;
use chrono::{DateTime, Local};
use log::{debug, warn};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use std::fs::Metadata;
use std::path::Path;
use std::time::SystemTime;

/// URL 路径段中需要转义的字符
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// 目录中的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub uri: String,
    /// 显示名称，目录以 `/` 结尾
    pub name: String,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub symlink_target: String,
    /// 小写扩展名（不含点），目录为空
    pub ext: String,
    pub display_size: String,
    pub sort_size: u64,
    pub display_modified: String,
    /// Unix 时间戳（秒）
    pub sort_modified: i64,
}

/// 目录视图
#[derive(Debug, Clone)]
pub struct DirectoryView {
    /// 清理后的请求路径，如 `/a/b`
    pub rel_path: String,
    pub abs_path: String,
    /// 上一级链接，根目录为 None
    pub back: Option<String>,
    pub items: Vec<Item>,
}

/// 列出 `dir` 的直接子项
///
/// `rel_path` 是 `dir` 对应的清理后请求路径，用于生成链接。
pub async fn list_directory(dir: &Path, rel_path: &str) -> ShareResult<DirectoryView> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut items = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_reserved(&name) {
            debug!("Hiding reserved entry {:?}", name);
            continue;
        }

        // DirEntry::metadata 不跟随符号链接
        let metadata = match entry.metadata().await {
            Ok(m) => m,
            Err(e) => {
                warn!("Failed to stat {:?}: {}", entry.path(), e);
                continue;
            }
        };

        let symlink_target = if metadata.file_type().is_symlink() {
            match tokio::fs::read_link(entry.path()).await {
                Ok(target) => Some(target.to_string_lossy().into_owned()),
                Err(e) => {
                    warn!("Error resolving symlink {:?}: {}", entry.path(), e);
                    Some(String::new())
                }
            }
        } else {
            None
        };

        items.push(build_item(&name, &metadata, rel_path, symlink_target));
    }

    sort_items(&mut items);

    Ok(DirectoryView {
        rel_path: rel_path.to_string(),
        abs_path: dir.display().to_string(),
        back: back_link(rel_path),
        items,
    })
}

fn build_item(name: &str, metadata: &Metadata, rel_path: &str, symlink: Option<String>) -> Item {
    let is_dir = metadata.is_dir();
    let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    let modified: DateTime<Local> = modified.into();

    Item {
        uri: child_uri(rel_path, name),
        name: if is_dir {
            format!("{name}/")
        } else {
            name.to_string()
        },
        is_dir,
        is_symlink: symlink.is_some(),
        symlink_target: symlink.unwrap_or_default(),
        ext: if is_dir { String::new() } else { extension(name) },
        display_size: byte_count_decimal(metadata.len()),
        sort_size: metadata.len(),
        display_modified: modified.format("%a %b %e %H:%M:%S %Y").to_string(),
        sort_modified: modified.timestamp(),
    }
}

/// 不区分大小写按显示名称升序
pub fn sort_items(items: &mut [Item]) {
    items.sort_by_cached_key(|item| item.name.to_lowercase());
}

/// 上一级链接：根目录没有；一级子目录回到 `/`；更深的去掉最后一段
pub fn back_link(rel_path: &str) -> Option<String> {
    let segments: Vec<&str> = rel_path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.len() {
        0 => None,
        1 => Some("/".to_string()),
        n => Some(encode_segments(&segments[..n - 1])),
    }
}

/// 子项链接，每段单独转义
pub fn child_uri(rel_path: &str, name: &str) -> String {
    let mut segments: Vec<&str> = rel_path.split('/').filter(|s| !s.is_empty()).collect();
    segments.push(name);
    encode_segments(&segments)
}

/// 把路径段转义后拼成 `/a/b`
pub fn encode_segments(segments: &[&str]) -> String {
    let mut uri = String::new();
    for segment in segments {
        uri.push('/');
        uri.extend(utf8_percent_encode(segment, SEGMENT));
    }
    if uri.is_empty() {
        uri.push('/');
    }
    uri
}

fn extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// 十进制单位的可读大小，例如 `1.5 kB`
pub fn byte_count_decimal(bytes: u64) -> String {
    const UNIT: u64 = 1000;
    const PREFIXES: [char; 6] = ['k', 'M', 'G', 'T', 'P', 'E'];

    if bytes < UNIT {
        return format!("{bytes} B");
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }

    #[allow(clippy::cast_precision_loss)]
    let value = bytes as f64 / div as f64;
    format!("{value:.1} {}B", PREFIXES[exp])
}
