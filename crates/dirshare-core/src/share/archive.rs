//! 多文件 ZIP 流式打包
//!
//! 在阻塞线程池中遍历选中的路径，边遍历边把 ZIP 数据写入有界通道，
//! 响应体直接消费该通道，整个归档不会在内存或磁盘中完整生成。

use crate::error::{ShareError, ShareResult};
use crate::share::path::PathResolver;
use axum::body::Bytes;
use log::{debug, info, warn};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use walkdir::WalkDir;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// 单个数据块大小
const CHUNK_SIZE: usize = 64 * 1024;

/// 响应通道容量（块数）
const CHANNEL_CAPACITY: usize = 8;

/// 打包结果统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub files: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct ZipStreamer {
    resolver: PathResolver,
}

impl ZipStreamer {
    pub fn new(resolver: PathResolver) -> Self {
        Self { resolver }
    }

    /// 校验选择集
    ///
    /// 选择集为空时返回 [`ShareError::BadRequest`]；单个路径含有 `..`
    /// 时只记录日志并丢弃，其余路径照常打包。
    pub fn select(&self, selections: &[String]) -> ShareResult<Vec<PathBuf>> {
        if selections.is_empty() {
            return Err(ShareError::BadRequest(
                "You need to select a file before you can download a zip archive".to_string(),
            ));
        }

        let roots = selections
            .iter()
            .filter_map(|selection| match self.resolver.resolve_strict(selection) {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!("Dropping zip selection {:?}: {}", selection, e);
                    None
                }
            })
            .collect();
        Ok(roots)
    }

    /// 把 `roots` 下的所有普通文件写成 ZIP
    ///
    /// 单个文件失败只跳过该文件；输出端断开（`BrokenPipe`）时立即返回错误。
    pub fn write_archive<W: Write>(&self, roots: &[PathBuf], out: W) -> io::Result<ArchiveSummary> {
        let mut zip = ZipWriter::new_stream(out);
        let mut summary = ArchiveSummary::default();

        for root in roots {
            for entry in WalkDir::new(root) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("Error walking {:?}: {}", root, e);
                        summary.skipped += 1;
                        continue;
                    }
                };

                if !is_archivable(entry.path(), entry.file_type()) {
                    continue;
                }

                match self.add_file(&mut zip, entry.path()) {
                    Ok(true) => summary.files += 1,
                    Ok(false) => summary.skipped += 1,
                    Err(e) => return Err(e),
                }
            }
        }

        zip.finish().map_err(into_io)?.flush()?;
        Ok(summary)
    }

    /// 返回 Ok(false) 表示该文件被跳过
    fn add_file<W: Write + io::Seek>(&self, zip: &mut ZipWriter<W>, path: &Path) -> io::Result<bool> {
        let Some(name) = self.resolver.relative_name(path) else {
            warn!("Skipping {:?}: outside of webroot", path);
            return Ok(false);
        };

        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                warn!("Skipping {:?}: {}", path, e);
                return Ok(false);
            }
        };
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);

        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .large_file(size >= u64::from(u32::MAX));

        if let Err(e) = zip.start_file(name.as_str(), options) {
            let e = into_io(e);
            if e.kind() == io::ErrorKind::BrokenPipe {
                return Err(e);
            }
            warn!("Failed to add {} to archive: {}", name, e);
            return Ok(false);
        }

        copy_entry(zip, &name, &mut file)
    }

    /// 在阻塞线程池中打包，返回供响应体消费的数据流
    pub fn stream(&self, roots: Vec<PathBuf>) -> ReceiverStream<io::Result<Bytes>> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let streamer = self.clone();

        tokio::task::spawn_blocking(move || {
            let writer = ChannelWriter::new(tx.clone());
            match streamer.write_archive(&roots, writer) {
                Ok(summary) => info!(
                    "Zip download finished: {} file(s), {} skipped",
                    summary.files, summary.skipped
                ),
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    info!("Zip download aborted: client went away");
                }
                Err(e) => {
                    warn!("Error creating zip file: {}", e);
                    let _ = tx.blocking_send(Err(e));
                }
            }
        });

        ReceiverStream::new(rx)
    }
}

/// 把当前条目的内容从 `reader` 复制进归档
///
/// 流式写端无法回退，读到一半失败时已写出的部分留在归档里，条目按
/// 实际写入的字节结束，记为跳过。
fn copy_entry<W: Write + io::Seek>(
    zip: &mut ZipWriter<W>,
    name: &str,
    reader: &mut impl Read,
) -> io::Result<bool> {
    let mut copied = 0u64;
    let mut buf = [0u8; 8 * 1024];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if copied == 0 {
                    warn!("Failed to archive {}: {}", name, e);
                } else {
                    warn!("Entry {} is truncated after {} bytes: {}", name, copied, e);
                }
                return Ok(false);
            }
        };
        zip.write_all(&buf[..n])?;
        copied += n as u64;
    }
    debug!("Archived {} ({} bytes)", name, copied);
    Ok(true)
}

/// 普通文件，或指向普通文件的符号链接
fn is_archivable(path: &Path, file_type: std::fs::FileType) -> bool {
    if file_type.is_file() {
        return true;
    }
    file_type.is_symlink() && std::fs::metadata(path).is_ok_and(|m| m.is_file())
}

fn into_io(err: zip::result::ZipError) -> io::Error {
    match err {
        zip::result::ZipError::Io(e) => e,
        other => io::Error::other(other),
    }
}

/// 把写入按块转发到异步通道的 `Write` 适配器
struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
    buf: Vec<u8>,
}

impl ChannelWriter {
    fn new(tx: mpsc::Sender<io::Result<Bytes>>) -> Self {
        Self {
            tx,
            buf: Vec::with_capacity(CHUNK_SIZE),
        }
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = Bytes::from(std::mem::replace(
            &mut self.buf,
            Vec::with_capacity(CHUNK_SIZE),
        ));
        self.tx
            .blocking_send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response receiver dropped"))
    }
}

impl Drop for ChannelWriter {
    fn drop(&mut self) {
        let _ = self.send_buffered();
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= CHUNK_SIZE {
            self.send_buffered()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}
