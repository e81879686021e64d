//! HTML 页面
//!
//! 目录列表页和错误页。所有插入页面的文本都经过 [`escape`]。

use crate::clipboard::Entry;
use crate::share::listing::encode_segments;
use crate::share::{BULK_PREFIX, DirectoryView, REALTIME_PREFIX, STATIC_PREFIX, UPLOAD_MARKER};
use axum::http::StatusCode;
use std::fmt::Write;

/// HTML 转义
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn head(out: &mut String, title: &str) {
    let _ = write!(
        out,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n\
         <meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{}</title>\n\
         <link rel=\"stylesheet\" href=\"/{STATIC_PREFIX}/css/style.css\">\n\
         </head>\n",
        escape(title)
    );
}

fn footer(out: &mut String, version: &str) {
    let _ = writeln!(out, "<footer>dirshare {}</footer>", escape(version));
}

/// 上传表单的提交地址，即 `<目录>/upload`
pub fn upload_action(rel_path: &str) -> String {
    let dir = rel_path.trim_end_matches('/');
    let segments: Vec<&str> = dir.split('/').filter(|s| !s.is_empty()).collect();
    let base = encode_segments(&segments);
    format!("{}/{UPLOAD_MARKER}", base.trim_end_matches('/'))
}

/// 路径面包屑，每一级都可点击
pub fn breadcrumb(rel_path: &str) -> String {
    let segments: Vec<&str> = rel_path.split('/').filter(|s| !s.is_empty()).collect();
    let mut out = String::from("<a href=\"/\">/</a>");
    for (i, segment) in segments.iter().enumerate() {
        let href = encode_segments(&segments[..=i]);
        if i > 0 {
            out.push('/');
        }
        let _ = write!(out, "<a href=\"{}\">{}</a>", escape(&href), escape(segment));
    }
    out
}

/// 目录列表页
pub fn directory_page(view: &DirectoryView, clipboard: &[Entry], version: &str) -> String {
    let mut out = String::with_capacity(4096 + view.items.len() * 512);
    head(&mut out, &view.rel_path);

    let _ = write!(
        out,
        "<body data-realtime=\"/{REALTIME_PREFIX}\" data-bulk=\"/{BULK_PREFIX}/\">\n\
         <header><h1>Index of {}</h1></header>\n<main>\n",
        breadcrumb(&view.rel_path)
    );

    // 文件表格
    out.push_str(
        "<table id=\"listing\">\n<thead><tr>\
         <th><input type=\"checkbox\" id=\"select-all\"></th>\
         <th data-sort=\"name\">Name</th>\
         <th data-sort=\"size\">Size</th>\
         <th data-sort=\"modified\">Modified</th>\
         <th></th></tr></thead>\n<tbody>\n",
    );

    if let Some(back) = &view.back {
        let _ = writeln!(
            out,
            "<tr class=\"back\"><td></td><td><a href=\"{}\">..</a></td><td></td><td></td><td></td></tr>",
            escape(back)
        );
    }

    for item in &view.items {
        let uri = escape(&item.uri);
        let mut name = escape(&item.name);
        if item.is_symlink {
            let _ = write!(name, " <span class=\"symlink\">&rarr; {}</span>", escape(&item.symlink_target));
        }
        let download = if item.is_dir {
            String::new()
        } else {
            format!("<a class=\"download\" href=\"{uri}?download\">download</a>")
        };
        let _ = writeln!(
            out,
            "<tr data-name=\"{}\" data-size=\"{}\" data-modified=\"{}\" class=\"{}\">\
             <td><input type=\"checkbox\" class=\"select\" value=\"{uri}\"></td>\
             <td><a href=\"{uri}\">{name}</a></td>\
             <td>{}</td><td>{}</td><td>{download}</td></tr>",
            escape(&item.name.to_lowercase()),
            item.sort_size,
            item.sort_modified,
            if item.is_dir { "dir" } else { "file" },
            escape(&item.display_size),
            escape(&item.display_modified),
        );
    }

    out.push_str("</tbody>\n</table>\n");
    out.push_str(
        "<p><a id=\"bulk-download\" class=\"button disabled\" href=\"#\">Download selected as zip</a></p>\n",
    );

    // 上传
    let _ = write!(
        out,
        "<form id=\"upload\" method=\"post\" enctype=\"multipart/form-data\" action=\"{}\">\n\
         <input type=\"file\" name=\"files\" multiple>\n\
         <button type=\"submit\">Upload</button>\n</form>\n",
        escape(&upload_action(&view.rel_path))
    );

    // 剪贴板
    out.push_str(
        "<section id=\"clipboard\">\n<h2>Clipboard</h2>\n\
         <textarea id=\"clipboard-input\" rows=\"3\"></textarea>\n\
         <p><button id=\"clipboard-add\">Add</button> \
         <button id=\"clipboard-clear\">Clear</button> ",
    );
    let _ = write!(
        out,
        "<a href=\"/{REALTIME_PREFIX}/download\">Export</a></p>\n<ul id=\"clipboard-entries\">\n"
    );
    for entry in clipboard {
        let _ = writeln!(
            out,
            "<li data-id=\"{}\"><pre>{}</pre><span class=\"time\">{}</span> \
             <button class=\"clipboard-delete\" data-id=\"{}\">Delete</button></li>",
            entry.id,
            escape(&entry.text),
            escape(&entry.time),
            entry.id
        );
    }
    out.push_str("</ul>\n</section>\n</main>\n");

    footer(&mut out, version);
    let _ = write!(
        out,
        "<script src=\"/{STATIC_PREFIX}/js/main.js\"></script>\n</body>\n</html>\n"
    );
    out
}

/// 错误页
pub fn error_page(status: StatusCode, message: &str, abs_path: &str, version: &str) -> String {
    let mut out = String::with_capacity(1024);
    let title = format!("{} {}", status.as_u16(), status.canonical_reason().unwrap_or(""));
    head(&mut out, &title);
    let _ = write!(
        out,
        "<body>\n<main class=\"error\">\n<h1>{}</h1>\n<p>{}</p>\n<p class=\"path\">{}</p>\n\
         <p><a href=\"/\">Back to the root directory</a></p>\n</main>\n",
        escape(&title),
        escape(message),
        escape(abs_path)
    );
    footer(&mut out, version);
    out.push_str("</body>\n</html>\n");
    out
}
