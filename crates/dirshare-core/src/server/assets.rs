//! 内置静态资源

use mime_guess::Mime;

const STYLE_CSS: &str = include_str!("../../assets/style.css");
const MAIN_JS: &str = include_str!("../../assets/main.js");

/// 按静态路由前缀之后的路径查找资源
pub fn lookup(path: &str) -> Option<(&'static str, Mime)> {
    let content = match path.trim_start_matches('/') {
        "css/style.css" => STYLE_CSS,
        "js/main.js" => MAIN_JS,
        _ => return None,
    };
    Some((content, mime_guess::from_path(path).first_or_octet_stream()))
}
