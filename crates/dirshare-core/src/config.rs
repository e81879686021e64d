//! 服务配置
//!
//! 监听地址、webroot、认证和 TLS 设置。可从 TOML 文件加载，
//! 命令行参数在此基础上覆盖。

use anyhow::{Context, bail};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 服务配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听 IP
    pub ip: String,
    /// 监听端口，0 表示随机端口
    pub port: u16,
    /// 对外共享的根目录
    pub webroot: PathBuf,
    /// 基本认证密码，未设置时不启用认证
    pub password: Option<String>,
    /// PEM 证书路径
    pub tls_cert: Option<PathBuf>,
    /// PKCS#8 PEM 私钥路径
    pub tls_key: Option<PathBuf>,
    /// 单次上传请求体上限（MB），0 表示不限制
    pub upload_limit_mb: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ip: "0.0.0.0".to_string(),
            port: 8000,
            webroot: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            password: None,
            tls_cert: None,
            tls_key: None,
            upload_limit_mb: 0,
        }
    }
}

impl ServerConfig {
    /// 默认配置文件路径
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dirshare")
            .join("server.toml")
    }

    /// 从默认路径加载（文件不存在则使用默认值）
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// 从指定路径加载，读取或解析失败时回退到默认值
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    debug!("Loaded config from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config {:?}: {}, using defaults", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read config {:?}: {}, using defaults", path, e);
                Self::default()
            }
        }
    }

    /// 保存到指定路径
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!("Saved config to {:?}", path);
        Ok(())
    }

    /// 校验并规范化：webroot 转为绝对路径，证书与私钥必须同时提供
    pub fn validate(mut self) -> anyhow::Result<Self> {
        self.webroot = fs::canonicalize(&self.webroot)
            .with_context(|| format!("webroot {:?} is not accessible", self.webroot))?;
        if !self.webroot.is_dir() {
            bail!("webroot {:?} is not a directory", self.webroot);
        }

        match (&self.tls_cert, &self.tls_key) {
            (Some(_), None) | (None, Some(_)) => {
                bail!("TLS needs both a certificate and a private key")
            }
            _ => {}
        }

        if self.password.as_deref() == Some("") {
            self.password = None;
        }
        Ok(self)
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// 上传请求体上限（字节）
    pub fn upload_limit(&self) -> Option<usize> {
        match self.upload_limit_mb {
            0 => None,
            mb => usize::try_from(mb.saturating_mul(1024 * 1024)).ok(),
        }
    }
}
