//! Dirshare Server
//!
//! 命令行入口：读取配置文件，用命令行参数覆盖，然后启动服务，
//! 收到 Ctrl-C 或 SIGTERM 后优雅退出。

use anyhow::Result;
use clap::Parser;
use dirshare_core::{FileServer, SHUTDOWN_GRACE, ServerConfig, VERSION};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dirshare", version, about = "局域网目录共享与剪贴板同步")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 监听 IP
    #[arg(short, long)]
    ip: Option<String>,

    /// 监听端口
    #[arg(short, long)]
    port: Option<u16>,

    /// 共享目录
    #[arg(short, long)]
    webroot: Option<PathBuf>,

    /// 基本认证密码（用户名固定为 dirshare）
    #[arg(short = 'P', long, env = "DIRSHARE_PASSWORD")]
    password: Option<String>,

    /// PEM 证书
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PKCS#8 PEM 私钥
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// 上传请求体上限（MB），0 表示不限制
    #[arg(long)]
    upload_limit_mb: Option<u64>,

    /// 把合并后的配置写回配置文件
    #[arg(long)]
    save_config: bool,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load_from(path),
            None => ServerConfig::load(),
        };

        if let Some(ip) = self.ip {
            config.ip = ip;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(webroot) = self.webroot {
            config.webroot = webroot;
        }
        if let Some(password) = self.password {
            config.password = Some(password);
        }
        if let Some(cert) = self.tls_cert {
            config.tls_cert = Some(cert);
        }
        if let Some(key) = self.tls_key {
            config.tls_key = Some(key);
        }
        if let Some(limit) = self.upload_limit_mb {
            config.upload_limit_mb = limit;
        }
        config
    }
}

/// 合并配置；带 `--save-config` 时先写回配置文件
fn effective_config(args: Args) -> Result<ServerConfig> {
    let save_path = args
        .save_config
        .then(|| args.config.clone().unwrap_or_else(ServerConfig::config_path));

    let config = args.into_config();
    if let Some(path) = save_path {
        config.save_to(&path)?;
        tracing::info!("Saved config to {:?}", path);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // 桥接 log crate（dirshare-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,dirshare_core=info")),
        )
        .try_init();

    let config = effective_config(Args::parse())?.validate()?;
    tracing::info!("Dirshare {} starting...", VERSION);

    let server = FileServer::bind(&config).await?;
    let shutdown = CancellationToken::new();
    let mut server_task = tokio::spawn(server.run(shutdown.clone()));

    tokio::select! {
        res = &mut server_task => {
            return match res {
                Ok(result) => result,
                Err(e) => Err(e.into()),
            };
        }
        () = shutdown_signal() => {
            tracing::info!("Shutdown requested, waiting up to {:?}", SHUTDOWN_GRACE);
            shutdown.cancel();
        }
    }

    match tokio::time::timeout(SHUTDOWN_GRACE, server_task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(e.into()),
        Err(_) => {
            tracing::warn!("Grace period elapsed, exiting with open connections");
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
