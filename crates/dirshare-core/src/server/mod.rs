//! HTTP 服务
//!
//! 把文件共享和剪贴板同步组装成一个 axum 应用，并负责监听、可选的
//! TLS 以及优雅退出。

pub mod assets;
pub mod auth;
pub mod render;
pub mod routes;
pub mod tls;

use crate::clipboard::Clipboard;
use crate::config::ServerConfig;
use crate::share::{PathResolver, UploadIngestor, ZipStreamer};
use crate::sync::{HubHandle, SessionTimings, SyncHub};
use log::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_native_tls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

pub use auth::AUTH_USERNAME;

/// 收到退出信号后等待在途请求的最长时间
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

/// 版本号，显示在页面底部
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 所有处理器共享的状态
#[derive(Clone)]
pub struct AppState {
    pub resolver: PathResolver,
    pub clipboard: Arc<Clipboard>,
    pub hub: HubHandle,
    pub zip: ZipStreamer,
    pub uploads: UploadIngestor,
    pub password: Option<Arc<str>>,
    pub session_timings: SessionTimings,
}

/// 已绑定端口、尚未开始服务的文件服务器
pub struct FileServer {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    upload_limit: Option<usize>,
    state: AppState,
    hub: SyncHub,
}

impl FileServer {
    /// 绑定监听地址
    ///
    /// `config` 应当已经过 [`ServerConfig::validate`]。
    pub async fn bind(config: &ServerConfig) -> anyhow::Result<Self> {
        let tls = match (&config.tls_cert, &config.tls_key) {
            (Some(cert), Some(key)) => {
                let (acceptor, fingerprint) = tls::load_acceptor(cert, key)?;
                info!("TLS enabled, certificate SHA-256 fingerprint: {}", fingerprint);
                Some(acceptor)
            }
            _ => None,
        };

        if config.password.is_some() && !config.tls_enabled() {
            warn!("Basic auth is enabled without TLS, credentials are sent in clear text");
        }

        let listener = TcpListener::bind(config.bind_addr()).await?;

        let resolver = PathResolver::new(config.webroot.clone());
        let clipboard = Arc::new(Clipboard::new());
        let (hub, handle) = SyncHub::new(Some(clipboard.subscribe()));

        let state = AppState {
            zip: ZipStreamer::new(resolver.clone()),
            uploads: UploadIngestor::new(resolver.clone()),
            resolver,
            clipboard,
            hub: handle,
            password: config.password.as_deref().map(Arc::from),
            session_timings: SessionTimings::default(),
        };

        Ok(Self {
            listener,
            tls,
            upload_limit: config.upload_limit(),
            state,
            hub,
        })
    }

    /// 替换实时会话的心跳与写入超时
    #[must_use]
    pub fn with_session_timings(mut self, timings: SessionTimings) -> Self {
        self.state.session_timings = timings;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// 开始服务，直到 `shutdown` 被取消
    ///
    /// 取消后不再接受新连接，同步中心关闭所有实时会话，
    /// 等在途请求结束后返回。调用方用 [`SHUTDOWN_GRACE`] 限制等待时间。
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let addr = self.listener.local_addr()?;
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        info!(
            "Serving {:?} on {}://{}",
            self.state.resolver.root(),
            scheme,
            addr
        );

        let hub_task = tokio::spawn(self.hub.run(shutdown.clone()));
        let app = routes::router(self.state, self.upload_limit);

        match self.tls {
            Some(acceptor) => tls::serve(self.listener, acceptor, app, shutdown.clone()).await?,
            None => {
                axum::serve(
                    self.listener,
                    app.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .with_graceful_shutdown(shutdown.clone().cancelled_owned())
                .await?;
            }
        }

        if let Err(e) = hub_task.await {
            warn!("Sync hub task failed: {}", e);
        }
        info!("Server stopped");
        Ok(())
    }
}
