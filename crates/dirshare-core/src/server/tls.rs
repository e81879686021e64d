//! HTTPS 支持
//!
//! 证书和私钥都是 PEM 格式，私钥必须是 PKCS#8。TLS 握手由 native-tls
//! 完成，握手后的连接交给 hyper 的自动协议构建器驱动同一个 Router。

use anyhow::Context;
use axum::Router;
use axum::extract::ConnectInfo;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use std::fmt::Write;
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_native_tls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// TLS 握手超时
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// 从证书和私钥文件构建 TLS 接受器，同时返回证书指纹
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> anyhow::Result<(TlsAcceptor, String)> {
    let cert = std::fs::read(cert_path)
        .with_context(|| format!("Failed to read certificate {cert_path:?}"))?;
    let key = std::fs::read(key_path)
        .with_context(|| format!("Failed to read private key {key_path:?}"))?;

    let fingerprint = fingerprint(&cert)?;
    let identity = native_tls::Identity::from_pkcs8(&cert, &key)
        .context("Certificate and key do not form a valid identity")?;
    let acceptor = native_tls::TlsAcceptor::new(identity)?;

    Ok((TlsAcceptor::from(acceptor), fingerprint))
}

/// 证书 DER 的 SHA-256 指纹，形如 `AB:CD:...`
pub fn fingerprint(cert_pem: &[u8]) -> anyhow::Result<String> {
    let cert = native_tls::Certificate::from_pem(cert_pem).context("Invalid PEM certificate")?;
    let der = cert.to_der()?;
    Ok(hex_colon(&Sha256::digest(&der)))
}

fn hex_colon(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(':');
        }
        let _ = write!(out, "{b:02X}");
    }
    out
}

/// 在 TLS 上提供 `app`，直到 `shutdown` 被取消且所有连接结束
pub async fn serve(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    app: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let connections = TaskTracker::new();

    loop {
        let (stream, remote) = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            },
        };

        let acceptor = acceptor.clone();
        let app = app.clone();
        let shutdown = shutdown.clone();

        connections.spawn(async move {
            let stream = match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    debug!("TLS handshake with {} failed: {}", remote, e);
                    return;
                }
                Err(_) => {
                    debug!("TLS handshake with {} timed out", remote);
                    return;
                }
            };

            let service = TowerToHyperService::new(app.layer(axum::Extension(ConnectInfo(remote))));
            let builder = auto::Builder::new(TokioExecutor::new());
            let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
            let mut conn = std::pin::pin!(conn);

            tokio::select! {
                result = conn.as_mut() => {
                    if let Err(e) = result {
                        debug!("Connection from {} ended with error: {}", remote, e);
                    }
                }
                () = shutdown.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    if let Err(e) = conn.as_mut().await {
                        debug!("Connection from {} ended with error: {}", remote, e);
                    }
                }
            }
        });
    }

    connections.close();
    info!("Waiting for {} TLS connection(s) to finish", connections.len());
    connections.wait().await;
    Ok(())
}
