//! 集成测试 - 完整 HTTP 服务
//!
//! 在随机端口上启动真实服务，用 reqwest 和 tokio-tungstenite 作为客户端。

use dirshare_core::share::{BULK_PREFIX, REALTIME_PREFIX, STATIC_PREFIX};
use dirshare_core::{FileServer, HubHandle, SHUTDOWN_GRACE, ServerConfig, SessionTimings};
use futures_util::{SinkExt, StreamExt};
use reqwest::StatusCode;
use reqwest::header;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

struct TestServer {
    base: String,
    ws: String,
    hub: HubHandle,
    shutdown: CancellationToken,
    task: JoinHandle<anyhow::Result<()>>,
}

async fn start(webroot: &Path, password: Option<&str>) -> TestServer {
    start_with(webroot, password, SessionTimings::default()).await
}

async fn start_with(webroot: &Path, password: Option<&str>, timings: SessionTimings) -> TestServer {
    let config = ServerConfig {
        ip: "127.0.0.1".to_string(),
        port: 0,
        webroot: webroot.to_path_buf(),
        password: password.map(str::to_string),
        ..Default::default()
    }
    .validate()
    .unwrap();

    let server = FileServer::bind(&config)
        .await
        .unwrap()
        .with_session_timings(timings);
    let addr = server.local_addr().unwrap();
    let hub = server.state().hub.clone();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(server.run(shutdown.clone()));

    TestServer {
        base: format!("http://{addr}"),
        ws: format!("ws://{addr}/{REALTIME_PREFIX}/ws"),
        hub,
        shutdown,
        task,
    }
}

fn fixture() -> TempDir {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("banana"), b"yellow").unwrap();
    fs::write(tmp.path().join("Apple.txt"), b"red").unwrap();
    fs::create_dir(tmp.path().join("cherry")).unwrap();
    fs::write(tmp.path().join("cherry/pit.txt"), b"stone").unwrap();
    tmp
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

/// 等待注册的会话数达到 `expected`
async fn wait_for_sessions(hub: &HubHandle, expected: usize) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if hub.session_count().await.unwrap() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "session count never reached {expected}");
}

/// 读取下一个文本帧，跳过 ping/pong
async fn next_text<S>(stream: &mut S) -> String
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        match msg {
            Message::Text(text) => return text,
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_directory_listing_order() {
    let tmp = fixture();
    let server = start(tmp.path(), None).await;

    let res = client().get(&server.base).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.text().await.unwrap();

    let apple = body.find("Apple.txt").unwrap();
    let banana = body.find("banana").unwrap();
    let cherry = body.find("cherry/").unwrap();
    assert!(apple < banana && banana < cherry);
    assert!(body.contains("Index of <a href=\"/\">/</a>"));
    assert!(body.contains(&format!("/{STATIC_PREFIX}/css/style.css")));

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_file_and_forced_download() {
    let tmp = fixture();
    let server = start(tmp.path(), None).await;
    let client = client();

    let res = client
        .get(format!("{}/Apple.txt", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().get(header::CONTENT_DISPOSITION).is_none());
    assert_eq!(res.text().await.unwrap(), "red");

    let res = client
        .get(format!("{}/Apple.txt?download", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let disposition = res.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert_eq!(disposition, "attachment; filename=\"Apple.txt\"");
    assert_eq!(res.text().await.unwrap(), "red");

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_missing_and_traversal_are_not_found() {
    let tmp = fixture();
    let server = start(&tmp.path().join("cherry"), None).await;
    let client = client();

    let res = client
        .get(format!("{}/nope.txt", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // 编码后的斜杠不会被客户端规范化掉
    let res = client
        .get(format!("{}/..%2fbanana", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert!(!res.text().await.unwrap().contains("yellow"));

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_upload_strips_directories() {
    let tmp = fixture();
    let server = start(tmp.path(), None).await;

    let form = reqwest::multipart::Form::new()
        .percent_encode_noop()
        .part(
            "files",
            reqwest::multipart::Part::bytes(b"#!/bin/sh".to_vec()).file_name("../../evil.sh"),
        )
        .part(
            "files",
            reqwest::multipart::Part::bytes(Vec::new()).file_name("empty.txt"),
        );

    let res = client()
        .post(format!("{}/cherry/upload", server.base))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(res.headers()[header::LOCATION], "/cherry");
    assert_eq!(
        fs::read(tmp.path().join("cherry/evil.sh")).unwrap(),
        b"#!/bin/sh"
    );
    assert!(!tmp.path().join("evil.sh").exists());
    assert_eq!(
        fs::metadata(tmp.path().join("cherry/empty.txt")).unwrap().len(),
        0
    );

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_upload_to_missing_directory() {
    let tmp = fixture();
    let server = start(tmp.path(), None).await;

    let form = reqwest::multipart::Form::new().part(
        "files",
        reqwest::multipart::Part::bytes(b"x".to_vec()).file_name("x.txt"),
    );
    let res = client()
        .post(format!("{}/missing/upload", server.base))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert!(!tmp.path().join("missing").exists());

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_bulk_zip_download() {
    let tmp = fixture();
    let server = start(tmp.path(), None).await;

    let res = client()
        .get(format!(
            "{}/{BULK_PREFIX}/?file=%2FApple.txt&file=%2Fcherry",
            server.base
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::CONTENT_TYPE], "application/zip");
    let disposition = res.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.ends_with("_dirshare_download.zip\""));

    let data = res.bytes().await.unwrap();
    let archive = zip::ZipArchive::new(Cursor::new(data.to_vec())).unwrap();
    let mut names: Vec<&str> = archive.file_names().collect();
    names.sort_unstable();
    assert_eq!(names, vec!["Apple.txt", "cherry/pit.txt"]);

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_bulk_zip_requires_selection() {
    let tmp = fixture();
    let server = start(tmp.path(), None).await;

    let res = client()
        .get(format!("{}/{BULK_PREFIX}/", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_basic_auth() {
    let tmp = fixture();
    let server = start(tmp.path(), Some("hunter2")).await;
    let client = client();

    let res = client.get(&server.base).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        res.headers()[header::WWW_AUTHENTICATE],
        "Basic realm=\"Restricted\""
    );

    let res = client
        .get(&server.base)
        .basic_auth("dirshare", Some("wrong"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(&server.base)
        .basic_auth("dirshare", Some("hunter2"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // 实时通道同样受保护
    let res = client
        .get(format!("{}/{REALTIME_PREFIX}/download", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_static_assets_and_favicon() {
    let tmp = fixture();
    let server = start(tmp.path(), None).await;
    let client = client();

    let res = client
        .get(format!("{}/{STATIC_PREFIX}/css/style.css", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::CONTENT_TYPE], "text/css");

    let res = client
        .get(format!("{}/favicon.ico", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_clipboard_sync_between_clients() {
    let tmp = fixture();
    let server = start(tmp.path(), None).await;

    let (mut alice, _) = tokio_tungstenite::connect_async(server.ws.as_str())
        .await
        .unwrap();
    let (mut bob, _) = tokio_tungstenite::connect_async(server.ws.as_str())
        .await
        .unwrap();
    wait_for_sessions(&server.hub, 2).await;

    alice
        .send(Message::Text(
            r#"{"type":"newEntry","content":"hello from alice"}"#.to_string(),
        ))
        .await
        .unwrap();

    assert_eq!(next_text(&mut alice).await, r#"{"type":"refreshClipboard"}"#);
    assert_eq!(next_text(&mut bob).await, r#"{"type":"refreshClipboard"}"#);

    let res = client()
        .get(format!("{}/{REALTIME_PREFIX}/download", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let disposition = res.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.ends_with("-clipboard.json\""));

    let entries: serde_json::Value = res.json().await.unwrap();
    assert_eq!(entries[0]["text"], "hello from alice");
    let id = entries[0]["id"].as_u64().unwrap();

    // 删除同样广播给所有会话
    bob.send(Message::Text(format!(r#"{{"type":"delEntry","content":{id}}}"#)))
        .await
        .unwrap();
    assert_eq!(next_text(&mut alice).await, r#"{"type":"refreshClipboard"}"#);
    assert_eq!(next_text(&mut bob).await, r#"{"type":"refreshClipboard"}"#);

    // 删除不存在的条目同样触发刷新
    bob.send(Message::Text(format!(r#"{{"type":"delEntry","content":{id}}}"#)))
        .await
        .unwrap();
    assert_eq!(next_text(&mut alice).await, r#"{"type":"refreshClipboard"}"#);
    assert_eq!(next_text(&mut bob).await, r#"{"type":"refreshClipboard"}"#);

    // 非法帧不会断开连接
    alice
        .send(Message::Text("not json".to_string()))
        .await
        .unwrap();
    alice
        .send(Message::Text(r#"{"type":"clearClipboard"}"#.to_string()))
        .await
        .unwrap();
    assert_eq!(next_text(&mut alice).await, r#"{"type":"refreshClipboard"}"#);

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_disconnect_unregisters_sessions() {
    let tmp = fixture();
    let server = start(tmp.path(), None).await;

    let (mut alice, _) = tokio_tungstenite::connect_async(server.ws.as_str())
        .await
        .unwrap();
    let (bob, _) = tokio_tungstenite::connect_async(server.ws.as_str())
        .await
        .unwrap();
    wait_for_sessions(&server.hub, 2).await;

    // 一个正常关闭，一个直接断开
    alice.close(None).await.unwrap();
    drop(bob);
    wait_for_sessions(&server.hub, 0).await;

    // 剩下的广播不会因已注销的会话出错
    let (mut carol, _) = tokio_tungstenite::connect_async(server.ws.as_str())
        .await
        .unwrap();
    wait_for_sessions(&server.hub, 1).await;
    carol
        .send(Message::Text(r#"{"type":"newEntry","content":"still here"}"#.to_string()))
        .await
        .unwrap();
    assert_eq!(next_text(&mut carol).await, r#"{"type":"refreshClipboard"}"#);

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_silent_client_times_out() {
    let tmp = fixture();
    let timings = SessionTimings {
        ping_period: Duration::from_millis(100),
        pong_wait: Duration::from_millis(300),
        write_wait: Duration::from_millis(200),
    };
    let server = start_with(tmp.path(), None, timings).await;

    // 连接后从不读取，也就不会回 pong
    let (_silent, _) = tokio_tungstenite::connect_async(server.ws.as_str())
        .await
        .unwrap();
    wait_for_sessions(&server.hub, 1).await;
    wait_for_sessions(&server.hub, 0).await;

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_graceful_shutdown_closes_sessions() {
    let tmp = fixture();
    let server = start(tmp.path(), None).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws.as_str())
        .await
        .unwrap();
    wait_for_sessions(&server.hub, 1).await;

    server.shutdown.cancel();

    // 会话收到关闭帧或连接直接结束
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());

    let result = tokio::time::timeout(SHUTDOWN_GRACE, server.task)
        .await
        .expect("server did not stop within the grace period")
        .unwrap();
    assert!(result.is_ok());
}
