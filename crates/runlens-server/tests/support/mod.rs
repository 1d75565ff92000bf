#![allow(dead_code)]

use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use runlens_model::WorkflowRun;
use runlens_server::{build_router, ApiConfig, AppState, AuthConfig, FakeUpstream, ReportConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use zip::write::SimpleFileOptions;

pub const OWNER: &str = "octo";
pub const REPO: &str = "site";

pub struct RawResponse {
    pub status: u16,
    pub head: String,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("json body")
    }

    pub fn header(&self, name: &str) -> Option<String> {
        let prefix = format!("{}:", name.to_ascii_lowercase());
        self.head.lines().find_map(|line| {
            line.to_ascii_lowercase()
                .starts_with(&prefix)
                .then(|| line[prefix.len()..].trim().to_string())
        })
    }
}

pub fn report_config(root: &Path) -> ReportConfig {
    ReportConfig {
        served_root: root.to_path_buf(),
        ..ReportConfig::default()
    }
}

pub fn state_with(upstream: Arc<FakeUpstream>, reports: ReportConfig, api: ApiConfig) -> AppState {
    AppState::with_config(
        upstream,
        None,
        api,
        reports,
        AuthConfig {
            cookie_secure: false,
            ..AuthConfig::default()
        },
    )
}

pub async fn spawn_server(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    let app = build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    addr
}

pub async fn send_raw(
    addr: SocketAddr,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
) -> RawResponse {
    let mut stream = TcpStream::connect(addr).await.expect("connect server");
    let mut req = format!("{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n");
    for (k, v) in headers {
        req.push_str(&format!("{k}: {v}\r\n"));
    }
    if method == "POST" || method == "DELETE" {
        req.push_str("Content-Length: 0\r\n");
    }
    req.push_str("\r\n");
    stream
        .write_all(req.as_bytes())
        .await
        .expect("write request");
    let mut response = Vec::new();
    stream
        .read_to_end(&mut response)
        .await
        .expect("read response");
    let split = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("http response must have separator");
    let head = String::from_utf8_lossy(&response[..split]).into_owned();
    let body = response[split + 4..].to_vec();
    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse::<u16>().ok())
        .expect("http status");
    RawResponse { status, head, body }
}

pub async fn get(addr: SocketAddr, path: &str, token: &str) -> RawResponse {
    let auth = format!("Bearer {token}");
    send_raw(addr, "GET", path, &[("Authorization", &auth)]).await
}

pub async fn post(addr: SocketAddr, path: &str, token: &str) -> RawResponse {
    let auth = format!("Bearer {token}");
    send_raw(addr, "POST", path, &[("Authorization", &auth)]).await
}

pub async fn delete(addr: SocketAddr, path: &str, token: &str) -> RawResponse {
    let auth = format!("Bearer {token}");
    send_raw(addr, "DELETE", path, &[("Authorization", &auth)]).await
}

/// Opens a streaming request and returns the socket after writing it.
pub async fn open_stream(addr: SocketAddr, path: &str, token: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.expect("connect server");
    let req = format!(
        "GET {path} HTTP/1.1\r\nHost: {addr}\r\nAuthorization: Bearer {token}\r\nAccept: text/event-stream\r\n\r\n"
    );
    stream
        .write_all(req.as_bytes())
        .await
        .expect("write request");
    stream
}

/// Reads from `stream` into `buf` until `needle` appears or `limit` elapses.
pub async fn read_until(
    stream: &mut TcpStream,
    buf: &mut String,
    needle: &str,
    limit: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    let mut chunk = [0_u8; 4096];
    while !buf.contains(needle) {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return false;
        }
        match tokio::time::timeout(remaining, stream.read(&mut chunk)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => return buf.contains(needle),
            Ok(Ok(n)) => buf.push_str(&String::from_utf8_lossy(&chunk[..n])),
        }
    }
    true
}

pub fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut out);
        for (name, body) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .expect("start file");
            writer.write_all(body).expect("write entry");
        }
        writer.finish().expect("finish zip");
    }
    out.into_inner()
}

pub const INDEX_HTML: &str = r#"<!doctype html><html><head><link rel="stylesheet" href="./styles.css"><script src="app.js"></script></head><body><img src="data/shot.png"><script>const data = "data.js";</script></body></html>"#;

pub fn report_zip() -> Vec<u8> {
    zip_of(&[
        ("playwright-report/index.html", INDEX_HTML.as_bytes()),
        ("playwright-report/app.js", b"console.log('report');"),
        ("playwright-report/styles.css", b"body { margin: 0; }"),
        ("playwright-report/data/shot.png", &[0x89, b'P', b'N', b'G']),
    ])
}

pub fn run(id: u64) -> WorkflowRun {
    WorkflowRun {
        id,
        name: Some("e2e".to_string()),
        head_branch: Some("main".to_string()),
        head_sha: format!("{id:040x}"),
        run_number: id,
        event: "push".to_string(),
        status: Some("completed".to_string()),
        conclusion: Some("success".to_string()),
        html_url: format!("https://github.com/{OWNER}/{REPO}/actions/runs/{id}"),
        created_at: None,
        updated_at: None,
    }
}
