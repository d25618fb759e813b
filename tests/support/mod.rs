//! Shared fixtures for integration tests: raw HTTP responders and in-process
//! WebSocket servers.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use notes_stream::{ClientConfig, HttpTransport, NoCredentials, SseStreamClient};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

pub type ServerWs = WebSocketStream<TcpStream>;

/// A request read off a raw socket.
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub head: String,
    pub body: Vec<u8>,
}

impl RawRequest {
    pub fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.head.lines().skip(1).find_map(|line| {
            let (k, v) = line.split_once(':')?;
            k.trim()
                .eq_ignore_ascii_case(name)
                .then(|| v.trim().to_string())
        })
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Read one full HTTP/1.1 request (head + `content-length` body).
pub async fn read_request(stream: &mut TcpStream) -> RawRequest {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        if let Some(end) = find_head_end(&buf) {
            break end;
        }
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before sending a request");
        buf.extend_from_slice(&chunk[..n]);
    };
    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let req = RawRequest {
        head,
        body: Vec::new(),
    };
    let len: usize = req
        .header("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = buf[head_end..].to_vec();
    while body.len() < len {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    RawRequest { body, ..req }
}

/// Head of a streamed response whose body ends when the connection closes.
pub const SSE_HEAD: &str =
    "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncache-control: no-cache\r\nconnection: close\r\n\r\n";

pub fn sse_frames(frames: &[&str]) -> String {
    frames.iter().map(|f| format!("data: {}\n\n", f)).collect()
}

pub fn json_response(status: u16, body: &serde_json::Value) -> String {
    let body = body.to_string();
    format!(
        "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    )
}

/// Listener whose connections are handed to `handler` together with their index.
pub struct RawServer {
    pub addr: SocketAddr,
    pub connections: Arc<AtomicUsize>,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for RawServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl RawServer {
    pub async fn start<F, Fut>(handler: F) -> Self
    where
        F: Fn(usize, TcpStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = connections.clone();
        let handler = Arc::new(handler);
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let idx = counter.fetch_add(1, Ordering::SeqCst);
                let handler = handler.clone();
                tokio::spawn(async move { handler(idx, stream).await });
            }
        });
        Self {
            addr,
            connections,
            handle,
        }
    }

    pub fn http_url(&self) -> String {
        format!("http://{}/api/v1", self.addr)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// WebSocket server: every accepted connection runs `script` after the handshake.
pub async fn ws_server<F, Fut>(script: F) -> RawServer
where
    F: Fn(usize, ServerWs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let script = Arc::new(script);
    RawServer::start(move |idx, stream| {
        let script = script.clone();
        async move {
            if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                script(idx, ws).await;
            }
        }
    })
    .await
}

/// Wait until the peer sends a close frame; returns its code.
pub async fn await_close(ws: &mut ServerWs) -> Option<u16> {
    while let Some(msg) = ws.next().await {
        match msg {
            Ok(Message::Close(frame)) => return frame.map(|f| u16::from(f.code)),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
    None
}

pub async fn send_json(ws: &mut ServerWs, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

/// Next text frame from the client, parsed as JSON.
pub async fn recv_json(ws: &mut ServerWs) -> serde_json::Value {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), ws.next()).await {
            Ok(Some(Ok(Message::Text(t)))) => return serde_json::from_str(&t).unwrap(),
            Ok(Some(Ok(_))) => continue,
            other => panic!("expected a text frame, got {:?}", other),
        }
    }
}

/// Peek the request head without consuming it; true for WebSocket upgrades.
pub async fn is_upgrade(stream: &TcpStream) -> bool {
    let mut buf = vec![0u8; 4096];
    loop {
        let n = stream.peek(&mut buf).await.unwrap_or(0);
        if n == 0 {
            return false;
        }
        if let Some(end) = find_head_end(&buf[..n]) {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            return head.contains("upgrade: websocket");
        }
        if n == buf.len() {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

pub fn sse_client(base_url: &str) -> SseStreamClient {
    let config = ClientConfig::default().with_base_url(base_url);
    let transport = HttpTransport::new(&config, Arc::new(NoCredentials)).unwrap();
    SseStreamClient::new(Arc::new(transport))
}

/// Write an SSE head and frames, then close.
pub async fn write_sse(mut stream: TcpStream, frames: &[&str]) {
    let _ = read_request(&mut stream).await;
    let response = format!("{}{}", SSE_HEAD, sse_frames(frames));
    stream.write_all(response.as_bytes()).await.unwrap();
    let _ = stream.shutdown().await;
}
