use crate::config::{ClientConfig, WebSocketConfig};
use crate::resilience::Backoff;
use crate::ws::queue::OutboundQueue;
use crate::{Error, ErrorContext, Result};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const CLOSE_NORMAL: u16 = 1000;
/// Reported when the peer closed without a status code.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Reported when the connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Open => "OPEN",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

/// Everything the monitor reports, on one channel.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    Open,
    /// A decoded application payload. Heartbeat frames never appear here.
    Message(Value),
    Error(String),
    Closed { code: u16, reason: String },
    Reconnecting { attempt: u32, delay: Duration },
    /// Reconnect budget exhausted; the monitor has stopped.
    PermanentFailure { attempts: u32 },
}

pub type MonitorEvents = mpsc::UnboundedReceiver<MonitorEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconnectionInfo {
    pub count: u32,
    pub max_attempts: u32,
    pub is_reconnecting: bool,
}

struct Shared {
    state: ConnectionState,
    queue: OutboundQueue<String>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    intentionally_closed: bool,
    close_request: Option<(u16, String)>,
    attempt: u32,
    reconnecting: bool,
    run_id: u64,
    token: Option<CancellationToken>,
}

/// One reconnecting WebSocket bound to a server task.
///
/// The connection itself is driven by a background task spawned by
/// [`connect`](Self::connect); this handle only talks to it through shared state
/// and channels. Dropping the handle closes the connection.
pub struct TaskMonitor {
    task_id: String,
    url: Url,
    config: WebSocketConfig,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedSender<MonitorEvent>,
}

/// `base_url` with its scheme switched to `ws`/`wss` and `path` appended to its path.
pub fn derive_ws_url(base_url: &str, path: &str) -> Result<Url> {
    let mut url = Url::parse(base_url)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::configuration_with_context(
                format!("cannot derive a WebSocket URL from scheme '{}'", other),
                ErrorContext::new()
                    .with_field_path("base_url")
                    .with_details(base_url.to_string()),
            ));
        }
    };
    url.set_scheme(scheme).map_err(|_| {
        Error::configuration_with_context(
            "failed to switch URL scheme",
            ErrorContext::new().with_details(base_url.to_string()),
        )
    })?;
    let joined = format!(
        "{}/{}",
        url.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    Ok(url)
}

impl TaskMonitor {
    pub fn new(
        task_id: impl Into<String>,
        url: Url,
        config: WebSocketConfig,
    ) -> (Self, MonitorEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Shared {
            state: ConnectionState::Closed,
            queue: OutboundQueue::new(config.message_queue_size),
            outbound: None,
            intentionally_closed: false,
            close_request: None,
            attempt: 0,
            reconnecting: false,
            run_id: 0,
            token: None,
        };
        let monitor = Self {
            task_id: task_id.into(),
            url,
            config,
            shared: Arc::new(Mutex::new(shared)),
            events: tx,
        };
        (monitor, rx)
    }

    /// Monitor for `/ws/task_status/{task_id}` using the short-lived task preset.
    pub fn task_status(config: &ClientConfig, task_id: &str) -> Result<(Self, MonitorEvents)> {
        Self::task_status_with(config, task_id, WebSocketConfig::task_status())
    }

    pub fn task_status_with(
        config: &ClientConfig,
        task_id: &str,
        ws: WebSocketConfig,
    ) -> Result<(Self, MonitorEvents)> {
        let path = config
            .endpoints
            .task_status_ws
            .replace("{task_id}", task_id);
        let url = derive_ws_url(&config.base_url, &path)?;
        Ok(Self::new(task_id, url, ws))
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        lock(&self.shared)
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn reconnection_info(&self) -> ReconnectionInfo {
        let shared = self.lock();
        ReconnectionInfo {
            count: shared.attempt,
            max_attempts: self.config.reconnect_attempts,
            is_reconnecting: shared.reconnecting,
        }
    }

    /// Start the connection. A no-op while a connection is open or being
    /// established. Must be called from within a Tokio runtime.
    pub fn connect(&self) {
        let (run_id, token) = {
            let mut shared = self.lock();
            let running = shared
                .token
                .as_ref()
                .map(|t| !t.is_cancelled())
                .unwrap_or(false);
            if running {
                debug!(task_id = %self.task_id, state = %shared.state, "already connected");
                return;
            }
            shared.run_id += 1;
            shared.intentionally_closed = false;
            shared.close_request = None;
            shared.reconnecting = false;
            shared.state = ConnectionState::Connecting;
            let token = CancellationToken::new();
            shared.token = Some(token.clone());
            (shared.run_id, token)
        };

        let conn = Connection {
            task_id: self.task_id.clone(),
            url: self.url.clone(),
            config: self.config.clone(),
            shared: self.shared.clone(),
            events: self.events.clone(),
            run_id,
            token,
        };
        tokio::spawn(conn.run());
    }

    /// Send now if open, otherwise queue for the next open.
    ///
    /// Returns `true` when handed to the live connection. A handed-off message
    /// that the connection never writes, because it dropped first, goes back to
    /// the front of the queue.
    pub fn send(&self, data: &Value) -> bool {
        self.send_text(data.to_string())
    }

    pub fn send_text(&self, text: String) -> bool {
        let mut shared = self.lock();
        if shared.state == ConnectionState::Open {
            if let Some(tx) = shared.outbound.as_ref() {
                match tx.send(text) {
                    Ok(()) => return true,
                    Err(mpsc::error::SendError(text)) => {
                        shared.queue.push(text);
                        return false;
                    }
                }
            }
        }
        debug!(task_id = %self.task_id, "socket not open, queueing message");
        shared.queue.push(text);
        false
    }

    /// Close on purpose: no reconnect, pending timers and queued messages are dropped.
    pub fn close(&self, code: u16, reason: &str) {
        let mut shared = self.lock();
        shared.intentionally_closed = true;
        shared.reconnecting = false;
        shared.queue.clear();
        shared.outbound = None;
        if let Some(token) = shared.token.take() {
            shared.close_request = Some((code, reason.to_string()));
            if shared.state != ConnectionState::Closed {
                shared.state = ConnectionState::Closing;
            }
            token.cancel();
        }
        info!(task_id = %self.task_id, code, reason, "closing task monitor");
    }

    /// Close normally, reset the attempt counter and connect again.
    pub fn reconnect(&self) {
        self.close(CLOSE_NORMAL, "Manual reconnection");
        {
            let mut shared = self.lock();
            shared.attempt = 0;
            shared.state = ConnectionState::Closed;
        }
        self.connect();
    }
}

impl Drop for TaskMonitor {
    fn drop(&mut self) {
        let mut shared = self.lock();
        shared.intentionally_closed = true;
        if let Some(token) = shared.token.take() {
            shared.close_request = Some((CLOSE_NORMAL, "Monitor dropped".to_string()));
            token.cancel();
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

enum Ended {
    Closed { code: u16, reason: String },
    Cancelled,
}

/// Background side of a [`TaskMonitor`]: one instance per `connect()`.
struct Connection {
    task_id: String,
    url: Url,
    config: WebSocketConfig,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedSender<MonitorEvent>,
    run_id: u64,
    token: CancellationToken,
}

impl Connection {
    /// Mutate shared state only while this run is still the current one.
    fn update<F: FnOnce(&mut Shared)>(&self, f: F) -> bool {
        let mut shared = lock(&self.shared);
        if shared.run_id != self.run_id {
            return false;
        }
        f(&mut shared);
        true
    }

    fn emit(&self, event: MonitorEvent) {
        if self.token.is_cancelled() {
            return;
        }
        let _ = self.events.send(event);
    }

    async fn run(self) {
        let mut backoff = Backoff::new(self.config.backoff_policy());

        loop {
            self.update(|s| s.state = ConnectionState::Connecting);
            info!(task_id = %self.task_id, url = %self.url, "connecting task monitor");

            let connected = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                r = tokio_tungstenite::connect_async(self.url.as_str()) => r,
            };

            let (tx, mut rx) = mpsc::unbounded_channel();
            let ended = match connected {
                Ok((ws, _)) => {
                    backoff.reset();
                    let mut queued = Vec::new();
                    self.update(|s| {
                        s.state = ConnectionState::Open;
                        s.attempt = 0;
                        s.reconnecting = false;
                        s.outbound = Some(tx);
                        queued = s.queue.drain();
                    });
                    info!(task_id = %self.task_id, flushed = queued.len(), "task monitor open");
                    self.emit(MonitorEvent::Open);
                    self.session(ws, &mut rx, queued).await
                }
                Err(e) => {
                    warn!(task_id = %self.task_id, error = %e, "task monitor connect failed");
                    self.emit(MonitorEvent::Error(e.to_string()));
                    Ended::Closed {
                        code: CLOSE_ABNORMAL,
                        reason: e.to_string(),
                    }
                }
            };

            self.release_outbound(&mut rx, matches!(ended, Ended::Closed { .. }));

            let (code, reason) = match ended {
                Ended::Cancelled => break,
                Ended::Closed { code, reason } => (code, reason),
            };
            if self.token.is_cancelled() {
                break;
            }

            self.update(|s| s.state = ConnectionState::Closed);
            self.emit(MonitorEvent::Closed {
                code,
                reason: reason.clone(),
            });

            let intentional = lock(&self.shared).intentionally_closed;
            if intentional || code == CLOSE_NORMAL {
                info!(task_id = %self.task_id, code, "task monitor closed");
                break;
            }

            match backoff.next_delay() {
                Some(delay) => {
                    let attempt = backoff.attempt();
                    self.update(|s| {
                        s.attempt = attempt;
                        s.reconnecting = true;
                    });
                    info!(
                        task_id = %self.task_id,
                        attempt,
                        max_attempts = backoff.policy().max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        code,
                        "scheduling reconnect"
                    );
                    self.emit(MonitorEvent::Reconnecting { attempt, delay });
                    tokio::select! {
                        biased;
                        _ = self.token.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => {
                    let attempts = backoff.attempt();
                    error!(task_id = %self.task_id, attempts, "max reconnection attempts reached");
                    self.emit(MonitorEvent::PermanentFailure { attempts });
                    break;
                }
            }
        }

        self.update(|s| {
            s.state = ConnectionState::Closed;
            s.outbound = None;
            s.reconnecting = false;
            s.token = None;
        });
        debug!(task_id = %self.task_id, "task monitor stopped");
    }

    /// Detach the live sender. Messages it accepted but the session never wrote
    /// are put back in the queue when `requeue` is set and dropped otherwise.
    fn release_outbound(&self, rx: &mut mpsc::UnboundedReceiver<String>, requeue: bool) {
        self.update(|s| {
            s.outbound = None;
            let mut unsent = Vec::new();
            while let Ok(text) = rx.try_recv() {
                unsent.push(text);
            }
            if requeue && !unsent.is_empty() {
                debug!(
                    task_id = %self.task_id,
                    count = unsent.len(),
                    "requeueing unsent messages"
                );
                s.queue.restore(unsent);
            }
        });
    }

    fn end_abnormally(&self, e: impl fmt::Display) -> Ended {
        let reason = e.to_string();
        self.emit(MonitorEvent::Error(reason.clone()));
        Ended::Closed {
            code: CLOSE_ABNORMAL,
            reason,
        }
    }

    async fn session(
        &self,
        ws: WsStream,
        outbound: &mut mpsc::UnboundedReceiver<String>,
        queued: Vec<String>,
    ) -> Ended {
        let (mut sink, mut stream) = ws.split();

        let mut queued = queued.into_iter();
        while let Some(text) = queued.next() {
            if let Err(e) = sink.send(WsMessage::Text(text)).await {
                self.update(|s| s.queue.restore(queued.collect()));
                return self.end_abnormally(e);
            }
        }

        let mut heartbeat = self
            .config
            .heartbeat_interval()
            .map(|every| tokio::time::interval_at(Instant::now() + every, every));

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    let (code, reason) = lock(&self.shared)
                        .close_request
                        .clone()
                        .unwrap_or((CLOSE_NORMAL, String::new()));
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    let _ = tokio::time::timeout(
                        Duration::from_secs(1),
                        sink.send(WsMessage::Close(Some(frame))),
                    )
                    .await;
                    return Ended::Cancelled;
                }
                Some(text) = outbound.recv() => {
                    if let Err(e) = sink.send(WsMessage::Text(text)).await {
                        return self.end_abnormally(e);
                    }
                }
                _ = tick(&mut heartbeat) => {
                    debug!(task_id = %self.task_id, "heartbeat ping");
                    let ping = serde_json::json!({"type": "ping"}).to_string();
                    if let Err(e) = sink.send(WsMessage::Text(ping)).await {
                        return self.end_abnormally(e);
                    }
                }
                msg = stream.next() => {
                    let text = match msg {
                        Some(Ok(WsMessage::Text(text))) => text,
                        Some(Ok(WsMessage::Binary(data))) => match String::from_utf8(data) {
                            Ok(text) => text,
                            Err(_) => {
                                warn!(task_id = %self.task_id, "ignoring non-UTF-8 binary frame");
                                continue;
                            }
                        },
                        // tungstenite answers protocol pings itself
                        Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
                        Some(Ok(WsMessage::Frame(_))) => continue,
                        Some(Ok(WsMessage::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (u16::from(f.code), f.reason.into_owned()))
                                .unwrap_or((CLOSE_NO_STATUS, String::new()));
                            debug!(
                                task_id = %self.task_id,
                                code,
                                reason = reason.as_str(),
                                "close frame received"
                            );
                            self.update(|s| s.state = ConnectionState::Closing);
                            return Ended::Closed { code, reason };
                        }
                        Some(Err(e)) => {
                            warn!(task_id = %self.task_id, error = %e, "task monitor read failed");
                            return self.end_abnormally(e);
                        }
                        None => {
                            return Ended::Closed {
                                code: CLOSE_ABNORMAL,
                                reason: "connection lost".to_string(),
                            };
                        }
                    };
                    if let Some(reply) = self.on_text(&text) {
                        if let Err(e) = sink.send(WsMessage::Text(reply)).await {
                            return self.end_abnormally(e);
                        }
                    }
                }
            }
        }
    }

    /// Decode one text frame. Returns a reply to send for heartbeat pings.
    fn on_text(&self, text: &str) -> Option<String> {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(task_id = %self.task_id, error = %e, "ignoring non-JSON message");
                return None;
            }
        };
        match value.get("type").and_then(Value::as_str) {
            Some("ping") => {
                debug!(task_id = %self.task_id, "answering heartbeat ping");
                Some(serde_json::json!({"type": "pong"}).to_string())
            }
            Some("pong") => None,
            _ => {
                self.emit(MonitorEvent::Message(value));
                None
            }
        }
    }
}
