use crate::config::ClientConfig;
use crate::transport::{Credentials, TransportError};
use crate::{BoxStream, Error, Result};
use bytes::Bytes;
use futures::{stream, StreamExt, TryStreamExt};
use reqwest::{Method, Proxy};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Thin wrapper over a shared `reqwest::Client` that knows the backend base URL and
/// how to attach credentials.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    csrf_header: String,
    credentials: Arc<dyn Credentials>,
    idle_timeout: Option<Duration>,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig, credentials: Arc<dyn Credentials>) -> Result<Self> {
        // No overall timeout: generations can stream for minutes.
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(
                env::var("NOTES_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(8),
            )
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .tcp_keepalive(Some(Duration::from_secs(30)));

        if let Ok(proxy_url) = env::var("NOTES_PROXY_URL") {
            if let Ok(proxy) = Proxy::all(&proxy_url) {
                builder = builder.proxy(proxy);
            }
        }

        let client = builder
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            csrf_header: config.csrf_header.clone(),
            credentials,
            idle_timeout: config.idle_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = self.url(path);
        let mut req = self.client.request(method.clone(), &url);

        if method != Method::GET {
            let token = self.credentials.csrf_token().unwrap_or_default();
            req = req.header(self.csrf_header.as_str(), token);
        }
        if let Some(cookie) = self.credentials.cookie_header() {
            req = req.header(reqwest::header::COOKIE, cookie);
        }
        req
    }

    /// Issue a JSON request and return the raw response, mapping only
    /// connection-level failures to errors.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let mut req = self.request(method, path);
        if let Some(body) = body {
            req = req.json(body);
        }
        req.send()
            .await
            .map_err(|e| Error::Transport(TransportError::Http(e)))
    }

    /// POST `body` and return the response body as a byte stream.
    ///
    /// A non-2xx status is returned as [`Error::Remote`] with the status code
    /// and as much of the body as the server sent.
    pub async fn open_stream(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<BoxStream<'static, Bytes>> {
        let started = std::time::Instant::now();
        let resp = self
            .request(Method::POST, path)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Transport(TransportError::Http(e)))?;

        let status = resp.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("Request failed");
            let text = resp.text().await.unwrap_or_default();
            let message = if text.trim().is_empty() {
                reason.to_string()
            } else {
                format!("{}: {}", reason, text.trim())
            };
            info!(
                http_status = status.as_u16(),
                endpoint = path,
                duration_ms = started.elapsed().as_millis() as u64,
                "stream request rejected"
            );
            return Err(Error::Remote {
                status: status.as_u16(),
                message,
            });
        }

        debug!(
            endpoint = path,
            duration_ms = started.elapsed().as_millis() as u64,
            "stream opened"
        );

        let bytes = resp
            .bytes_stream()
            .map_err(|e| Error::Transport(TransportError::Http(e)));
        let bytes: BoxStream<'static, Bytes> = Box::pin(bytes);

        Ok(match self.idle_timeout {
            Some(idle) => with_idle_timeout(bytes, idle),
            None => bytes,
        })
    }
}

/// Fail the stream with [`TransportError::IdleTimeout`] when no chunk arrives within `idle`.
pub fn with_idle_timeout(
    input: BoxStream<'static, Bytes>,
    idle: Duration,
) -> BoxStream<'static, Bytes> {
    let s = stream::unfold((input, false), move |(mut input, done)| async move {
        if done {
            return None;
        }
        match tokio::time::timeout(idle, input.next()).await {
            Ok(Some(item)) => Some((item, (input, false))),
            Ok(None) => None,
            Err(_) => Some((
                Err(Error::Transport(TransportError::IdleTimeout(idle))),
                (input, true),
            )),
        }
    });
    Box::pin(s)
}
