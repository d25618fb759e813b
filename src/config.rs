//! Runtime configuration.
//!
//! Precedence, lowest first: built-in defaults, an optional YAML file, then
//! environment variables:
//!
//! - `NOTES_API_URL`: backend base URL (default `http://localhost:8010/api/v1`)
//! - `NOTES_CONNECT_TIMEOUT_SECS`: HTTP connect timeout (default 10)
//! - `NOTES_STREAM_IDLE_TIMEOUT_SECS`: per-read watchdog for streams (off by default)
//! - `NOTES_STREAM_MAX_RETRIES`: enables SSE auto-reconnect with this many attempts

use crate::resilience::BackoffPolicy;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8010/api/v1";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_csrf_header() -> String {
    "X-CSRF-Token".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Header carrying the anti-forgery token on non-GET requests.
    #[serde(default = "default_csrf_header")]
    pub csrf_header: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// No overall request timeout is applied to streams; this optional watchdog
    /// fails a stream that delivers no bytes for this long.
    #[serde(default)]
    pub idle_timeout_ms: Option<u64>,
    #[serde(default)]
    pub stream_retry: StreamRetryConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub endpoints: Endpoints,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            csrf_header: default_csrf_header(),
            connect_timeout_ms: default_connect_timeout_ms(),
            idle_timeout_ms: None,
            stream_retry: StreamRetryConfig::default(),
            websocket: WebSocketConfig::default(),
            endpoints: Endpoints::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// YAML file plus environment overrides.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let mut cfg = Self::from_yaml_str(&raw)?;
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn apply_env(&mut self) {
        if let Ok(url) = env::var("NOTES_API_URL") {
            if !url.trim().is_empty() {
                self.base_url = url.trim().to_string();
            }
        }
        if let Some(secs) = env_u64("NOTES_CONNECT_TIMEOUT_SECS") {
            self.connect_timeout_ms = secs.saturating_mul(1000);
        }
        if let Some(secs) = env_u64("NOTES_STREAM_IDLE_TIMEOUT_SECS") {
            self.idle_timeout_ms = (secs > 0).then(|| secs.saturating_mul(1000));
        }
        if let Some(n) = env_u64("NOTES_STREAM_MAX_RETRIES") {
            self.stream_retry.enabled = n > 0;
            self.stream_retry.max_retries = n.min(u32::MAX as u64) as u32;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.base_url).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid base URL: {}", e),
                ErrorContext::new()
                    .with_field_path("base_url")
                    .with_details(self.base_url.clone()),
            )
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::configuration_with_context(
                "base URL must use http or https",
                ErrorContext::new()
                    .with_field_path("base_url")
                    .with_details(self.base_url.clone()),
            ));
        }
        if self.websocket.message_queue_size == 0 {
            return Err(Error::configuration_with_context(
                "message queue size must be at least 1",
                ErrorContext::new().with_field_path("websocket.message_queue_size"),
            ));
        }
        Ok(())
    }

    /// `base_url` joined with an endpoint path.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok()?.trim().parse().ok()
}

/// Auto-reconnect for SSE streams. Off unless asked for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRetryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "StreamRetryConfig::default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "StreamRetryConfig::default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "StreamRetryConfig::default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl StreamRetryConfig {
    fn default_max_retries() -> u32 {
        3
    }

    fn default_base_delay_ms() -> u64 {
        2000
    }

    fn default_max_delay_ms() -> u64 {
        30_000
    }

    pub fn enabled(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            enabled: true,
            max_retries,
            base_delay_ms: base_delay.as_millis() as u64,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> BackoffPolicy {
        if !self.enabled {
            return BackoffPolicy::disabled();
        }
        BackoffPolicy::new(
            self.max_retries,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

impl Default for StreamRetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: Self::default_max_retries(),
            base_delay_ms: Self::default_base_delay_ms(),
            max_delay_ms: Self::default_max_delay_ms(),
        }
    }
}

/// Task monitor settings. Defaults match a long-lived connection; see
/// [`WebSocketConfig::task_status`] for the short-lived preset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    #[serde(default = "WebSocketConfig::default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(default = "WebSocketConfig::default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "WebSocketConfig::default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,
    /// 0 disables the heartbeat.
    #[serde(default = "WebSocketConfig::default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "WebSocketConfig::default_message_queue_size")]
    pub message_queue_size: usize,
}

impl WebSocketConfig {
    fn default_reconnect_attempts() -> u32 {
        5
    }

    fn default_reconnect_delay_ms() -> u64 {
        1000
    }

    fn default_max_reconnect_delay_ms() -> u64 {
        30_000
    }

    fn default_heartbeat_interval_ms() -> u64 {
        30_000
    }

    fn default_message_queue_size() -> usize {
        100
    }

    /// Short-lived task-status preset: 3 attempts from 2 s, no heartbeat.
    pub fn task_status() -> Self {
        Self {
            reconnect_attempts: 3,
            reconnect_delay_ms: 2000,
            heartbeat_interval_ms: 0,
            ..Self::default()
        }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.reconnect_attempts,
            Duration::from_millis(self.reconnect_delay_ms),
            Duration::from_millis(self.max_reconnect_delay_ms),
        )
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            reconnect_attempts: Self::default_reconnect_attempts(),
            reconnect_delay_ms: Self::default_reconnect_delay_ms(),
            max_reconnect_delay_ms: Self::default_max_reconnect_delay_ms(),
            heartbeat_interval_ms: Self::default_heartbeat_interval_ms(),
            message_queue_size: Self::default_message_queue_size(),
        }
    }
}

/// Endpoint paths relative to `base_url`. `{note_id}` and `{task_id}` are substituted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub enhance: String,
    pub summary: String,
    pub ask: String,
    pub blog_sections: String,
    pub quiz_generate: String,
    pub task: String,
    pub task_status_ws: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            enhance: "/ollama/enhance/stream".to_string(),
            summary: "/ollama/summary/stream".to_string(),
            ask: "/ollama/ask".to_string(),
            blog_sections: "/blog/generate/sections/stream".to_string(),
            quiz_generate: "/notes/{note_id}/quiz/generate".to_string(),
            task: "/tasks/{task_id}".to_string(),
            task_status_ws: "/ws/task_status/{task_id}".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.csrf_header, "X-CSRF-Token");
        assert!(cfg.idle_timeout().is_none());
        assert_eq!(cfg.stream_retry.policy().max_attempts, 0);
        assert_eq!(cfg.websocket.message_queue_size, 100);
        assert_eq!(
            cfg.websocket.heartbeat_interval(),
            Some(Duration::from_secs(30))
        );
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_task_status_preset() {
        let ws = WebSocketConfig::task_status();
        let policy = ws.backoff_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(2000));
        assert!(ws.heartbeat_interval().is_none());
    }

    #[test]
    fn test_yaml_partial_overrides() {
        let cfg = ClientConfig::from_yaml_str(
            "base_url: https://notes.example.com/api/v1\nstream_retry:\n  enabled: true\n  max_retries: 5\nwebsocket:\n  message_queue_size: 10\nendpoints:\n  ask: /qa/stream\n",
        )
        .unwrap();
        assert_eq!(cfg.base_url, "https://notes.example.com/api/v1");
        assert_eq!(cfg.stream_retry.policy().max_attempts, 5);
        assert_eq!(cfg.websocket.message_queue_size, 10);
        assert_eq!(cfg.websocket.reconnect_attempts, 5);
        assert_eq!(cfg.endpoints.ask, "/qa/stream");
        assert_eq!(cfg.endpoints.enhance, "/ollama/enhance/stream");
    }

    #[test]
    fn test_url_join() {
        let cfg = ClientConfig::default().with_base_url("http://h:1/api/v1/");
        assert_eq!(cfg.url("/ollama/ask"), "http://h:1/api/v1/ollama/ask");
    }

    #[test]
    fn test_validate_rejects_bad_scheme() {
        let cfg = ClientConfig::default().with_base_url("ftp://files");
        assert!(matches!(cfg.validate(), Err(Error::Configuration { .. })));
        let cfg = ClientConfig::default().with_base_url("not a url");
        assert!(cfg.validate().is_err());
    }
}
