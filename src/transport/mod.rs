//! HTTP transport and the opaque credential collaborator.

pub mod credentials;
pub mod http;

pub use credentials::{CookieJar, Credentials, NoCredentials, StaticCsrf};
pub use http::HttpTransport;

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Stream idle for {0:?}")]
    IdleTimeout(Duration),

    #[error("Stream ended before a terminal frame")]
    UnexpectedEof,

    #[error("Transport error: {0}")]
    Other(String),
}
