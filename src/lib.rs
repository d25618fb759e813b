//! # notes-stream
//!
//! 笔记 / 博客 / 测验 AI 后端的流式与任务编排运行时。
//!
//! Streaming and task-orchestration runtime for the notes, blog and quiz AI backend:
//! incrementally delivered generations over `data: `-framed HTTP responses, and
//! background tasks followed over a reconnecting WebSocket.
//!
//! ## Overview
//!
//! ```text
//! network ─▶ ChunkParser ─▶ EventMapper ─▶ StreamSession (reducer) ─▶ StreamEvent ─▶ Orchestrator view
//!                                                    ▲
//!                          BackoffPolicy ────────────┘ (transport failures before any output)
//!
//! task WebSocket ─▶ TaskMonitor ─▶ TaskStatusMessage ─▶ QuizGenerator view
//! ```
//!
//! - **One event channel**: a stream client reports through a single
//!   [`StreamEvent`] handler instead of a set of optional callbacks.
//! - **Explicit session state**: every transition goes through
//!   [`session::StreamSession::apply`], testable without a socket.
//! - **Shared backoff**: the stream client and the task monitor reconnect on the
//!   same [`resilience::BackoffPolicy`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use notes_stream::orchestrator::{GenerationKind, GenerationRequest, StreamOrchestrator};
//! use notes_stream::{ClientConfig, HttpTransport, SseStreamClient, StaticCsrf};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> notes_stream::Result<()> {
//!     let config = ClientConfig::from_env()?;
//!     let transport = Arc::new(HttpTransport::new(&config, Arc::new(StaticCsrf("token".into())))?);
//!     let client = SseStreamClient::new(transport).with_retry(config.stream_retry.policy());
//!
//!     let enhance = StreamOrchestrator::new(GenerationKind::Enhance, client, config.endpoints.clone());
//!     let outcome = enhance.start(GenerationRequest::Enhance { note_id: 42 }).await?;
//!     println!("{}", outcome.session().full_text());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`pipeline`] | Byte stream → `data: ` frames → protocol events |
//! | [`session`] | Stream session value and reducer |
//! | [`client`] | Stream client: connect, decode, dispatch, stop, retry |
//! | [`ws`] | Task-status WebSocket monitor |
//! | [`orchestrator`] | Per-generation state for UI binding, quiz generation |
//! | [`resilience`] | Shared exponential backoff |
//! | [`transport`] | HTTP transport and credentials |
//! | [`api`] | JSON envelope endpoints (quiz request, task lookup) |
//! | [`config`] | Defaults, YAML file and environment overrides |

pub mod api;
pub mod client;
pub mod config;
pub mod orchestrator;
pub mod pipeline;
pub mod resilience;
pub mod session;
pub mod transport;
pub mod types;
pub mod ws;

// Re-export main types for convenience
pub use client::{SseStreamClient, StreamHandler, StreamOutcome, StreamRequest};
pub use config::ClientConfig;
pub use orchestrator::{GenerationKind, GenerationRequest, QuizGenerator, StreamOrchestrator};
pub use session::{SessionState, StreamSession};
pub use transport::{CookieJar, Credentials, HttpTransport, NoCredentials, StaticCsrf};
pub use types::{ProtocolEvent, StreamEvent};
pub use ws::{MonitorEvent, TaskMonitor};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A specialized Result for pipeline operations
pub type PipeResult<T> = std::result::Result<T, Error>;

/// A unified pinned, boxed stream that emits `PipeResult<T>`
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = PipeResult<T>> + Send + 'a>>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
