//! 弹性模式模块：SSE 客户端与 WebSocket 监视器共用的重连退避策略。
//!
//! # Resilience Primitives
//!
//! One exponential-backoff policy shared by the SSE stream client and the
//! WebSocket task monitor, so both layers reconnect on the same schedule:
//!
//! ```text
//! delay(attempt) = min(base_delay * 2^(attempt - 1), max_delay)     attempt = 1..=max_attempts
//! ```
//!
//! ```rust
//! use notes_stream::resilience::backoff::{Backoff, BackoffPolicy};
//! use std::time::Duration;
//!
//! let policy = BackoffPolicy::new(5, Duration::from_millis(1000), Duration::from_millis(30_000));
//! let mut backoff = Backoff::new(policy);
//! assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1000)));
//! assert_eq!(backoff.next_delay(), Some(Duration::from_millis(2000)));
//! ```

pub mod backoff;

pub use backoff::{Backoff, BackoffPolicy};
