//! Stream client for `data: `-framed HTTP responses.
//!
//! One [`SseStreamClient`] owns at most one request at a time. It opens the
//! transport, decodes frames through a [`Pipeline`](crate::pipeline::Pipeline),
//! folds them into a [`StreamSession`](crate::session::StreamSession) and forwards a
//! single [`StreamEvent`](crate::types::StreamEvent) channel to the caller.

pub mod sse;

pub use sse::{SseStreamClient, StreamHandler, StreamOutcome, StreamRequest};
