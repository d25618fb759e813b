//! 流水线处理模块：把原始字节流解码为协议事件。
//!
//! # Pipeline Layer
//!
//! Turns the raw body of a streaming response into typed [`ProtocolEvent`]s.
//!
//! ```text
//! Raw Bytes → ChunkParser → JSON payload → EventMapper → ProtocolEvent
//!     │            │              │               │
//!   HTTP     line framing,    serde_json    flat / section
//!            `data: ` strip                  frame shapes
//! ```
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`decode::ChunkParser`] | Byte buffer → complete `data: ` payloads |
//! | [`EventMapper`] | JSON payload → zero or more protocol events |
//! | [`EventDecoder`] | Parser + mapper, synchronous |
//! | [`Pipeline`] | Lazy `Stream` adapter over a byte stream |
//!
//! Malformed frames never abort a stream: they are logged and skipped.

pub mod decode;
pub mod event_map;

use crate::types::events::ProtocolEvent;
use crate::{BoxStream, PipeResult};
use bytes::Bytes;
use futures::{stream, StreamExt};
use std::sync::Arc;
use tracing::warn;

pub use decode::ChunkParser;
pub use event_map::{EventMapper, FlatEventMapper, SectionEventMapper};

/// Frame-level failures. These are logged and the offending frame is skipped.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed frame ({reason}): {payload}")]
    MalformedFrame { payload: String, reason: String },

    #[error("Unexpected frame: {0}")]
    Unexpected(String),
}

/// Synchronous chunk-to-event decoder: carries partial frames across calls.
pub struct EventDecoder {
    parser: ChunkParser,
    mapper: Arc<dyn EventMapper>,
}

impl EventDecoder {
    pub fn new(mapper: Arc<dyn EventMapper>) -> Self {
        Self {
            parser: ChunkParser::new(),
            mapper,
        }
    }

    /// Feed one transport chunk; returns every event completed by it, in wire order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<ProtocolEvent> {
        let payloads = self.parser.push(bytes);
        self.map_payloads(payloads)
    }

    /// Flush a trailing frame that was not newline-terminated at EOF.
    pub fn finish(&mut self) -> Vec<ProtocolEvent> {
        let payloads: Vec<String> = self.parser.finish().into_iter().collect();
        self.map_payloads(payloads)
    }

    fn map_payloads(&self, payloads: Vec<String>) -> Vec<ProtocolEvent> {
        let mut events = Vec::new();
        for payload in payloads {
            match self.mapper.map_payload(&payload) {
                Ok(mut evs) => events.append(&mut evs),
                Err(e) => warn!(error = %e, "skipping stream frame"),
            }
        }
        events
    }
}

/// Stream adapter: bytes in, protocol events out.
#[derive(Clone)]
pub struct Pipeline {
    mapper: Arc<dyn EventMapper>,
}

impl Pipeline {
    pub fn new(mapper: Arc<dyn EventMapper>) -> Self {
        Self { mapper }
    }

    /// Pipeline for `task_id` / `chunk` / `done` endpoints.
    pub fn flat() -> Self {
        Self::new(Arc::new(FlatEventMapper))
    }

    /// Pipeline for `type`-discriminated multi-section endpoints.
    pub fn sections() -> Self {
        Self::new(Arc::new(SectionEventMapper))
    }

    pub fn decoder(&self) -> EventDecoder {
        EventDecoder::new(self.mapper.clone())
    }

    /// Decode a byte stream lazily.
    ///
    /// The returned stream is finite and not restartable: it ends after the first
    /// terminal event (remaining input is not read), at EOF, or after yielding a
    /// transport error.
    pub fn process_stream(
        &self,
        input: BoxStream<'static, Bytes>,
    ) -> BoxStream<'static, ProtocolEvent> {
        struct State {
            input: BoxStream<'static, Bytes>,
            decoder: EventDecoder,
            pending: std::collections::VecDeque<ProtocolEvent>,
            finished: bool,
        }

        let state = State {
            input,
            decoder: self.decoder(),
            pending: Default::default(),
            finished: false,
        };

        let stream = stream::unfold(state, |mut st| async move {
            loop {
                if let Some(ev) = st.pending.pop_front() {
                    if ev.is_terminal() {
                        st.pending.clear();
                        st.finished = true;
                    }
                    return Some((Ok(ev), st));
                }
                if st.finished {
                    return None;
                }

                match st.input.next().await {
                    Some(Ok(bytes)) => {
                        st.pending.extend(st.decoder.push(&bytes));
                    }
                    Some(Err(e)) => {
                        st.finished = true;
                        return Some((Err(e), st));
                    }
                    None => {
                        st.finished = true;
                        st.pending.extend(st.decoder.finish());
                    }
                }
            }
        });

        Box::pin(stream)
    }
}

/// Convenience for callers holding a result stream.
pub type EventStream = BoxStream<'static, ProtocolEvent>;

/// Drain a decoded stream into a vector (tests and simple callers).
pub async fn collect_events(mut events: EventStream) -> PipeResult<Vec<ProtocolEvent>> {
    let mut out = Vec::new();
    while let Some(ev) = events.next().await {
        out.push(ev?);
    }
    Ok(out)
}
