//! Streaming events decoded from the wire and delivered to handlers

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A decoded unit from a streaming endpoint.
///
/// Exactly one terminal event (`Done` or `Error`) is expected per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum ProtocolEvent {
    /// The server acknowledged the request and assigned a background task id.
    TaskStarted { task_id: String },

    /// Incremental text. `section_key` is set for multi-section generations.
    Chunk {
        #[serde(skip_serializing_if = "Option::is_none")]
        section_key: Option<String>,
        text: String,
    },

    /// A multi-section stream began producing the named stage.
    SectionStarted { stage: String },

    /// A named section finished with the server's copy of its text.
    SectionComplete {
        section_key: String,
        final_text: String,
    },

    /// The server persisted an entity (blog post id, summary id).
    EntityCreated { entity_id: String },

    /// Terminal success, optionally with the authoritative full text.
    Done {
        #[serde(skip_serializing_if = "Option::is_none")]
        full_text: Option<String>,
    },

    /// Terminal in-band failure.
    Error { message: String },
}

impl ProtocolEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProtocolEvent::Done { .. } | ProtocolEvent::Error { .. }
        )
    }
}

/// The single tagged-union event channel a stream client feeds.
///
/// Replaces a bag of optional callbacks: a handler matches on this enum and cannot
/// silently forget the error arm.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Started { task_id: String },
    EntityCreated { entity_id: String },
    SectionStarted { stage: String },
    Chunk {
        section: Option<String>,
        text: String,
    },
    SectionComplete { section: String, text: String },
    /// `full_text` is the server-declared text when present, else the local buffer.
    Completed {
        full_text: String,
        task_id: Option<String>,
    },
    Failed { message: String },
    /// Transport failed before any output; the client will reopen after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::Completed { .. } | StreamEvent::Failed { .. }
        )
    }
}
