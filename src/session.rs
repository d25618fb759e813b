//! Stream session state and its reducer.
//!
//! A [`StreamSession`] is a plain value: every transition goes through
//! [`StreamSession::apply`] (or the free function [`reduce`]), so the whole
//! protocol can be exercised without a socket.

use crate::types::events::ProtocolEvent;
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lifecycle of one streaming operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Streaming)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Streaming => "streaming",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
            SessionState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A named partial buffer of a multi-part generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Section {
    pub content: String,
    pub complete: bool,
}

/// Sections in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Sections {
    entries: Vec<(String, Section)>,
}

impl Sections {
    pub fn get(&self, key: &str) -> Option<&Section> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, s)| s)
    }

    fn entry(&mut self, key: &str) -> &mut Section {
        let idx = match self.entries.iter().position(|(k, _)| k == key) {
            Some(i) => i,
            None => {
                self.entries.push((key.to_string(), Section::default()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[idx].1
    }

    /// Mirror a streamed chunk. Completed sections are left untouched.
    pub(crate) fn append(&mut self, key: &str, text: &str) {
        let section = self.entry(key);
        if !section.complete {
            section.content.push_str(text);
        }
    }

    /// Mirror a completion whose text has already been through the tie-break.
    pub(crate) fn complete(&mut self, key: &str, text: String) {
        let section = self.entry(key);
        section.content = text;
        section.complete = true;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Section)> {
        self.entries.iter().map(|(k, s)| (k.as_str(), s))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when every key in `expected` is present and complete.
    pub fn all_complete(&self, expected: &[String]) -> bool {
        expected
            .iter()
            .all(|k| self.get(k).map(|s| s.complete).unwrap_or(false))
    }
}

/// One in-flight or finished streaming operation. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct StreamSession {
    session_id: String,
    backend_task_id: Option<String>,
    entity_id: Option<String>,
    state: SessionState,
    accumulated_text: String,
    final_text: Option<String>,
    sections: Sections,
    expected_sections: Vec<String>,
    current_stage: Option<String>,
    last_error: Option<String>,
    events_applied: u64,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSession {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            backend_task_id: None,
            entity_id: None,
            state: SessionState::Idle,
            accumulated_text: String::new(),
            final_text: None,
            sections: Sections::default(),
            expected_sections: Vec::new(),
            current_stage: None,
            last_error: None,
            events_applied: 0,
        }
    }

    /// A session that completes on its own once all of `keys` are complete.
    pub fn with_expected_sections<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected_sections = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn backend_task_id(&self) -> Option<&str> {
        self.backend_task_id.as_deref()
    }

    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }

    /// Authoritative text: the server's declared full text if it sent one,
    /// otherwise what was accumulated locally.
    pub fn full_text(&self) -> &str {
        self.final_text.as_deref().unwrap_or(&self.accumulated_text)
    }

    pub fn sections(&self) -> &Sections {
        &self.sections
    }

    pub fn expected_sections(&self) -> &[String] {
        &self.expected_sections
    }

    pub fn current_stage(&self) -> Option<&str> {
        self.current_stage.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Number of protocol events that mutated this session.
    pub fn events_applied(&self) -> u64 {
        self.events_applied
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn mark_connecting(&mut self) {
        if !self.is_terminal() {
            self.state = SessionState::Connecting;
        }
    }

    pub fn mark_streaming(&mut self) {
        if !self.is_terminal() {
            self.state = SessionState::Streaming;
        }
    }

    /// Explicit stop. Not a failure; a finished session stays as it was.
    pub fn cancel(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.state = SessionState::Cancelled;
        true
    }

    /// Transport-level failure surfaced to the caller. Partial content is kept.
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.last_error = Some(message.into());
        self.state = SessionState::Failed;
        true
    }

    /// Apply one event in wire order. Returns `false` if the event was ignored
    /// (session already terminal, or a chunk for a section that already finished).
    pub fn apply(&mut self, event: &ProtocolEvent) -> bool {
        if self.is_terminal() {
            debug!(session_id = %self.session_id, ?event, "event after terminal state ignored");
            return false;
        }
        if self.state != SessionState::Streaming {
            self.state = SessionState::Streaming;
        }

        match event {
            ProtocolEvent::TaskStarted { task_id } => {
                if self.backend_task_id.is_none() {
                    self.backend_task_id = Some(task_id.clone());
                }
            }
            ProtocolEvent::Chunk {
                section_key: None,
                text,
            } => self.accumulated_text.push_str(text),
            ProtocolEvent::Chunk {
                section_key: Some(key),
                text,
            } => {
                let section = self.sections.entry(key);
                if section.complete {
                    warn!(
                        section = key.as_str(),
                        "chunk for completed section ignored"
                    );
                    return false;
                }
                section.content.push_str(text);
            }
            ProtocolEvent::SectionStarted { stage } => {
                self.current_stage = Some(stage.clone());
            }
            ProtocolEvent::SectionComplete {
                section_key,
                final_text,
            } => {
                let section = self.sections.entry(section_key);
                // A completion payload can race chunk delivery and arrive truncated:
                // keep the longer copy.
                if final_text.chars().count() >= section.content.chars().count() {
                    section.content = final_text.clone();
                } else {
                    debug!(
                        section = section_key.as_str(),
                        "completion payload shorter than streamed content, keeping streamed"
                    );
                }
                section.complete = true;

                if !self.expected_sections.is_empty()
                    && self.sections.all_complete(&self.expected_sections)
                {
                    self.state = SessionState::Completed;
                }
            }
            ProtocolEvent::EntityCreated { entity_id } => {
                self.entity_id = Some(entity_id.clone());
            }
            ProtocolEvent::Done { full_text } => {
                if let Some(text) = full_text.as_ref().filter(|t| !t.is_empty()) {
                    self.final_text = Some(text.clone());
                }
                self.state = SessionState::Completed;
            }
            ProtocolEvent::Error { message } => {
                self.last_error = Some(message.clone());
                self.state = SessionState::Failed;
            }
        }

        self.events_applied += 1;
        true
    }
}

/// Pure reducer form of [`StreamSession::apply`].
pub fn reduce(session: StreamSession, event: &ProtocolEvent) -> StreamSession {
    let mut next = session;
    next.apply(event);
    next
}
