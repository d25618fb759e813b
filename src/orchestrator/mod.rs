//! 生成编排层：把流事件折叠成界面可绑定的状态。
//!
//! # Orchestrators
//!
//! One generic [`StreamOrchestrator`] covers every streamed generation; a
//! [`GenerationKind`] only picks the endpoint, the frame shape and the sections
//! that must complete. Quiz generation runs over a task WebSocket instead and
//! lives in [`quiz`].
//!
//! | Kind | Endpoint | Frames | Completes on |
//! |------|----------|--------|--------------|
//! | `Enhance` | `/ollama/enhance/stream` | flat | `done` |
//! | `Summary` | `/ollama/summary/stream` | flat | `done` (+ `summary_id`) |
//! | `Ask` | `/ollama/ask` | flat | `done` (`full_answer`) |
//! | `BlogSections` | `/blog/generate/sections/stream` | typed | `complete` or all sections done |
//!
//! State is published through a `tokio::sync::watch` channel: call
//! [`StreamOrchestrator::subscribe`] to observe `is_streaming`, `content`,
//! `sections`, `error` and `task_id` as they change.

pub mod quiz;

use crate::client::{SseStreamClient, StreamHandler, StreamOutcome, StreamRequest};
use crate::config::Endpoints;
use crate::pipeline::Pipeline;
use crate::session::Sections;
use crate::types::events::StreamEvent;
use crate::{Error, ErrorContext, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

pub use quiz::{GeneratedQuiz, QuizGenerator, QuizOutcome, QuizQuestion, QuizView};

/// Sections a multi-section blog generation must complete.
pub const BLOG_SECTIONS: [&str; 3] = ["heading", "description", "main"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GenerationKind {
    Enhance,
    Summary,
    Ask,
    BlogSections,
}

impl GenerationKind {
    pub fn endpoint<'a>(&self, endpoints: &'a Endpoints) -> &'a str {
        match self {
            GenerationKind::Enhance => &endpoints.enhance,
            GenerationKind::Summary => &endpoints.summary,
            GenerationKind::Ask => &endpoints.ask,
            GenerationKind::BlogSections => &endpoints.blog_sections,
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        match self {
            GenerationKind::BlogSections => Pipeline::sections(),
            _ => Pipeline::flat(),
        }
    }

    pub fn expected_sections(&self) -> &'static [&'static str] {
        match self {
            GenerationKind::BlogSections => &BLOG_SECTIONS,
            _ => &[],
        }
    }
}

impl fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GenerationKind::Enhance => "enhance",
            GenerationKind::Summary => "summary",
            GenerationKind::Ask => "ask",
            GenerationKind::BlogSections => "blog_sections",
        };
        f.write_str(s)
    }
}

/// Input of one generation.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationRequest {
    Enhance { note_id: i64 },
    Summary { note_id: i64 },
    Ask { note_id: i64, question: String },
    Blog { title: String, content: String },
}

impl GenerationRequest {
    pub fn kind(&self) -> GenerationKind {
        match self {
            GenerationRequest::Enhance { .. } => GenerationKind::Enhance,
            GenerationRequest::Summary { .. } => GenerationKind::Summary,
            GenerationRequest::Ask { .. } => GenerationKind::Ask,
            GenerationRequest::Blog { .. } => GenerationKind::BlogSections,
        }
    }

    pub fn body(&self) -> Value {
        match self {
            GenerationRequest::Enhance { note_id } | GenerationRequest::Summary { note_id } => {
                json!({ "note_id": note_id })
            }
            GenerationRequest::Ask { note_id, question } => {
                json!({ "note_id": note_id, "question_text": question })
            }
            GenerationRequest::Blog { title, content } => {
                json!({ "title": title, "content": content })
            }
        }
    }
}

/// UI-facing state of an orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerationView {
    pub is_streaming: bool,
    pub content: String,
    pub sections: Sections,
    pub error: Option<String>,
    pub task_id: Option<String>,
    /// Blog post id or saved summary id, once the server created one.
    pub entity_id: Option<String>,
    pub stage: Option<String>,
    /// Non-zero while an automatic reconnect is pending.
    pub reconnect_attempt: u32,
}

impl GenerationView {
    fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Started { task_id } => self.task_id = Some(task_id.clone()),
            StreamEvent::EntityCreated { entity_id } => self.entity_id = Some(entity_id.clone()),
            StreamEvent::SectionStarted { stage } => self.stage = Some(stage.clone()),
            StreamEvent::Chunk {
                section: None,
                text,
            } => {
                self.reconnect_attempt = 0;
                self.content.push_str(text);
            }
            StreamEvent::Chunk {
                section: Some(key),
                text,
            } => {
                self.reconnect_attempt = 0;
                self.sections.append(key, text);
            }
            StreamEvent::SectionComplete { section, text } => {
                self.sections.complete(section, text.clone());
            }
            StreamEvent::Completed { full_text, task_id } => {
                self.is_streaming = false;
                self.reconnect_attempt = 0;
                if !full_text.is_empty() || self.sections.is_empty() {
                    self.content = full_text.clone();
                }
                if task_id.is_some() {
                    self.task_id = task_id.clone();
                }
            }
            StreamEvent::Failed { message } => {
                self.is_streaming = false;
                self.reconnect_attempt = 0;
                self.error = Some(message.clone());
            }
            StreamEvent::Reconnecting { attempt, .. } => self.reconnect_attempt = *attempt,
        }
    }
}

/// Drives one kind of streamed generation and publishes its state.
///
/// Starting while a generation is in flight stops the previous one first, so two
/// streams never write into the same view.
pub struct StreamOrchestrator {
    kind: GenerationKind,
    client: SseStreamClient,
    endpoints: Endpoints,
    view: watch::Sender<GenerationView>,
    run: Arc<AtomicU64>,
}

impl StreamOrchestrator {
    pub fn new(kind: GenerationKind, client: SseStreamClient, endpoints: Endpoints) -> Self {
        let (view, _) = watch::channel(GenerationView::default());
        Self {
            kind,
            client,
            endpoints,
            view,
            run: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn kind(&self) -> GenerationKind {
        self.kind
    }

    pub fn subscribe(&self) -> watch::Receiver<GenerationView> {
        self.view.subscribe()
    }

    /// Snapshot of the current state.
    pub fn view(&self) -> GenerationView {
        self.view.borrow().clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.view.borrow().is_streaming
    }

    pub async fn start(&self, request: GenerationRequest) -> Result<StreamOutcome> {
        self.start_with(request, &mut |_: StreamEvent| {}).await
    }

    /// Like [`start`](Self::start), also forwarding every event to `observer`.
    pub async fn start_with<H>(
        &self,
        request: GenerationRequest,
        observer: &mut H,
    ) -> Result<StreamOutcome>
    where
        H: StreamHandler + ?Sized,
    {
        let kind = request.kind();
        if kind != self.kind {
            return Err(Error::validation_with_context(
                format!("{kind} request sent to {} orchestrator", self.kind),
                ErrorContext::new().with_source("stream_orchestrator"),
            ));
        }

        if self.client.stop() {
            info!(kind = %self.kind, "stopping previous generation");
        }
        let run = self.run.fetch_add(1, Ordering::SeqCst) + 1;
        self.view.send_replace(GenerationView {
            is_streaming: true,
            ..GenerationView::default()
        });

        let stream_request = StreamRequest::new(
            self.kind.endpoint(&self.endpoints),
            request.body(),
            self.kind.pipeline(),
        )
        .with_expected_sections(self.kind.expected_sections().iter().copied());

        let view = &self.view;
        let current = &self.run;
        let mut handler = |event: StreamEvent| {
            if current.load(Ordering::SeqCst) != run {
                return;
            }
            view.send_modify(|v| v.apply(&event));
            observer.on_event(event);
        };

        let result = self.client.start(stream_request, &mut handler).await;

        if self.run.load(Ordering::SeqCst) == run {
            self.view.send_modify(|v| {
                v.is_streaming = false;
                if let Err(e) = &result {
                    v.error = Some(e.to_string());
                }
            });
        } else {
            debug!(kind = %self.kind, "superseded generation finished");
        }
        result
    }

    /// Stop the current generation. Safe in any state; streamed content is kept.
    pub fn stop(&self) {
        self.run.fetch_add(1, Ordering::SeqCst);
        self.client.stop();
        self.view.send_if_modified(|v| {
            let was = v.is_streaming;
            v.is_streaming = false;
            v.reconnect_attempt = 0;
            was
        });
    }

    /// Stop and reset all state.
    pub fn clear(&self) {
        self.stop();
        self.view.send_replace(GenerationView::default());
    }
}
