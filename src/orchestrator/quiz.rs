//! Quiz generation: queue a background task, then follow it over the task WebSocket.
//!
//! Two retry layers compose with a fixed bound. Each generation attempt owns one
//! monitor with its own reconnect budget; a monitor that exhausts that budget
//! costs one generation attempt. With the defaults this is at most
//! 3 × (1 + 3) = 12 connection attempts.

use crate::api::ApiClient;
use crate::config::{ClientConfig, WebSocketConfig};
use crate::ws::{watch_task, TaskMonitor, TaskStatusMessage};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuizQuestion {
    pub question_id: String,
    pub question: String,
    /// Letter → option text.
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedQuiz {
    pub quiz_id: String,
    pub questions: Vec<QuizQuestion>,
    pub total: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawOptions {
    Map(BTreeMap<String, String>),
    List(Vec<String>),
}

#[derive(Deserialize)]
struct RawQuestion {
    #[serde(alias = "id")]
    question_id: Value,
    #[serde(alias = "question_text")]
    question: String,
    options: RawOptions,
}

#[derive(Deserialize)]
struct RawQuiz {
    quiz_id: Value,
    questions: Vec<RawQuestion>,
    #[serde(default)]
    total: Option<Value>,
}

fn scalar_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `"A. text"` entries keyed by their leading letter.
fn options_from_list(items: Vec<String>) -> BTreeMap<String, String> {
    items
        .into_iter()
        .filter_map(|opt| {
            let letter = opt.chars().next()?;
            let text: String = opt.chars().skip(3).collect();
            Some((letter.to_string(), text))
        })
        .collect()
}

impl GeneratedQuiz {
    /// Parse a `SUCCESS` task result. Options may be a letter map or `"A. text"` list.
    pub fn from_result(result: &Value) -> Result<Self> {
        let raw: RawQuiz = serde_json::from_value(result.clone())?;
        let questions: Vec<QuizQuestion> = raw
            .questions
            .into_iter()
            .map(|q| QuizQuestion {
                question_id: scalar_to_string(&q.question_id),
                question: q.question,
                options: match q.options {
                    RawOptions::Map(m) => m,
                    RawOptions::List(l) => options_from_list(l),
                },
            })
            .collect();
        let total = raw
            .total
            .as_ref()
            .map(scalar_to_string)
            .unwrap_or_else(|| questions.len().to_string());
        Ok(Self {
            quiz_id: scalar_to_string(&raw.quiz_id),
            questions,
            total,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QuizOutcome {
    Generated(GeneratedQuiz),
    Failed(String),
    Cancelled,
}

/// UI-facing state of a quiz generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuizView {
    pub is_generating: bool,
    pub attempt: u32,
    pub max_attempts: u32,
    pub task_id: Option<String>,
    pub progress: Option<u8>,
    pub status: Option<String>,
    pub error: Option<String>,
    pub quiz: Option<GeneratedQuiz>,
}

pub struct QuizGenerator {
    api: Arc<ApiClient>,
    config: ClientConfig,
    websocket: WebSocketConfig,
    max_attempts: u32,
    retry_delay: Duration,
    view: watch::Sender<QuizView>,
    token: Mutex<Option<CancellationToken>>,
}

impl QuizGenerator {
    pub fn new(api: Arc<ApiClient>, config: ClientConfig) -> Self {
        let (view, _) = watch::channel(QuizView::default());
        Self {
            api,
            config,
            websocket: WebSocketConfig::task_status(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            view,
            token: Mutex::new(None),
        }
    }

    pub fn with_attempts(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_websocket(mut self, websocket: WebSocketConfig) -> Self {
        self.websocket = websocket;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<QuizView> {
        self.view.subscribe()
    }

    pub fn view(&self) -> QuizView {
        self.view.borrow().clone()
    }

    fn final_failure_message(&self) -> String {
        format!(
            "Failed to generate quiz after {} attempts. Please try again.",
            self.max_attempts
        )
    }

    /// Generate a quiz for `note_id`, regenerating on failure.
    ///
    /// A generation already in flight on this instance is stopped first.
    pub async fn generate(&self, note_id: &str) -> QuizOutcome {
        let token = CancellationToken::new();
        if let Some(prev) = self.swap_token(Some(token.clone())) {
            prev.cancel();
        }

        self.view.send_replace(QuizView {
            is_generating: true,
            max_attempts: self.max_attempts,
            ..QuizView::default()
        });

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.publish(&token, |v| {
                v.attempt = attempt;
                v.task_id = None;
                v.progress = None;
            });

            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return QuizOutcome::Cancelled,
                r = self.attempt_once(&token, note_id) => r,
            };

            match result {
                Ok(quiz) => {
                    info!(
                        note_id,
                        attempt,
                        quiz_id = quiz.quiz_id.as_str(),
                        "quiz generated"
                    );
                    self.publish(&token, |v| {
                        v.is_generating = false;
                        v.progress = Some(100);
                        v.error = None;
                        v.quiz = Some(quiz.clone());
                    });
                    return QuizOutcome::Generated(quiz);
                }
                Err(message) if attempt < self.max_attempts => {
                    warn!(
                        note_id,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = message.as_str(),
                        "quiz generation failed, retrying"
                    );
                    self.publish(&token, |v| v.error = Some(message.clone()));
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return QuizOutcome::Cancelled,
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
                Err(message) => {
                    warn!(
                        note_id,
                        attempt,
                        error = message.as_str(),
                        "quiz generation gave up"
                    );
                    let final_message = self.final_failure_message();
                    self.publish(&token, |v| {
                        v.is_generating = false;
                        v.error = Some(final_message.clone());
                    });
                    return QuizOutcome::Failed(final_message);
                }
            }
        }
    }

    /// One generation request plus one task monitor. Errors are user-facing messages.
    async fn attempt_once(
        &self,
        token: &CancellationToken,
        note_id: &str,
    ) -> std::result::Result<GeneratedQuiz, String> {
        let handle = self.api.generate_quiz(note_id).await.map_err(|e| {
            warn!(note_id, error = %e, "quiz generation request failed");
            "Failed to start quiz generation".to_string()
        })?;
        self.publish(token, |v| v.task_id = Some(handle.task_id.clone()));

        let (monitor, mut events) =
            TaskMonitor::task_status_with(&self.config, &handle.task_id, self.websocket.clone())
                .map_err(|e| e.to_string())?;

        let result = watch_task(&monitor, &mut events, |msg: &TaskStatusMessage| {
            self.publish(token, |v| {
                if let Some(p) = msg.progress() {
                    v.progress = Some(p);
                }
                if msg.status.is_some() {
                    v.status = msg.status.clone();
                }
            });
        })
        .await;

        match result {
            Ok(value) => GeneratedQuiz::from_result(&value)
                .map_err(|e| format!("Generation failed: invalid quiz payload ({})", e)),
            Err(Error::TaskFailed(message)) => Err(message),
            Err(Error::ReconnectExhausted { .. }) | Err(Error::WebSocket(_)) => {
                Err("WebSocket connection failed".to_string())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    fn publish<F: FnOnce(&mut QuizView)>(&self, token: &CancellationToken, f: F) {
        if token.is_cancelled() {
            return;
        }
        self.view.send_modify(f);
    }

    fn swap_token(&self, next: Option<CancellationToken>) -> Option<CancellationToken> {
        let mut slot = self.token.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *slot, next)
    }

    /// Stop the current generation. Safe in any state.
    pub fn stop(&self) {
        if let Some(token) = self.swap_token(None) {
            token.cancel();
        }
        self.view.send_if_modified(|v| {
            let was = v.is_generating;
            v.is_generating = false;
            v.error = None;
            was
        });
    }

    /// Stop any generation and reset the view to its initial state.
    pub fn clear(&self) {
        if let Some(token) = self.swap_token(None) {
            token.cancel();
        }
        self.view.send_replace(QuizView::default());
    }
}
