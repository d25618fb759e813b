use crate::pipeline::Pipeline;
use crate::resilience::{Backoff, BackoffPolicy};
use crate::session::{SessionState, StreamSession};
use crate::transport::{HttpTransport, TransportError};
use crate::types::events::{ProtocolEvent, StreamEvent};
use crate::{Error, Result};
use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Receives every [`StreamEvent`] of one session, in wire order.
pub trait StreamHandler: Send {
    fn on_event(&mut self, event: StreamEvent);
}

impl<F> StreamHandler for F
where
    F: FnMut(StreamEvent) + Send,
{
    fn on_event(&mut self, event: StreamEvent) {
        self(event)
    }
}

/// What to open: endpoint path, JSON body, and how its frames are shaped.
#[derive(Clone)]
pub struct StreamRequest {
    pub path: String,
    pub body: serde_json::Value,
    pub pipeline: Pipeline,
    /// Section keys whose completion ends the session without a `complete` frame.
    pub expected_sections: Vec<String>,
}

impl StreamRequest {
    pub fn new(path: impl Into<String>, body: serde_json::Value, pipeline: Pipeline) -> Self {
        Self {
            path: path.into(),
            body,
            pipeline,
            expected_sections: Vec::new(),
        }
    }

    pub fn with_expected_sections<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected_sections = keys.into_iter().map(Into::into).collect();
        self
    }
}

/// How a session ended. Cancellation is an outcome, not an error.
#[derive(Debug, Clone)]
pub enum StreamOutcome {
    Completed(StreamSession),
    Failed(StreamSession),
    Cancelled(StreamSession),
}

impl StreamOutcome {
    pub fn session(&self) -> &StreamSession {
        match self {
            StreamOutcome::Completed(s)
            | StreamOutcome::Failed(s)
            | StreamOutcome::Cancelled(s) => s,
        }
    }

    pub fn into_session(self) -> StreamSession {
        match self {
            StreamOutcome::Completed(s)
            | StreamOutcome::Failed(s)
            | StreamOutcome::Cancelled(s) => s,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StreamOutcome::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StreamOutcome::Cancelled(_))
    }
}

#[derive(Debug)]
struct Control {
    state: SessionState,
    token: Option<CancellationToken>,
}

/// Drives one streaming request at a time.
///
/// Cloning yields another handle to the same client, so `stop()` can be called from
/// a different task than the one awaiting `start()`. The client holds no
/// application state beyond the lifecycle of the current request.
#[derive(Clone)]
pub struct SseStreamClient {
    transport: Arc<HttpTransport>,
    retry: BackoffPolicy,
    control: Arc<Mutex<Control>>,
}

impl SseStreamClient {
    pub fn new(transport: Arc<HttpTransport>) -> Self {
        Self {
            transport,
            retry: BackoffPolicy::disabled(),
            control: Arc::new(Mutex::new(Control {
                state: SessionState::Idle,
                token: None,
            })),
        }
    }

    /// Enable auto-reconnect for transport failures that happen before any event
    /// has been delivered.
    pub fn with_retry(mut self, policy: BackoffPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn is_streaming(&self) -> bool {
        self.state().is_active()
    }

    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn begin(&self) -> Result<CancellationToken> {
        let mut ctl = self.lock();
        if ctl.state.is_active() {
            return Err(Error::AlreadyStreaming);
        }
        let token = CancellationToken::new();
        ctl.state = SessionState::Connecting;
        ctl.token = Some(token.clone());
        Ok(token)
    }

    /// Move to `state` unless this run was stopped in the meantime.
    fn transition(&self, token: &CancellationToken, state: SessionState) {
        let mut ctl = self.lock();
        if token.is_cancelled() {
            return;
        }
        ctl.state = state;
        if state.is_terminal() {
            ctl.token = None;
        }
    }

    /// Cancel the in-flight request, if any.
    ///
    /// Returns `false` (and changes nothing) when no request is active. Once this
    /// returns, the handler passed to [`start`](Self::start) receives no further events.
    pub fn stop(&self) -> bool {
        let mut ctl = self.lock();
        if !ctl.state.is_active() {
            return false;
        }
        if let Some(token) = ctl.token.take() {
            token.cancel();
        }
        ctl.state = SessionState::Cancelled;
        info!("stream stopped by caller");
        true
    }

    /// Run one request to its end, dispatching events to `handler` inline.
    ///
    /// Fails fast with [`Error::AlreadyStreaming`] if another request is active on
    /// this client. Every other failure is delivered as [`StreamEvent::Failed`] and
    /// reflected in the returned [`StreamOutcome`].
    pub async fn start<H>(&self, request: StreamRequest, handler: &mut H) -> Result<StreamOutcome>
    where
        H: StreamHandler + ?Sized,
    {
        let token = self.begin()?;
        let mut session =
            StreamSession::new().with_expected_sections(request.expected_sections.clone());
        session.mark_connecting();

        let mut backoff = Backoff::new(self.retry);
        let mut delivered = false;

        info!(
            session_id = session.session_id(),
            endpoint = request.path.as_str(),
            "opening stream"
        );

        loop {
            let opened = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(self.cancelled(session)),
                r = self.transport.open_stream(&request.path, &request.body) => r,
            };

            let failure = match opened {
                Ok(bytes) => {
                    session.mark_streaming();
                    self.transition(&token, SessionState::Streaming);

                    let mut events = request.pipeline.process_stream(bytes);
                    loop {
                        let next = tokio::select! {
                            biased;
                            _ = token.cancelled() => return Ok(self.cancelled(session)),
                            n = events.next() => n,
                        };
                        match next {
                            Some(Ok(event)) => {
                                if token.is_cancelled() {
                                    return Ok(self.cancelled(session));
                                }
                                if let Some(outcome) = self.deliver(
                                    &token,
                                    &mut session,
                                    &event,
                                    handler,
                                    &mut delivered,
                                ) {
                                    return Ok(outcome);
                                }
                            }
                            Some(Err(e)) => break e,
                            None => break Error::Transport(TransportError::UnexpectedEof),
                        }
                    }
                }
                Err(e) => e,
            };

            if token.is_cancelled() {
                return Ok(self.cancelled(session));
            }

            if !delivered && failure.is_transient() {
                if let Some(delay) = backoff.next_delay() {
                    let attempt = backoff.attempt();
                    warn!(
                        session_id = session.session_id(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "stream failed before output, reconnecting"
                    );
                    handler.on_event(StreamEvent::Reconnecting { attempt, delay });
                    session.mark_connecting();
                    self.transition(&token, SessionState::Connecting);
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Ok(self.cancelled(session)),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            }

            let message = failure.to_string();
            warn!(session_id = session.session_id(), error = %message, "stream failed");
            session.fail(message.clone());
            self.transition(&token, SessionState::Failed);
            handler.on_event(StreamEvent::Failed { message });
            return Ok(StreamOutcome::Failed(session));
        }
    }

    /// Apply one event and forward it. Returns the outcome once the session is terminal.
    fn deliver<H>(
        &self,
        token: &CancellationToken,
        session: &mut StreamSession,
        event: &ProtocolEvent,
        handler: &mut H,
        delivered: &mut bool,
    ) -> Option<StreamOutcome>
    where
        H: StreamHandler + ?Sized,
    {
        let first_task_id = matches!(event, ProtocolEvent::TaskStarted { .. })
            && session.backend_task_id().is_none();
        if !session.apply(event) {
            return None;
        }
        *delivered = true;
        debug!(session_id = session.session_id(), ?event, "stream event");

        let forwarded = match event {
            ProtocolEvent::TaskStarted { task_id } => first_task_id.then(|| StreamEvent::Started {
                task_id: task_id.clone(),
            }),
            ProtocolEvent::Chunk { section_key, text } => Some(StreamEvent::Chunk {
                section: section_key.clone(),
                text: text.clone(),
            }),
            ProtocolEvent::SectionStarted { stage } => Some(StreamEvent::SectionStarted {
                stage: stage.clone(),
            }),
            ProtocolEvent::SectionComplete { section_key, .. } => {
                let text = session
                    .sections()
                    .get(section_key)
                    .map(|s| s.content.clone())
                    .unwrap_or_default();
                Some(StreamEvent::SectionComplete {
                    section: section_key.clone(),
                    text,
                })
            }
            ProtocolEvent::EntityCreated { entity_id } => Some(StreamEvent::EntityCreated {
                entity_id: entity_id.clone(),
            }),
            ProtocolEvent::Done { .. } | ProtocolEvent::Error { .. } => None,
        };

        if let Some(ev) = forwarded {
            if token.is_cancelled() {
                return Some(self.cancelled(session.clone()));
            }
            handler.on_event(ev);
        }

        match session.state() {
            SessionState::Completed => {
                self.transition(token, SessionState::Completed);
                if token.is_cancelled() {
                    return Some(self.cancelled(session.clone()));
                }
                info!(
                    session_id = session.session_id(),
                    task_id = session.backend_task_id().unwrap_or(""),
                    "stream completed"
                );
                handler.on_event(StreamEvent::Completed {
                    full_text: session.full_text().to_string(),
                    task_id: session.backend_task_id().map(str::to_string),
                });
                Some(StreamOutcome::Completed(session.clone()))
            }
            SessionState::Failed => {
                self.transition(token, SessionState::Failed);
                if token.is_cancelled() {
                    return Some(self.cancelled(session.clone()));
                }
                let message = session.last_error().unwrap_or("Stream error").to_string();
                info!(session_id = session.session_id(), error = %message, "stream reported error");
                handler.on_event(StreamEvent::Failed { message });
                Some(StreamOutcome::Failed(session.clone()))
            }
            _ => None,
        }
    }

    fn cancelled(&self, mut session: StreamSession) -> StreamOutcome {
        session.cancel();
        debug!(
            session_id = session.session_id(),
            "stream cancelled, events suppressed"
        );
        StreamOutcome::Cancelled(session)
    }
}
