//! Task-status messages pushed over the task WebSocket.

use crate::ws::monitor::{MonitorEvent, MonitorEvents, TaskMonitor, CLOSE_NORMAL};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::{debug, info, warn};

/// Close code sent when a task reports failure (application range).
pub const CLOSE_TASK_FAILED: u16 = 4000;

/// Progress shown while a task reports `PROGRESS`; only `SUCCESS` reaches 100.
pub const PROGRESS_CAP: u8 = 95;

/// Progress reported once a task has begun but before any `PROGRESS` message.
pub const STARTED_PROGRESS: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Pending,
    Started,
    Progress,
    Retry,
    Success,
    Failure,
    Revoked,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Success | TaskState::Failure | TaskState::Revoked
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "PENDING",
            TaskState::Started => "STARTED",
            TaskState::Progress => "PROGRESS",
            TaskState::Retry => "RETRY",
            TaskState::Success => "SUCCESS",
            TaskState::Failure => "FAILURE",
            TaskState::Revoked => "REVOKED",
        };
        f.write_str(s)
    }
}

/// `{state, current?, total?, status?, result?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusMessage {
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// What a status message means for the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskUpdate {
    Pending,
    Started,
    Progress {
        percent: Option<u8>,
        status: Option<String>,
    },
    Succeeded(Value),
    Failed(String),
}

impl TaskUpdate {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskUpdate::Succeeded(_) | TaskUpdate::Failed(_))
    }
}

impl TaskStatusMessage {
    /// `None` for payloads that are not task-status messages.
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// `current / total` as a rounded percentage, capped at [`PROGRESS_CAP`].
    pub fn percent(&self) -> Option<u8> {
        let (current, total) = (self.current?, self.total?);
        if total <= 0.0 || current < 0.0 {
            return None;
        }
        let pct = ((current / total) * 100.0).round();
        Some(pct.min(PROGRESS_CAP as f64) as u8)
    }

    /// Business-level error carried inside an otherwise successful result.
    pub fn result_error(&self) -> Option<String> {
        match self.result.as_ref()?.get("error")? {
            Value::Null => None,
            Value::Bool(false) => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn update(&self) -> TaskUpdate {
        match self.state {
            TaskState::Pending | TaskState::Retry => TaskUpdate::Pending,
            TaskState::Started => TaskUpdate::Started,
            TaskState::Progress => TaskUpdate::Progress {
                percent: self.percent(),
                status: self.status.clone(),
            },
            TaskState::Success => match self.result_error() {
                Some(err) => TaskUpdate::Failed(format!("Generation failed: {}", err)),
                None => TaskUpdate::Succeeded(self.result.clone().unwrap_or(Value::Null)),
            },
            TaskState::Failure => TaskUpdate::Failed(
                self.status
                    .clone()
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "Task failed".to_string()),
            ),
            TaskState::Revoked => TaskUpdate::Failed("Task was cancelled".to_string()),
        }
    }

    /// Progress indicator for this message, if it implies one.
    pub fn progress(&self) -> Option<u8> {
        match self.state {
            TaskState::Pending | TaskState::Retry => Some(0),
            TaskState::Started => Some(STARTED_PROGRESS),
            TaskState::Progress => self.percent(),
            TaskState::Success if self.result_error().is_none() => Some(100),
            _ => None,
        }
    }
}

/// Connect `monitor` and follow its task to a terminal state.
///
/// `on_status` sees every task-status message in arrival order. The monitor is
/// closed on purpose once the task succeeds or fails, so a terminal task never
/// triggers a reconnect.
pub async fn watch_task<F>(
    monitor: &TaskMonitor,
    events: &mut MonitorEvents,
    mut on_status: F,
) -> Result<Value>
where
    F: FnMut(&TaskStatusMessage),
{
    monitor.connect();

    while let Some(event) = events.recv().await {
        match event {
            MonitorEvent::Message(value) => {
                let Some(msg) = TaskStatusMessage::from_value(&value) else {
                    debug!(task_id = monitor.task_id(), "ignoring non-status message");
                    continue;
                };
                on_status(&msg);
                match msg.update() {
                    TaskUpdate::Succeeded(result) => {
                        info!(task_id = monitor.task_id(), "task succeeded");
                        monitor.close(CLOSE_NORMAL, "Task completed");
                        return Ok(result);
                    }
                    TaskUpdate::Failed(message) => {
                        warn!(
                            task_id = monitor.task_id(),
                            error = message.as_str(),
                            "task failed"
                        );
                        monitor.close(CLOSE_TASK_FAILED, "Task failed");
                        return Err(Error::TaskFailed(message));
                    }
                    _ => {}
                }
            }
            MonitorEvent::Closed { code, reason } if code == CLOSE_NORMAL => {
                let detail = if reason.is_empty() {
                    "normal closure"
                } else {
                    reason.as_str()
                };
                return Err(Error::WebSocket(format!(
                    "task status connection closed before completion: {detail}"
                )));
            }
            MonitorEvent::PermanentFailure { attempts } => {
                return Err(Error::ReconnectExhausted { attempts });
            }
            MonitorEvent::Error(e) => {
                debug!(
                    task_id = monitor.task_id(),
                    error = e.as_str(),
                    "task monitor error"
                );
            }
            MonitorEvent::Open
            | MonitorEvent::Closed { .. }
            | MonitorEvent::Reconnecting { .. } => {}
        }
    }

    Err(Error::WebSocket("task monitor stopped".to_string()))
}
