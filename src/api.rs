//! JSON endpoints around the streaming core: quiz generation and task lookup.
//!
//! Every response uses the backend's uniform envelope
//! `{success, data?, message?, error?: {code, message, field?}}`.

use crate::config::Endpoints;
use crate::transport::HttpTransport;
use crate::{Error, Result};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiErrorBody>,
}

impl<T> ApiResponse<T> {
    /// `data` of a successful envelope; an error otherwise.
    pub fn into_data(self) -> Result<T> {
        if !self.success {
            let err = self.error.unwrap_or_else(|| ApiErrorBody {
                code: "UNKNOWN_ERROR".to_string(),
                message: self
                    .message
                    .clone()
                    .unwrap_or_else(|| "Request failed".to_string()),
                field: None,
            });
            return Err(Error::Api {
                code: err.code,
                message: err.message,
                status: 200,
                field: err.field,
            });
        }
        self.data.ok_or_else(|| Error::Api {
            code: "EMPTY_RESPONSE".to_string(),
            message: self
                .message
                .unwrap_or_else(|| "Response carried no data".to_string()),
            status: 200,
            field: None,
        })
    }
}

/// `data` of a call that queued a background task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `data` of `GET /tasks/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct ApiClient {
    transport: Arc<HttpTransport>,
    endpoints: Endpoints,
}

impl ApiClient {
    pub fn new(transport: Arc<HttpTransport>, endpoints: Endpoints) -> Self {
        Self {
            transport,
            endpoints,
        }
    }

    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse<T>> {
        let resp = self.transport.send(method.clone(), path, body).await?;
        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::Transport(crate::transport::TransportError::Http(e)))?;
        debug!(method = %method, endpoint = path, http_status = status.as_u16(), "api call");

        if !status.is_success() {
            let envelope: Option<ApiResponse<Value>> = serde_json::from_slice(&bytes).ok();
            let err = envelope.and_then(|e| e.error);
            return Err(Error::Api {
                code: err
                    .as_ref()
                    .map(|e| e.code.clone())
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| "UNKNOWN_ERROR".to_string()),
                message: err
                    .as_ref()
                    .map(|e| e.message.clone())
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "Request failed".to_string()),
                status: status.as_u16(),
                field: err.and_then(|e| e.field),
            });
        }

        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Queue quiz generation for a note; returns the background task id.
    pub async fn generate_quiz(&self, note_id: &str) -> Result<TaskHandle> {
        let path = self.endpoints.quiz_generate.replace("{note_id}", note_id);
        let body = Value::Object(Default::default());
        self.request::<TaskHandle>(Method::POST, &path, Some(&body))
            .await?
            .into_data()
    }

    pub async fn get_task(&self, task_id: &str) -> Result<TaskInfo> {
        let path = self.endpoints.task.replace("{task_id}", task_id);
        self.request::<TaskInfo>(Method::GET, &path, None)
            .await?
            .into_data()
    }

    pub async fn cancel_task(&self, task_id: &str) -> Result<()> {
        let path = self.endpoints.task.replace("{task_id}", task_id);
        let resp = self.request::<Value>(Method::DELETE, &path, None).await?;
        if resp.success {
            Ok(())
        } else {
            resp.into_data().map(|_| ())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_success() {
        let env: ApiResponse<TaskHandle> = serde_json::from_str(
            r#"{"success":true,"data":{"task_id":"abc","note_id":3,"streaming":false},"timestamp":"now"}"#,
        )
        .unwrap();
        assert_eq!(env.into_data().unwrap().task_id, "abc");
    }

    #[test]
    fn test_envelope_failure_keeps_code_and_field() {
        let env: ApiResponse<TaskHandle> = serde_json::from_str(
            r#"{"success":false,"error":{"code":"NOTE_001","message":"Note not found","field":"note_id"}}"#,
        )
        .unwrap();
        match env.into_data() {
            Err(Error::Api { code, field, .. }) => {
                assert_eq!(code, "NOTE_001");
                assert_eq!(field.as_deref(), Some("note_id"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
