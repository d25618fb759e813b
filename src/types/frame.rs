//! JSON payloads carried in `data: ` frames.

use serde::Deserialize;
use serde_json::Value;

/// Frame shape shared by the enhancement, summary and Q&A endpoints.
///
/// Each endpoint uses a subset; unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlatFrame {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub chunk: Option<String>,
    #[serde(default)]
    pub done: Option<bool>,
    #[serde(default)]
    pub full_text: Option<String>,
    #[serde(default)]
    pub full_answer: Option<String>,
    #[serde(default)]
    pub summary_id: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Frame shape of the multi-section endpoints, discriminated by `type`.
///
/// `<section>_done` frames carry the finished text under the section's own key
/// (`heading`, `description`) or, for some sections, under `content`. Those keys
/// land in `extra`.
#[derive(Debug, Clone, Deserialize)]
pub struct SectionFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl SectionFrame {
    /// The finished text of `section` from a `<section>_done` frame.
    pub fn section_text(&self, section: &str) -> Option<String> {
        self.extra
            .get(section)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| self.content.clone())
    }
}

/// Renders an id that the server may send as a number or a string.
pub(crate) fn id_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
