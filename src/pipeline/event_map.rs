//! Frame → event mapping for the two wire shapes the backend speaks.

use crate::pipeline::ProtocolError;
use crate::types::events::ProtocolEvent;
use crate::types::frame::{id_to_string, FlatFrame, SectionFrame};
use tracing::debug;

/// Maps one `data: ` payload to protocol events, in the order they should apply.
pub trait EventMapper: Send + Sync {
    fn map_payload(&self, payload: &str) -> Result<Vec<ProtocolEvent>, ProtocolError>;
}

fn malformed(payload: &str, e: serde_json::Error) -> ProtocolError {
    ProtocolError::MalformedFrame {
        payload: payload.chars().take(200).collect(),
        reason: e.to_string(),
    }
}

/// `task_id` / `chunk` / `done` frames (enhancement, summary, Q&A).
///
/// A single frame may carry several fields; they apply as task id, then chunk,
/// then the terminal outcome. `done` with `error` is a failure.
pub struct FlatEventMapper;

impl EventMapper for FlatEventMapper {
    fn map_payload(&self, payload: &str) -> Result<Vec<ProtocolEvent>, ProtocolError> {
        let frame: FlatFrame = serde_json::from_str(payload).map_err(|e| malformed(payload, e))?;
        let mut events = Vec::new();

        if let Some(task_id) = frame.task_id.filter(|t| !t.is_empty()) {
            events.push(ProtocolEvent::TaskStarted { task_id });
        }

        if let Some(text) = frame.chunk.filter(|c| !c.is_empty()) {
            events.push(ProtocolEvent::Chunk {
                section_key: None,
                text,
            });
        }

        if let Some(message) = frame.error.filter(|e| !e.is_empty()) {
            events.push(ProtocolEvent::Error { message });
            return Ok(events);
        }

        if frame.done.unwrap_or(false) {
            if let Some(entity_id) = frame.summary_id.as_ref().and_then(id_to_string) {
                events.push(ProtocolEvent::EntityCreated { entity_id });
            }
            events.push(ProtocolEvent::Done {
                full_text: frame.full_text.or(frame.full_answer),
            });
        } else if let Some(status) = frame.status {
            debug!(status = status.as_str(), "stream status frame");
        }

        Ok(events)
    }
}

/// `type`-discriminated frames (multi-section blog generation).
pub struct SectionEventMapper;

impl EventMapper for SectionEventMapper {
    fn map_payload(&self, payload: &str) -> Result<Vec<ProtocolEvent>, ProtocolError> {
        let frame: SectionFrame =
            serde_json::from_str(payload).map_err(|e| malformed(payload, e))?;

        let event = match frame.kind.as_str() {
            "blog_created" => frame
                .id
                .as_ref()
                .and_then(id_to_string)
                .map(|entity_id| ProtocolEvent::EntityCreated { entity_id }),
            "start" => frame
                .stage
                .clone()
                .map(|stage| ProtocolEvent::SectionStarted { stage }),
            "complete" => Some(ProtocolEvent::Done { full_text: None }),
            "error" => Some(ProtocolEvent::Error {
                message: frame
                    .msg
                    .clone()
                    .unwrap_or_else(|| "Stream error".to_string()),
            }),
            kind => {
                if let Some(section) = kind.strip_suffix("_chunk") {
                    frame.content.clone().map(|text| ProtocolEvent::Chunk {
                        section_key: Some(section.to_string()),
                        text,
                    })
                } else if let Some(section) = kind.strip_suffix("_done") {
                    Some(ProtocolEvent::SectionComplete {
                        section_key: section.to_string(),
                        final_text: frame.section_text(section).unwrap_or_default(),
                    })
                } else {
                    return Err(ProtocolError::Unexpected(kind.to_string()));
                }
            }
        };

        Ok(event.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_done_prefers_full_text() {
        let evs = FlatEventMapper
            .map_payload(r#"{"done":true,"full_text":"Hello"}"#)
            .unwrap();
        assert_eq!(
            evs,
            vec![ProtocolEvent::Done {
                full_text: Some("Hello".into()),
            }]
        );
    }

    #[test]
    fn test_flat_full_answer_and_summary_id() {
        let qa = FlatEventMapper
            .map_payload(r#"{"done":true,"full_answer":"42"}"#)
            .unwrap();
        assert_eq!(
            qa,
            vec![ProtocolEvent::Done {
                full_text: Some("42".into()),
            }]
        );

        let summary = FlatEventMapper
            .map_payload(r#"{"done":true,"summary_id":17}"#)
            .unwrap();
        assert_eq!(
            summary,
            vec![
                ProtocolEvent::EntityCreated {
                    entity_id: "17".into(),
                },
                ProtocolEvent::Done { full_text: None },
            ]
        );
    }

    #[test]
    fn test_flat_done_with_error_is_failure() {
        let evs = FlatEventMapper
            .map_payload(r#"{"done":true,"error":"boom"}"#)
            .unwrap();
        assert_eq!(
            evs,
            vec![ProtocolEvent::Error {
                message: "boom".into(),
            }]
        );
    }

    #[test]
    fn test_flat_status_only_frame_is_empty() {
        let evs = FlatEventMapper
            .map_payload(r#"{"status":"processing"}"#)
            .unwrap();
        assert!(evs.is_empty());
    }

    #[test]
    fn test_section_frames() {
        let m = SectionEventMapper;
        assert_eq!(
            m.map_payload(r#"{"type":"blog_created","id":9}"#).unwrap(),
            vec![ProtocolEvent::EntityCreated {
                entity_id: "9".into(),
            }]
        );
        assert_eq!(
            m.map_payload(r#"{"type":"heading_chunk","content":"In"}"#)
                .unwrap(),
            vec![ProtocolEvent::Chunk {
                section_key: Some("heading".into()),
                text: "In".into(),
            }]
        );
        assert_eq!(
            m.map_payload(r#"{"type":"description_done","description":"Desc"}"#)
                .unwrap(),
            vec![ProtocolEvent::SectionComplete {
                section_key: "description".into(),
                final_text: "Desc".into(),
            }]
        );
        assert_eq!(
            m.map_payload(r#"{"type":"error","msg":"quota"}"#).unwrap(),
            vec![ProtocolEvent::Error {
                message: "quota".into(),
            }]
        );
        assert_eq!(
            m.map_payload(r#"{"type":"complete"}"#).unwrap(),
            vec![ProtocolEvent::Done { full_text: None }]
        );
    }

    #[test]
    fn test_section_unknown_type_is_rejected() {
        assert!(matches!(
            SectionEventMapper.map_payload(r#"{"type":"mystery"}"#),
            Err(ProtocolError::Unexpected(_))
        ));
        assert!(matches!(
            SectionEventMapper.map_payload(r#"{"no_type":1}"#),
            Err(ProtocolError::MalformedFrame { .. })
        ));
    }
}
