// Chunks the relay streams to the browser, one SSE `data:` line each.

use axum::response::sse::Event;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::tool::ToolResult;

/// Sent as the last event of a stream that completed normally.
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    /// `delta` is the new text, `content` everything the assistant said so far.
    Content { delta: String, content: String },
    ToolCall {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        name: String,
        arguments: Value,
    },
    ToolResult {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        name: String,
        result: ToolResult,
    },
    Done {
        #[serde(rename = "finishReason", default)]
        finish_reason: Option<String>,
    },
}

impl StreamChunk {
    pub fn is_done(&self) -> bool {
        matches!(self, StreamChunk::Done { .. })
    }

    /// SSE events for this chunk; `done` is followed by the `[DONE]` sentinel.
    pub fn into_events(self) -> Vec<Event> {
        let done = self.is_done();
        let mut events = match serde_json::to_string(&self) {
            Ok(json) => vec![Event::default().data(json)],
            Err(e) => {
                error!(error = %e, chunk = ?self, "Failed to serialize stream chunk");
                Vec::new()
            }
        };
        if done {
            events.push(Event::default().data(DONE_SENTINEL));
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chunk_wire_format() {
        let chunk = StreamChunk::Content {
            delta: " world".into(),
            content: "Hello world".into(),
        };
        assert_eq!(
            serde_json::to_value(&chunk).unwrap(),
            json!({"type": "content", "delta": " world", "content": "Hello world"})
        );

        let chunk = StreamChunk::ToolResult {
            tool_call_id: "call_1".into(),
            name: "capture_lead".into(),
            result: ToolResult::rejected("email is required"),
        };
        assert_eq!(
            serde_json::to_value(&chunk).unwrap(),
            json!({
                "type": "tool_result",
                "toolCallId": "call_1",
                "name": "capture_lead",
                "result": {"success": false, "message": "email is required"}
            })
        );
    }

    #[test]
    fn test_done_parses_without_reason() {
        let chunk: StreamChunk = serde_json::from_str(r#"{"type":"done"}"#).unwrap();
        assert_eq!(chunk, StreamChunk::Done { finish_reason: None });
    }

    #[test]
    fn test_done_is_followed_by_sentinel() {
        let events = StreamChunk::Done {
            finish_reason: Some("STOP".into()),
        }
        .into_events();
        assert_eq!(events.len(), 2);

        let events = StreamChunk::Content {
            delta: "a".into(),
            content: "a".into(),
        }
        .into_events();
        assert_eq!(events.len(), 1);
    }
}
