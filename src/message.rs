use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One piece of a message. The model either talks or asks for a tool; the relay
/// answers a tool call with a result part in the same assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        content: String,
    },
    ToolCall {
        id: String,
        name: String,
        #[serde(default)]
        arguments: Value,
    },
    ToolResult {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        name: String,
        result: Value,
    },
}

impl MessagePart {
    pub fn text(content: impl Into<String>) -> Self {
        MessagePart::Text {
            content: content.into(),
        }
    }

    fn is_blank(&self) -> bool {
        matches!(self, MessagePart::Text { content } if content.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "WireMessage")]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    pub created_at: DateTime<Utc>,
}

/// What browsers actually post: `content` as a plain string, `parts`, or both.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    id: Option<String>,
    role: Role,
    content: Option<String>,
    #[serde(default)]
    parts: Vec<MessagePart>,
    created_at: Option<DateTime<Utc>>,
}

impl TryFrom<WireMessage> for ChatMessage {
    type Error = String;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let mut parts = Vec::with_capacity(wire.parts.len() + 1);
        if let Some(content) = wire.content {
            parts.push(MessagePart::Text { content });
        }
        parts.extend(wire.parts);
        parts.retain(|p| !p.is_blank());
        if parts.is_empty() {
            return Err("message has no content".to_string());
        }
        Ok(ChatMessage {
            id: wire.id.unwrap_or_else(new_message_id),
            role: wire.role,
            parts,
            created_at: wire.created_at.unwrap_or_else(Utc::now),
        })
    }
}

pub fn new_message_id() -> String {
    Uuid::new_v4().simple().to_string()
}

impl ChatMessage {
    pub fn new(role: Role, parts: Vec<MessagePart>) -> Self {
        Self {
            id: new_message_id(),
            role,
            parts,
            created_at: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![MessagePart::text(text)])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![MessagePart::text(text)])
    }

    /// All text parts joined, ignoring tool traffic.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(MessagePart::is_blank)
    }
}
