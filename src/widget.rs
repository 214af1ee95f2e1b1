//! State behind the chat widget: transcript, input box, in-flight request and
//! the lead-captured banner. Rendering and transport live elsewhere; this type
//! only reacts to keys and to chunks coming back from `/api/chat`.

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use crate::message::{ChatMessage, MessagePart, Role};
use crate::prompt::GREETING;
use crate::stream::StreamChunk;
use crate::tool::CAPTURE_LEAD;

const GREETING_ID: &str = "greeting";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetStatus {
    Idle,
    Sending,
    /// The last exchange broke off; `retry` resends it.
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum WidgetAction {
    None,
    Edited,
    /// POST this history to `/api/chat`.
    Submit(Vec<ChatMessage>),
}

#[derive(Debug, Clone)]
pub struct ChatWidget {
    messages: Vec<ChatMessage>,
    input: String,
    focused: bool,
    status: WidgetStatus,
    lead_captured: bool,
    /// History of the request in flight, kept for `retry`.
    pending: Option<Vec<ChatMessage>>,
    /// Index of the assistant message being streamed into.
    reply: Option<usize>,
}

impl Default for ChatWidget {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatWidget {
    pub fn new() -> Self {
        Self {
            messages: vec![greeting()],
            input: String::new(),
            focused: false,
            status: WidgetStatus::Idle,
            lead_captured: false,
            pending: None,
            reply: None,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Newest first, the way the transcript is laid out bottom-up.
    pub fn display_order(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter().rev()
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    pub fn status(&self) -> &WidgetStatus {
        &self.status
    }

    pub fn is_sending(&self) -> bool {
        self.status == WidgetStatus::Sending
    }

    pub fn lead_captured(&self) -> bool {
        self.lead_captured
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> WidgetAction {
        if key.kind == KeyEventKind::Release || self.is_sending() {
            return WidgetAction::None;
        }
        match (key.code, key.modifiers) {
            (KeyCode::Enter, KeyModifiers::NONE) => match self.submit() {
                Some(history) => WidgetAction::Submit(history),
                None => WidgetAction::None,
            },
            // Shift+Enter and friends break the line instead of sending.
            (KeyCode::Enter, _) => {
                self.input.push('\n');
                WidgetAction::Edited
            }
            (KeyCode::Char(c), KeyModifiers::NONE | KeyModifiers::SHIFT) => {
                self.input.push(c);
                WidgetAction::Edited
            }
            (KeyCode::Backspace, _) => {
                if self.input.pop().is_some() {
                    WidgetAction::Edited
                } else {
                    WidgetAction::None
                }
            }
            _ => WidgetAction::None,
        }
    }

    /// Moves the input into the transcript and returns the history to send.
    /// `None` when the input is blank or a request is already in flight.
    pub fn submit(&mut self) -> Option<Vec<ChatMessage>> {
        if self.is_sending() || self.input.trim().is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.input);
        self.messages.push(ChatMessage::user(text.trim()));
        self.reply = None;

        let history = self.history();
        self.pending = Some(history.clone());
        self.status = WidgetStatus::Sending;
        Some(history)
    }

    pub fn apply_chunk(&mut self, chunk: StreamChunk) {
        match chunk {
            StreamChunk::Content { delta, .. } => {
                let reply = self.reply_mut();
                match reply.parts.last_mut() {
                    Some(MessagePart::Text { content }) => content.push_str(&delta),
                    _ => reply.parts.push(MessagePart::text(delta)),
                }
            }
            StreamChunk::ToolCall {
                tool_call_id,
                name,
                arguments,
            } => self.reply_mut().parts.push(MessagePart::ToolCall {
                id: tool_call_id,
                name,
                arguments,
            }),
            StreamChunk::ToolResult {
                tool_call_id,
                name,
                result,
            } => {
                if name == CAPTURE_LEAD && result.success {
                    self.lead_captured = true;
                }
                self.reply_mut().parts.push(MessagePart::ToolResult {
                    tool_call_id,
                    name,
                    result: result.to_value(),
                });
            }
            StreamChunk::Done { .. } => {
                self.status = WidgetStatus::Idle;
                self.pending = None;
                self.reply = None;
            }
        }
    }

    /// The connection ended. Without a `done` chunk that is a failure.
    pub fn stream_closed(&mut self) {
        if self.is_sending() {
            self.fail("The connection closed before Olan finished replying.");
        }
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = WidgetStatus::Failed {
            reason: reason.into(),
        };
    }

    /// Drops the partial reply and resends the failed request's history.
    pub fn retry(&mut self) -> Option<Vec<ChatMessage>> {
        if !matches!(self.status, WidgetStatus::Failed { .. }) {
            return None;
        }
        let history = self.pending.clone()?;
        if let Some(index) = self.reply.take() {
            self.messages.truncate(index);
        }
        self.status = WidgetStatus::Sending;
        Some(history)
    }

    /// Pre-fills the input from elsewhere on the page and focuses it.
    pub fn set_prompt(&mut self, text: impl Into<String>) {
        self.input = text.into();
        self.focused = true;
    }

    pub fn clear(&mut self) {
        *self = Self {
            focused: self.focused,
            ..Self::new()
        };
    }

    /// Everything after the greeting, oldest first.
    fn history(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .filter(|m| m.id != GREETING_ID && !m.is_empty())
            .cloned()
            .collect()
    }

    fn reply_mut(&mut self) -> &mut ChatMessage {
        let index = match self.reply {
            Some(index) => index,
            None => {
                self.messages
                    .push(ChatMessage::new(Role::Assistant, Vec::new()));
                let index = self.messages.len() - 1;
                self.reply = Some(index);
                index
            }
        };
        &mut self.messages[index]
    }
}

fn greeting() -> ChatMessage {
    ChatMessage {
        id: GREETING_ID.to_string(),
        ..ChatMessage::assistant(GREETING)
    }
}
