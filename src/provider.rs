//! Model provider seam and the Gemini streaming client behind it.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, instrument, trace};
use uuid::Uuid;

use crate::message::{ChatMessage, MessagePart, Role};
use crate::tool::ToolDescriptor;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request to model provider failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("model provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model provider stream broke: {0}")]
    Stream(String),

    #[error("model provider reported an error: {0}")]
    Api(String),

    #[error("malformed model provider event: {0}")]
    Decode(String),

    #[error("model provider timed out after {0}s")]
    Timeout(u64),
}

/// One fully assembled provider call.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub system_instruction: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDescriptor>,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// A text delta or a complete tool call, in the order the model produced them.
    Part(MessagePart),
    /// The model ended its turn.
    Finished { reason: Option<String> },
}

pub type ProviderStream = BoxStream<'static, Result<ProviderEvent, ProviderError>>;

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Opens a streaming generation. Errors here happen before any output exists.
    async fn stream(&self, request: &ProviderRequest) -> Result<ProviderStream, ProviderError>;
}

pub struct GeminiProvider {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl GeminiProvider {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.into(),
            timeout,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    #[instrument(
        skip(self, request),
        fields(model = %self.model, messages = request.messages.len())
    )]
    async fn stream(&self, request: &ProviderRequest) -> Result<ProviderStream, ProviderError> {
        let body = GenerateContentRequest::from(request);
        let send = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send();
        let response = timeout(self.timeout, send)
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout.as_secs()))??;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %body, "Gemini API request failed");
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }
        debug!("Gemini stream opened");

        let events = response
            .bytes_stream()
            .eventsource()
            .map(|event| event.map(|e| e.data).map_err(|e| e.to_string()))
            .boxed();
        Ok(decode_sse(events, self.timeout).boxed())
    }
}

struct DecodeState {
    events: BoxStream<'static, Result<String, String>>,
    pending: VecDeque<ProviderEvent>,
    idle: Duration,
    failed: bool,
}

/// Turns raw SSE `data:` payloads into provider events. Ends after the first error.
fn decode_sse(
    events: BoxStream<'static, Result<String, String>>,
    idle: Duration,
) -> impl futures::Stream<Item = Result<ProviderEvent, ProviderError>> + Send + 'static {
    let state = DecodeState {
        events,
        pending: VecDeque::new(),
        idle,
        failed: false,
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.failed {
                return None;
            }
            let failure = match timeout(state.idle, state.events.next()).await {
                Err(_) => ProviderError::Timeout(state.idle.as_secs()),
                Ok(None) => return None,
                Ok(Some(Err(e))) => ProviderError::Stream(e),
                Ok(Some(Ok(data))) => {
                    trace!(%data, "Gemini SSE");
                    match parse_chunk(&data) {
                        Ok(events) => {
                            state.pending.extend(events);
                            continue;
                        }
                        Err(e) => e,
                    }
                }
            };
            state.failed = true;
            return Some((Err(failure), state));
        }
    })
}

/// Parses one `data:` payload of a `streamGenerateContent` SSE response.
pub fn parse_chunk(data: &str) -> Result<Vec<ProviderEvent>, ProviderError> {
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(Vec::new());
    }
    let chunk: GenerateContentChunk =
        serde_json::from_str(data).map_err(|e| ProviderError::Decode(format!("{}: {}", e, data)))?;

    if let Some(error) = chunk.error {
        return Err(ProviderError::Api(error.message));
    }

    let Some(candidate) = chunk.candidates.into_iter().next() else {
        if let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(ProviderError::Api(format!("prompt blocked: {}", reason)));
        }
        return Ok(Vec::new());
    };

    let mut events = Vec::new();
    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        if part.thought {
            continue;
        }
        if let Some(call) = part.function_call {
            events.push(ProviderEvent::Part(MessagePart::ToolCall {
                id: call
                    .id
                    .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple())),
                name: call.name,
                arguments: call.args,
            }));
        } else if let Some(text) = part.text.filter(|t| !t.is_empty()) {
            events.push(ProviderEvent::Part(MessagePart::Text { content: text }));
        }
    }
    if let Some(reason) = candidate.finish_reason {
        events.push(ProviderEvent::Finished {
            reason: Some(reason),
        });
    }
    Ok(events)
}

// Gemini wire types.

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    system_instruction: Content,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tools>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, PartialEq)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<OutboundPart>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
enum OutboundPart {
    Text(String),
    FunctionCall { name: String, args: Value },
    FunctionResponse { name: String, response: Value },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Tools {
    function_declarations: Vec<ToolDescriptor>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

impl From<&ProviderRequest> for GenerateContentRequest {
    fn from(request: &ProviderRequest) -> Self {
        let tools = if request.tools.is_empty() {
            Vec::new()
        } else {
            vec![Tools {
                function_declarations: request.tools.clone(),
            }]
        };
        Self {
            contents: to_contents(&request.messages),
            system_instruction: Content {
                role: None,
                parts: vec![OutboundPart::Text(request.system_instruction.clone())],
            },
            tools,
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
            },
        }
    }
}

/// Gemini wants tool results in a `user` turn of their own, so an assistant
/// message holding call, result and follow-up text becomes three contents.
fn to_contents(messages: &[ChatMessage]) -> Vec<Content> {
    let mut contents: Vec<Content> = Vec::new();
    for message in messages {
        for part in &message.parts {
            let (role, outbound) = match part {
                MessagePart::Text { content } if content.trim().is_empty() => continue,
                MessagePart::Text { content } => (
                    gemini_role(message.role),
                    OutboundPart::Text(content.clone()),
                ),
                MessagePart::ToolCall { name, arguments, .. } => (
                    "model",
                    OutboundPart::FunctionCall {
                        name: name.clone(),
                        args: arguments.clone(),
                    },
                ),
                MessagePart::ToolResult { name, result, .. } => (
                    "user",
                    OutboundPart::FunctionResponse {
                        name: name.clone(),
                        response: result.clone(),
                    },
                ),
            };
            match contents.last_mut() {
                Some(last) if last.role == Some(role) => last.parts.push(outbound),
                _ => contents.push(Content {
                    role: Some(role),
                    parts: vec![outbound],
                }),
            }
        }
    }
    contents
}

fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<InboundPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InboundPart {
    text: Option<String>,
    function_call: Option<FunctionCall>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_text_chunk() {
        let events = parse_chunk(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Projects start at $5,000"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(
            events,
            vec![ProviderEvent::Part(MessagePart::text("Projects start at $5,000"))]
        );
    }

    #[test]
    fn test_parse_function_call_with_finish_reason() {
        let events = parse_chunk(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"functionCall":{"name":"capture_lead","args":{"name":"Jane Doe"}}}]},"finishReason":"STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(events.len(), 2);
        match &events[0] {
            ProviderEvent::Part(MessagePart::ToolCall { id, name, arguments }) => {
                assert!(id.starts_with("call_"));
                assert_eq!(name, "capture_lead");
                assert_eq!(arguments["name"], "Jane Doe");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            events[1],
            ProviderEvent::Finished {
                reason: Some("STOP".into())
            }
        );
    }

    #[test]
    fn test_thought_parts_are_skipped() {
        let events = parse_chunk(
            r#"{"candidates":[{"content":{"parts":[{"text":"planning...","thought":true},{"text":"Hi"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(events, vec![ProviderEvent::Part(MessagePart::text("Hi"))]);
    }

    #[test]
    fn test_api_error_payload() {
        let err = parse_chunk(r#"{"error":{"code":429,"message":"quota exceeded"}}"#).unwrap_err();
        assert!(matches!(err, ProviderError::Api(ref m) if m == "quota exceeded"));
    }

    #[test]
    fn test_blocked_prompt() {
        let err = parse_chunk(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        assert!(matches!(parse_chunk("{not json"), Err(ProviderError::Decode(_))));
        assert!(parse_chunk("[DONE]").unwrap().is_empty());
    }

    #[test]
    fn test_request_body_shape() {
        let mut assistant = ChatMessage::assistant("Great, saving that now.");
        assistant.parts.push(MessagePart::ToolCall {
            id: "call_1".into(),
            name: "capture_lead".into(),
            arguments: json!({"email": "jane@example.com"}),
        });
        assistant.parts.push(MessagePart::ToolResult {
            tool_call_id: "call_1".into(),
            name: "capture_lead".into(),
            result: json!({"success": true}),
        });
        let request = ProviderRequest {
            system_instruction: "be nice".into(),
            messages: vec![ChatMessage::user("hi"), assistant],
            tools: vec![crate::tool::describe()],
            temperature: 0.7,
            max_output_tokens: 1024,
        };
        let body = serde_json::to_value(GenerateContentRequest::from(&request)).unwrap();

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be nice");
        assert!(body["systemInstruction"].get("role").is_none());
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);
        assert_eq!(body["tools"][0]["functionDeclarations"][0]["name"], "capture_lead");

        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["text"], "Great, saving that now.");
        assert_eq!(contents[1]["parts"][1]["functionCall"]["args"]["email"], "jane@example.com");
        assert_eq!(contents[2]["role"], "user");
        assert_eq!(contents[2]["parts"][0]["functionResponse"]["response"]["success"], true);
    }

    #[tokio::test]
    async fn test_decode_sse_stops_after_first_error() {
        let raw: Vec<Result<String, String>> = vec![
            Ok(r#"{"candidates":[{"content":{"parts":[{"text":"a"}]}}]}"#.to_string()),
            Err("connection reset".to_string()),
            Ok(r#"{"candidates":[{"content":{"parts":[{"text":"b"}]}}]}"#.to_string()),
        ];
        let decoded: Vec<_> = decode_sse(stream::iter(raw).boxed(), Duration::from_secs(5))
            .collect()
            .await;
        assert_eq!(decoded.len(), 2);
        assert!(decoded[0].is_ok());
        assert!(matches!(decoded[1], Err(ProviderError::Stream(_))));
    }
}
