//! The chat relay: message history in, model output streamed back out.
//!
//! [`ChatRelay::start`] does everything that may still fail with a JSON error
//! (credential check, opening the provider stream). The returned
//! [`RelayStream`] is the producer half: it reads provider events, resolves
//! `capture_lead` calls and pushes [`StreamChunk`]s into a bounded channel that
//! the web layer drains as SSE. Dropping the consumer cancels the producer.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::error::RelayError;
use crate::leads::LeadBook;
use crate::message::{ChatMessage, MessagePart, Role};
use crate::notify::LeadNotifier;
use crate::prompt::SYSTEM_PROMPT;
use crate::provider::{
    GeminiProvider, ModelProvider, ProviderEvent, ProviderRequest, ProviderStream,
};
use crate::stream::StreamChunk;
use crate::tool::{self, ToolResult, CAPTURE_LEAD};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Validating,
    AwaitingProvider,
    Streaming,
    ToolInvocation,
    Resuming,
    Complete,
    Error,
}

/// Generation limits fixed by the server, never by the client.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub max_tool_rounds: usize,
    pub channel_capacity: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        RelaySettings::from(&Settings::default())
    }
}

impl From<&Settings> for RelaySettings {
    fn from(settings: &Settings) -> Self {
        Self {
            temperature: settings.temperature,
            max_output_tokens: settings.max_output_tokens,
            max_tool_rounds: settings.max_tool_rounds,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

pub struct ChatRelay {
    /// `None` when the provider key is missing; every chat request then fails as misconfigured.
    provider: Option<Arc<dyn ModelProvider>>,
    leads: LeadBook,
    notifier: Arc<dyn LeadNotifier>,
    settings: RelaySettings,
}

impl ChatRelay {
    pub fn new(
        provider: Option<Arc<dyn ModelProvider>>,
        leads: LeadBook,
        notifier: Arc<dyn LeadNotifier>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            provider,
            leads,
            notifier,
            settings,
        }
    }

    pub fn from_settings(
        settings: &Settings,
        client: Client,
        leads: LeadBook,
        notifier: Arc<dyn LeadNotifier>,
    ) -> Self {
        let provider = match settings.api_key() {
            Ok(key) => Some(Arc::new(GeminiProvider::new(
                client,
                settings.provider_base_url.clone(),
                settings.model.clone(),
                key,
                settings.provider_timeout(),
            )) as Arc<dyn ModelProvider>),
            Err(e) => {
                warn!("{} Chat requests will be rejected until it is set.", e);
                None
            }
        };
        Self::new(provider, leads, notifier, RelaySettings::from(settings))
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    /// Pulls the message history out of a `/api/chat` body.
    pub fn validate(body: &Value) -> Result<Vec<ChatMessage>, RelayError> {
        debug!(state = ?RelayState::Validating, "Chat relay");
        let Some(raw) = body.get("messages").and_then(Value::as_array) else {
            return Err(RelayError::BadRequest("Messages array is required".to_string()));
        };
        if raw.is_empty() {
            return Err(RelayError::BadRequest(
                "Messages array must contain at least one message".to_string(),
            ));
        }
        raw.iter()
            .enumerate()
            .map(|(index, value)| {
                serde_json::from_value::<ChatMessage>(value.clone()).map_err(|e| {
                    RelayError::BadRequest(format!("Message {} is malformed: {}", index, e))
                })
            })
            .collect()
    }

    pub fn build_request(&self, history: Vec<ChatMessage>) -> ProviderRequest {
        ProviderRequest {
            system_instruction: SYSTEM_PROMPT.to_string(),
            messages: history,
            tools: vec![tool::describe()],
            temperature: self.settings.temperature,
            max_output_tokens: self.settings.max_output_tokens,
        }
    }

    /// Opens the provider stream and waits for its first event. Nothing has been
    /// sent to the client yet, so every error here can still become a JSON response.
    pub async fn start(&self, history: Vec<ChatMessage>) -> Result<RelayStream, RelayError> {
        let provider = self
            .provider
            .clone()
            .ok_or(RelayError::Misconfigured {
                setting: crate::config::API_KEY_VAR,
            })?;

        let request = self.build_request(history);
        debug!(
            state = ?RelayState::AwaitingProvider,
            messages = request.messages.len(),
            "Chat relay"
        );
        let mut upstream = provider.stream(&request).await?;

        // An error in the first event is still answered as JSON; peek before committing to SSE.
        let upstream = match upstream.next().await {
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(first)) => stream::once(async move { Ok(first) }).chain(upstream).boxed(),
            None => upstream,
        };

        Ok(RelayStream {
            provider,
            request,
            upstream,
            leads: self.leads.clone(),
            notifier: self.notifier.clone(),
            max_tool_rounds: self.settings.max_tool_rounds,
            channel_capacity: self.settings.channel_capacity,
            state: RelayState::Idle,
        })
    }
}

struct PendingCall {
    id: String,
    name: String,
    arguments: Value,
}

#[derive(Default)]
struct Turn {
    text: String,
    tool_calls: Vec<PendingCall>,
    finish_reason: Option<String>,
}

/// A spawned producer. Dropping `guard` cancels it; `task` yields how it ended.
pub struct RelayHandle {
    pub chunks: mpsc::Receiver<StreamChunk>,
    pub guard: DropGuard,
    pub task: JoinHandle<Result<(), RelayError>>,
}

/// An open provider stream plus everything needed to resume it after a tool call.
pub struct RelayStream {
    provider: Arc<dyn ModelProvider>,
    request: ProviderRequest,
    upstream: ProviderStream,
    leads: LeadBook,
    notifier: Arc<dyn LeadNotifier>,
    max_tool_rounds: usize,
    channel_capacity: usize,
    state: RelayState,
}

impl RelayStream {
    /// Runs the producer on its own task. Dropping the guard (the SSE body going
    /// away) cancels it.
    pub fn spawn(self) -> RelayHandle {
        let (tx, chunks) = mpsc::channel(self.channel_capacity.max(1));
        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();
        let task = tokio::spawn(async move {
            let result = self.run(tx, cancel).await;
            match &result {
                Ok(()) => debug!("Chat stream complete"),
                Err(RelayError::ClientDisconnected) => {
                    info!("Client disconnected, abandoning chat stream")
                }
                Err(e) => error!(error = %e, "Stream error"),
            }
            result
        });
        RelayHandle {
            chunks,
            guard,
            task,
        }
    }

    /// Streams until the model finishes without calling a tool. On error the
    /// stream just stops; no `done` chunk is sent.
    pub async fn run(
        mut self,
        tx: mpsc::Sender<StreamChunk>,
        cancel: CancellationToken,
    ) -> Result<(), RelayError> {
        let result = self.drive(&tx, &cancel).await;
        self.transition(if result.is_ok() {
            RelayState::Complete
        } else {
            RelayState::Error
        });
        result
    }

    async fn drive(
        &mut self,
        tx: &mpsc::Sender<StreamChunk>,
        cancel: &CancellationToken,
    ) -> Result<(), RelayError> {
        let mut transcript = String::new();
        let mut tool_rounds = 0;
        loop {
            self.transition(RelayState::Streaming);
            let turn = self.pump_turn(tx, cancel, &mut transcript).await?;

            let mut calls = turn.tool_calls;
            if calls.is_empty() {
                return emit(
                    tx,
                    StreamChunk::Done {
                        finish_reason: turn.finish_reason,
                    },
                )
                .await;
            }
            if calls.len() > 1 {
                return Err(RelayError::Stream(format!(
                    "model requested {} tool calls in one turn; only one is supported",
                    calls.len()
                )));
            }
            tool_rounds += 1;
            if tool_rounds > self.max_tool_rounds {
                return Err(RelayError::Stream(format!(
                    "model exceeded {} tool rounds",
                    self.max_tool_rounds
                )));
            }

            let call = calls.remove(0);
            self.transition(RelayState::ToolInvocation);
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(RelayError::ClientDisconnected),
                result = self.invoke_tool(&call) => result,
            };
            emit(
                tx,
                StreamChunk::ToolResult {
                    tool_call_id: call.id.clone(),
                    name: call.name.clone(),
                    result: result.clone(),
                },
            )
            .await?;

            let mut parts = Vec::with_capacity(3);
            if !turn.text.is_empty() {
                parts.push(MessagePart::text(turn.text));
            }
            parts.push(MessagePart::ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments,
            });
            parts.push(MessagePart::ToolResult {
                tool_call_id: call.id,
                name: call.name,
                result: result.to_value(),
            });
            self.request
                .messages
                .push(ChatMessage::new(Role::Assistant, parts));

            self.transition(RelayState::Resuming);
            let resumed = tokio::select! {
                _ = cancel.cancelled() => return Err(RelayError::ClientDisconnected),
                resumed = self.provider.stream(&self.request) => resumed?,
            };
            self.upstream = resumed;
        }
    }

    /// Forwards one model turn, text as it arrives, and collects its tool calls.
    async fn pump_turn(
        &mut self,
        tx: &mpsc::Sender<StreamChunk>,
        cancel: &CancellationToken,
        transcript: &mut String,
    ) -> Result<Turn, RelayError> {
        let mut turn = Turn::default();
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(RelayError::ClientDisconnected),
                next = self.upstream.next() => next,
            };
            match next {
                None => return Ok(turn),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(ProviderEvent::Finished { reason })) => {
                    turn.finish_reason = reason;
                    return Ok(turn);
                }
                Some(Ok(ProviderEvent::Part(MessagePart::Text { content }))) => {
                    transcript.push_str(&content);
                    turn.text.push_str(&content);
                    emit(
                        tx,
                        StreamChunk::Content {
                            delta: content,
                            content: transcript.clone(),
                        },
                    )
                    .await?;
                }
                Some(Ok(ProviderEvent::Part(MessagePart::ToolCall { id, name, arguments }))) => {
                    emit(
                        tx,
                        StreamChunk::ToolCall {
                            tool_call_id: id.clone(),
                            name: name.clone(),
                            arguments: arguments.clone(),
                        },
                    )
                    .await?;
                    turn.tool_calls.push(PendingCall { id, name, arguments });
                }
                Some(Ok(ProviderEvent::Part(MessagePart::ToolResult { .. }))) => {
                    warn!("Ignoring tool result produced by the model");
                }
            }
        }
    }

    /// Never fails: bad arguments become a `success: false` result the model can react to.
    async fn invoke_tool(&mut self, call: &PendingCall) -> ToolResult {
        if call.name != CAPTURE_LEAD {
            warn!(tool = %call.name, "Model called an unknown tool");
            return ToolResult::rejected(format!("Unknown tool `{}`", call.name));
        }
        match tool::validate(&call.arguments) {
            Ok(input) => {
                let lead = self.leads.record(input);
                info!(lead_id = %lead.id, email = %lead.email, "New lead captured");
                self.notifier.notify(&lead).await;
                ToolResult::captured(&lead.name, &lead.email, &lead.id)
            }
            Err(e) => {
                warn!(reason = %e, "Rejected capture_lead arguments");
                ToolResult::rejected(format!(
                    "Lead not captured: {}. Ask the user for the missing or corrected details.",
                    e
                ))
            }
        }
    }

    fn transition(&mut self, next: RelayState) {
        debug!(from = ?self.state, to = ?next, "Chat relay");
        self.state = next;
    }
}

async fn emit(tx: &mpsc::Sender<StreamChunk>, chunk: StreamChunk) -> Result<(), RelayError> {
    tx.send(chunk)
        .await
        .map_err(|_| RelayError::ClientDisconnected)
}
