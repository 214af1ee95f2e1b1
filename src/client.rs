use anyhow::{anyhow, bail, Context, Result};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::message::ChatMessage;
use crate::stream::{StreamChunk, DONE_SENTINEL};

/// How a chat stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The server sent `done` and the `[DONE]` sentinel.
    Completed,
    /// The connection ended before the reply was finished.
    Closed,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Talks to a running relay's `/api/chat`.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: Client,
    base_url: String,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Posts the history and feeds every chunk to `on_chunk` as it arrives.
    /// A JSON error response becomes an `Err` carrying the server's message.
    pub async fn send<F>(&self, history: &[ChatMessage], mut on_chunk: F) -> Result<StreamOutcome>
    where
        F: FnMut(StreamChunk),
    {
        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&json!({ "messages": history }))
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?;

        let status = response.status();
        let is_event_stream = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));
        if !status.is_success() || !is_event_stream {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|e| e.error)
                .unwrap_or_else(|_| format!("unexpected response ({})", status));
            bail!(message);
        }

        let mut events = response.bytes_stream().eventsource();
        let mut saw_done = false;
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "Chat stream broke off");
                    return Ok(StreamOutcome::Closed);
                }
            };
            if event.data == DONE_SENTINEL {
                return Ok(if saw_done {
                    StreamOutcome::Completed
                } else {
                    StreamOutcome::Closed
                });
            }
            let chunk: StreamChunk = serde_json::from_str(&event.data)
                .map_err(|e| anyhow!("Malformed chunk {:?}: {}", event.data, e))?;
            debug!(?chunk, "Chat chunk");
            saw_done |= chunk.is_done();
            on_chunk(chunk);
        }
        Ok(StreamOutcome::Closed)
    }
}
