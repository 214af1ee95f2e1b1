#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};

use olan::leads::{Lead, LeadBook};
use olan::message::MessagePart;
use olan::notify::LeadNotifier;
use olan::provider::{ModelProvider, ProviderError, ProviderEvent, ProviderRequest, ProviderStream};
use olan::relay::{ChatRelay, RelaySettings};

pub type Item = Result<ProviderEvent, ProviderError>;

/// One provider call's worth of events.
pub struct Script {
    pub events: Vec<Item>,
    /// Keep the stream open after the events, like a model that stalls.
    pub hang: bool,
}

impl Script {
    pub fn new(events: Vec<Item>) -> Self {
        Self { events, hang: false }
    }

    pub fn hanging(events: Vec<Item>) -> Self {
        Self { events, hang: true }
    }
}

/// Answers each provider call with the next script and remembers every request.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    pub requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn stream(&self, request: &ProviderRequest) -> Result<ProviderStream, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        let Some(script) = self.scripts.lock().unwrap().pop_front() else {
            return Err(ProviderError::Status {
                status: 503,
                body: "no more scripted responses".to_string(),
            });
        };
        let events = stream::iter(script.events);
        if script.hang {
            Ok(events.chain(stream::pending()).boxed())
        } else {
            Ok(events.boxed())
        }
    }
}

#[derive(Default)]
pub struct CountingNotifier {
    calls: AtomicUsize,
    pub leads: Mutex<Vec<Lead>>,
}

impl CountingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LeadNotifier for CountingNotifier {
    async fn notify(&self, lead: &Lead) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.leads.lock().unwrap().push(lead.clone());
    }
}

/// Never finishes, like a webhook that accepted the connection and went quiet.
#[derive(Default)]
pub struct StallingNotifier {
    calls: AtomicUsize,
}

impl StallingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LeadNotifier for StallingNotifier {
    async fn notify(&self, _lead: &Lead) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
    }
}

pub fn text(content: &str) -> Item {
    Ok(ProviderEvent::Part(MessagePart::text(content)))
}

pub fn call(id: &str, arguments: Value) -> Item {
    Ok(ProviderEvent::Part(MessagePart::ToolCall {
        id: id.to_string(),
        name: "capture_lead".to_string(),
        arguments,
    }))
}

pub fn finished() -> Item {
    Ok(ProviderEvent::Finished {
        reason: Some("STOP".to_string()),
    })
}

pub fn jane() -> Value {
    json!({
        "name": "Jane Doe",
        "email": "jane@example.com",
        "projectSummary": "Booking app for a chain of dental clinics",
        "budget": "25k_50k"
    })
}

pub fn relay_with(
    provider: Arc<ScriptedProvider>,
    leads: LeadBook,
    notifier: Arc<CountingNotifier>,
) -> ChatRelay {
    ChatRelay::new(
        Some(provider as Arc<dyn ModelProvider>),
        leads,
        notifier,
        RelaySettings::default(),
    )
}
