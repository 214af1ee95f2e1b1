//! Olan: a streaming sales-chat relay for the OlanAI website.
//!
//! `/api/chat` takes the visitor's conversation, streams the model's reply
//! back as SSE and records a lead whenever the model calls `capture_lead`.

pub mod client;
pub mod config;
pub mod error;
pub mod leads;
pub mod message;
pub mod notify;
pub mod prompt;
pub mod provider;
pub mod relay;
pub mod stream;
pub mod tool;
pub mod web_server;
pub mod widget;
