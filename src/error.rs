use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::provider::ProviderError;

/// Message shown to the browser for every upstream or internal failure.
pub const GENERIC_FAILURE: &str = "Failed to process chat request";

/// Everything that can end a chat request early.
///
/// Only the variants raised before the event stream starts ever become an
/// HTTP response; once SSE bytes are flowing the relay just closes the stream.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The request body is missing or has a malformed message history.
    #[error("{0}")]
    BadRequest(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    /// A deployment setting (the provider key) is missing or a placeholder.
    #[error("{setting} not configured. Please add a valid API key.")]
    Misconfigured { setting: &'static str },

    #[error("model provider failed: {0}")]
    Provider(#[from] ProviderError),

    /// The relay could not finish a stream that had already started.
    #[error("stream failed: {0}")]
    Stream(String),

    /// The browser went away; the remaining stream writes were abandoned.
    #[error("client disconnected")]
    ClientDisconnected,
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            RelayError::Misconfigured { .. }
            | RelayError::Provider(_)
            | RelayError::Stream(_)
            | RelayError::ClientDisconnected => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text for the `{ "error": .. }` body. Upstream details stay in the server log.
    pub fn client_message(&self) -> String {
        match self {
            RelayError::BadRequest(_)
            | RelayError::MethodNotAllowed
            | RelayError::Misconfigured { .. } => self.to_string(),
            _ => GENERIC_FAILURE.to_string(),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Chat request failed");
        }
        (status, Json(json!({ "error": self.client_message() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            RelayError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::MethodNotAllowed.status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            RelayError::Misconfigured { setting: "GEMINI_API_KEY" }.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_misconfigured_names_the_setting() {
        let err = RelayError::Misconfigured { setting: "GEMINI_API_KEY" };
        assert!(err.client_message().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn test_upstream_details_are_hidden() {
        let err = RelayError::Provider(ProviderError::Status {
            status: 403,
            body: "API key expired for project 1234".into(),
        });
        assert_eq!(err.client_message(), GENERIC_FAILURE);
        let err = RelayError::Stream("model exceeded 5 tool rounds".into());
        assert_eq!(err.client_message(), GENERIC_FAILURE);
    }
}
