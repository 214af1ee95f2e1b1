use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    response::{
        sse::{KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    serve, Json, Router,
};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::RelayError;
use crate::leads::LeadBook;
use crate::notify::{LeadNotifier, WebhookNotifier};
use crate::relay::ChatRelay;

/// Shared by every handler; cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<ChatRelay>,
    pub leads: LeadBook,
}

impl AppState {
    pub fn new(relay: ChatRelay, leads: LeadBook) -> Self {
        Self {
            relay: Arc::new(relay),
            leads,
        }
    }

    /// Wires the Gemini provider, an in-memory lead book and the webhook notifier.
    pub fn from_settings(settings: &Settings) -> Self {
        let client = Client::new();
        let leads = LeadBook::in_memory();
        let notifier: Arc<dyn LeadNotifier> = Arc::new(
            WebhookNotifier::new(client.clone(), settings.webhook())
                .with_timeout(settings.webhook_timeout()),
        );
        let relay = ChatRelay::from_settings(settings, client, leads.clone(), notifier);
        Self::new(relay, leads)
    }
}

pub fn router(state: AppState, settings: &Settings) -> Router {
    Router::new()
        .route(
            "/api/chat",
            post(chat_handler)
                .options(|| async { StatusCode::OK })
                .fallback(|| async { RelayError::MethodNotAllowed }),
        )
        .route("/api/health", get(health_handler))
        .route("/api/leads", get(leads_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(settings)),
        )
}

fn cors_layer(settings: &Settings) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    if settings.allows_any_origin() {
        return layer.allow_origin(AllowOrigin::any());
    }
    let origins: Vec<HeaderValue> = settings
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
}

/// `POST /api/chat`: JSON error before the stream starts, SSE after.
async fn chat_handler(State(state): State<AppState>, body: Bytes) -> Result<Response, RelayError> {
    // An unparsable body has no messages array either.
    let body: Value = serde_json::from_slice(&body)
        .map_err(|_| RelayError::BadRequest("Messages array is required".to_string()))?;
    let history = ChatRelay::validate(&body)?;
    let relay_stream = state.relay.start(history).await?;

    let handle = relay_stream.spawn();
    let guard = handle.guard;
    let events = ReceiverStream::new(handle.chunks)
        .flat_map(|chunk| stream::iter(chunk.into_events()))
        .map(move |event| {
            // The guard lives as long as the response body; dropping it cancels the producer.
            let _ = &guard;
            Ok::<_, Infallible>(event)
        });

    let headers = [
        (header::CACHE_CONTROL, "no-cache"),
        (header::CONNECTION, "keep-alive"),
        (HeaderName::from_static("x-accel-buffering"), "no"),
    ];
    Ok((headers, Sse::new(events).keep_alive(KeepAlive::default())).into_response())
}

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "status": "ok", "leads": state.leads.count() }))
}

async fn leads_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.leads.list())
}

pub async fn start_web_server(settings: Settings) -> Result<()> {
    let state = AppState::from_settings(&settings);
    let app = router(state, &settings);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    info!("Olan chat server listening on http://{}", addr);
    info!("Chat endpoint: http://localhost:{}/api/chat", settings.port);
    info!("Health check: http://localhost:{}/api/health", settings.port);
    info!(
        "Leads (debug only, unauthenticated): http://localhost:{}/api/leads",
        settings.port
    );

    serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Web server failed")?;

    info!("Web server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C; running until killed");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
