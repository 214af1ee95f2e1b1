// Runtime configuration for the relay, read from flags with environment fallbacks.
// `main` loads `.env` and `.env.local` through dotenvy before these are parsed.

use std::time::Duration;

use reqwest::Url;
use tracing::warn;

use crate::error::RelayError;

/// Value shipped in `.env.example`; treated the same as a missing key.
pub const PLACEHOLDER_API_KEY: &str = "PLACEHOLDER_API_KEY";
pub const API_KEY_VAR: &str = "GEMINI_API_KEY";

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_PROVIDER_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_ALLOWED_ORIGINS: [&str; 3] = [
    "http://localhost:9003",
    "http://127.0.0.1:9003",
    "http://0.0.0.0:9003",
];
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1024;
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 5;
pub const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 10;

#[derive(clap::Args, Debug, Clone)]
pub struct Settings {
    /// Gemini API key used for every chat request.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Base URL of the Gemini API (overridden in tests).
    #[arg(long, env = "GEMINI_BASE_URL", default_value = DEFAULT_PROVIDER_BASE_URL)]
    pub provider_base_url: String,

    /// Discord incoming webhook notified on every captured lead.
    #[arg(long, env = "DISCORD_WEBHOOK_URL")]
    pub discord_webhook_url: Option<String>,

    /// Slack incoming webhook, used when no Discord webhook is set.
    #[arg(long, env = "SLACK_WEBHOOK_URL")]
    pub slack_webhook_url: Option<String>,

    /// Upper bound for one webhook post; a slow webhook must not hold up the chat stream.
    #[arg(long, env = "WEBHOOK_TIMEOUT_SECS", default_value_t = DEFAULT_WEBHOOK_TIMEOUT_SECS)]
    pub webhook_timeout_secs: u64,

    /// Port for the web server.
    #[arg(long, env = "API_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Origins allowed to call the API from a browser ("*" allows any).
    #[arg(
        long,
        env = "ALLOWED_ORIGINS",
        value_delimiter = ',',
        default_values = DEFAULT_ALLOWED_ORIGINS
    )]
    pub allowed_origins: Vec<String>,

    #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
    pub temperature: f32,

    #[arg(long, default_value_t = DEFAULT_MAX_OUTPUT_TOKENS)]
    pub max_output_tokens: u32,

    /// Upper bound for opening a provider stream and for each idle read from it.
    #[arg(long, env = "PROVIDER_TIMEOUT_SECS", default_value_t = DEFAULT_PROVIDER_TIMEOUT_SECS)]
    pub provider_timeout_secs: u64,

    /// Provider round-trips a single chat request may spend on tool calls.
    #[arg(long, env = "MAX_TOOL_ROUNDS", default_value_t = DEFAULT_MAX_TOOL_ROUNDS)]
    pub max_tool_rounds: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            provider_base_url: DEFAULT_PROVIDER_BASE_URL.to_string(),
            discord_webhook_url: None,
            slack_webhook_url: None,
            webhook_timeout_secs: DEFAULT_WEBHOOK_TIMEOUT_SECS,
            port: DEFAULT_PORT,
            allowed_origins: DEFAULT_ALLOWED_ORIGINS.iter().map(|o| o.to_string()).collect(),
            temperature: DEFAULT_TEMPERATURE,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            provider_timeout_secs: DEFAULT_PROVIDER_TIMEOUT_SECS,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }
}

/// Which chat service an incoming webhook belongs to; they disagree on the payload key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookKind {
    Discord,
    Slack,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Webhook {
    pub kind: WebhookKind,
    pub url: Url,
}

impl Settings {
    /// The provider credential, or `Misconfigured` when it is absent or still the placeholder.
    pub fn api_key(&self) -> Result<&str, RelayError> {
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() && key != PLACEHOLDER_API_KEY => Ok(key),
            _ => Err(RelayError::Misconfigured { setting: API_KEY_VAR }),
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    /// Discord wins over Slack when both are set. Unparseable URLs are ignored with a warning.
    pub fn webhook(&self) -> Option<Webhook> {
        let candidates = [
            (WebhookKind::Discord, self.discord_webhook_url.as_deref()),
            (WebhookKind::Slack, self.slack_webhook_url.as_deref()),
        ];
        candidates.into_iter().find_map(|(kind, raw)| {
            let raw = raw.map(str::trim).filter(|r| !r.is_empty())?;
            match Url::parse(raw) {
                Ok(url) => Some(Webhook { kind, url }),
                Err(e) => {
                    warn!(?kind, error = %e, "Ignoring malformed webhook URL");
                    None
                }
            }
        })
    }

    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o.trim() == "*")
    }
}
