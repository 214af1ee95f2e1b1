use std::time::Duration;

use async_trait::async_trait;
use minijinja::{context, Environment};
use reqwest::Client;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::config::{Webhook, WebhookKind, DEFAULT_WEBHOOK_TIMEOUT_SECS};
use crate::leads::Lead;

const NOT_SPECIFIED: &str = "Not specified";

const LEAD_SUMMARY: &str = "**New Lead Captured**

**Name:** {{ name }}
**Email:** {{ email }}
**Project:** {{ project }}
**Budget:** {{ budget }}
**Priority:** {{ priority }}
**Timeline:** {{ timeline }}
**Company:** {{ company }}
**Lead ID:** {{ id }}
**Captured At:** {{ captured_at }}";

/// Told about every lead right after it is stored.
///
/// Best effort: implementations log their own failures and never report them,
/// so a broken notification can't undo or delay a capture.
#[async_trait]
pub trait LeadNotifier: Send + Sync {
    async fn notify(&self, lead: &Lead);
}

/// Posts a markdown summary to a Discord or Slack incoming webhook.
pub struct WebhookNotifier {
    client: Client,
    webhook: Option<Webhook>,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(client: Client, webhook: Option<Webhook>) -> Self {
        Self {
            client,
            webhook,
            timeout: Duration::from_secs(DEFAULT_WEBHOOK_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl LeadNotifier for WebhookNotifier {
    #[instrument(skip(self, lead), fields(lead_id = %lead.id))]
    async fn notify(&self, lead: &Lead) {
        let Some(webhook) = &self.webhook else {
            info!("No webhook URL configured. Lead saved locally only.");
            return;
        };

        let summary = match render_summary(lead) {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "Failed to render lead notification");
                return;
            }
        };
        let payload = match webhook.kind {
            WebhookKind::Discord => json!({ "content": summary }),
            WebhookKind::Slack => json!({ "text": summary }),
        };

        let request = self
            .client
            .post(webhook.url.clone())
            .timeout(self.timeout)
            .json(&payload);
        match request.send().await {
            Ok(response) if response.status().is_success() => {
                info!("Webhook notification sent successfully");
            }
            Ok(response) => {
                warn!(status = %response.status(), "Webhook rejected lead notification");
            }
            Err(e) => {
                warn!(error = %e, "Failed to send webhook notification");
            }
        }
    }
}

/// Human-readable lead summary used as the webhook message body.
pub fn render_summary(lead: &Lead) -> Result<String, minijinja::Error> {
    let mut env = Environment::new();
    env.add_template("lead_summary.txt", LEAD_SUMMARY)?;
    let template = env.get_template("lead_summary.txt")?;
    template.render(context! {
        name => &lead.name,
        email => &lead.email,
        project => &lead.project_summary,
        budget => lead.budget.map(|b| b.as_str()).unwrap_or(NOT_SPECIFIED),
        priority => lead.priority.map(|p| p.as_str()).unwrap_or(NOT_SPECIFIED),
        timeline => lead.timeline.as_deref().unwrap_or(NOT_SPECIFIED),
        company => lead.company_name.as_deref().unwrap_or(NOT_SPECIFIED),
        id => &lead.id,
        captured_at => lead.captured_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    })
}
