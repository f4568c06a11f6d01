//! Best-effort operational messages. Nothing here may change a sync outcome:
//! every failure is logged and dropped.
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::SlackConfig;

const SLACK_POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";
const SLACK_TIMEOUT: Duration = Duration::from_secs(5);
/// Deployments that actually post to Slack; everything else only logs.
const POSTING_SYSTEMS: [&str; 3] = ["Dev", "Prod", "AWS/EKS"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Status,
    Issues,
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str, channel: Channel);
}

/// Notifier that discards every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait::async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _message: &str, _channel: Channel) {}
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

pub struct SlackNotifier {
    http: Client,
    system: String,
    config: SlackConfig,
    endpoint: String,
}

impl SlackNotifier {
    pub fn new(system: impl Into<String>, config: SlackConfig) -> anyhow::Result<Self> {
        let builder = Client::builder().timeout(SLACK_TIMEOUT);
        #[cfg(test)]
        let builder = builder.no_proxy();
        let http = builder.build()?;
        Ok(Self {
            http,
            system: system.into(),
            config,
            endpoint: SLACK_POST_MESSAGE_URL.to_string(),
        })
    }

    #[cfg(test)]
    fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn format_message(&self, message: &str) -> String {
        format!("APSViz PSCSync ({}) - {}", self.system, message)
    }

    fn posts_for_system(&self) -> bool {
        POSTING_SYSTEMS.contains(&self.system.as_str())
    }

    fn target(&self, channel: Channel) -> Option<(&str, &str)> {
        let (chan, token) = match channel {
            Channel::Status => (&self.config.status_channel, &self.config.status_token),
            Channel::Issues => (&self.config.issues_channel, &self.config.issues_token),
        };
        Some((chan.as_deref()?, token.as_deref()?))
    }

    async fn post(&self, channel: &str, token: &str, text: &str) -> anyhow::Result<()> {
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&json!({ "channel": channel, "text": text }))
            .send()
            .await?
            .error_for_status()?;
        let body: SlackResponse = resp.json().await?;
        if !body.ok {
            anyhow::bail!(
                "slack rejected message: {}",
                body.error.unwrap_or_else(|| "unknown error".into())
            );
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, message: &str, channel: Channel) {
        let text = self.format_message(message);
        info!(target: "notify", ?channel, "{text}");

        if !self.posts_for_system() {
            return;
        }
        let Some((chan, token)) = self.target(channel) else {
            return;
        };
        if let Err(e) = self.post(chan, token, &text).await {
            warn!(target: "notify", channel = chan, error = %e, "Slack messaging failed");
        }
    }
}
