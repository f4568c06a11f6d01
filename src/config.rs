use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use url::Url;

use crate::models::AcceptedProjects;
use crate::util::env as env_util;

/// Site identifier the physical location must start with for a sync to apply.
pub const PSC_SITE: &str = "PSC";
pub const DEFAULT_SYSTEM_LABEL: &str = "System name not set";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Everything a sync attempt needs, read once at startup and never mutated.
#[derive(Clone)]
pub struct SyncConfig {
    pub psc_sync_url: Url,
    pub psc_sync_token: String,
    pub accepted_projects: AcceptedProjects,
    pub site_id: String,
    /// Deployment label stamped on every delivered payload (`Dev`, `Prod`, ...).
    pub system: String,
    pub request_timeout: Duration,
    pub slack: SlackConfig,
}

/// Slack channels and bot tokens; any missing piece disables that channel.
#[derive(Clone, Default)]
pub struct SlackConfig {
    pub status_channel: Option<String>,
    pub issues_channel: Option<String>,
    pub status_token: Option<String>,
    pub issues_token: Option<String>,
}

impl SlackConfig {
    pub fn from_env() -> Self {
        Self {
            status_channel: env_util::env_opt("SLACK_STATUS_CHANNEL"),
            issues_channel: env_util::env_opt("SLACK_ISSUES_CHANNEL"),
            status_token: env_util::env_opt("SLACK_STATUS_TOKEN"),
            issues_token: env_util::env_opt("SLACK_ISSUES_TOKEN"),
        }
    }

    pub fn is_configured(&self) -> bool {
        (self.status_channel.is_some() && self.status_token.is_some())
            || (self.issues_channel.is_some() && self.issues_token.is_some())
    }
}

impl SyncConfig {
    pub const REQUIRED_ENV: [&'static str; 3] =
        ["PSC_SYNC_URL", "PSC_SYNC_TOKEN", "PSC_SYNC_PROJECTS"];
    pub const OPTIONAL_ENV: [&'static str; 8] = [
        "PSC_SITE_ID",
        "SYSTEM",
        "PSC_SYNC_TIMEOUT_SECS",
        "DATABASE_URL",
        "APSVIZ_DB_HOST",
        "APSVIZ_DB_DATABASE",
        "SLACK_STATUS_CHANNEL",
        "SLACK_ISSUES_CHANNEL",
    ];

    /// Build configuration from environment variables (after loading `.env`).
    pub fn from_env() -> Result<Self> {
        env_util::init_env();

        let raw_url = env_util::env_req("PSC_SYNC_URL")?;
        let psc_sync_url = Url::parse(raw_url.trim())
            .with_context(|| format!("PSC_SYNC_URL is not a valid URL: {raw_url}"))?;
        let psc_sync_token = env_util::env_req("PSC_SYNC_TOKEN")?;

        let accepted_projects =
            AcceptedProjects::from_csv(&env_util::env_req("PSC_SYNC_PROJECTS")?);
        if accepted_projects.is_empty() {
            anyhow::bail!("PSC_SYNC_PROJECTS does not list any project code");
        }

        let site_id = site_id_from_env();
        let system =
            env_util::env_opt("SYSTEM").unwrap_or_else(|| DEFAULT_SYSTEM_LABEL.to_string());
        let timeout_secs: u64 =
            env_util::env_parse("PSC_SYNC_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS);

        Ok(Self {
            psc_sync_url,
            psc_sync_token,
            accepted_projects,
            site_id,
            system,
            request_timeout: Duration::from_secs(timeout_secs.max(1)),
            slack: SlackConfig::from_env(),
        })
    }

    /// Whether this location is served by the partner site.
    pub fn applies_to(&self, physical_location: &str) -> bool {
        location_applies(&self.site_id, physical_location)
    }
}

/// `PSC_SITE_ID`, or `PSC` when unset. Needs no other PSC setting, so callers
/// can gate a location before the full configuration exists.
pub fn site_id_from_env() -> String {
    env_util::env_opt("PSC_SITE_ID").unwrap_or_else(|| PSC_SITE.to_string())
}

/// Case-sensitive prefix match of a physical location against a site ID.
pub fn location_applies(site_id: &str, physical_location: &str) -> bool {
    physical_location.starts_with(site_id)
}

// Tokens stay out of logs.
impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("psc_sync_url", &self.psc_sync_url.as_str())
            .field("psc_sync_token", &"***")
            .field("accepted_projects", &self.accepted_projects)
            .field("site_id", &self.site_id)
            .field("system", &self.system)
            .field("request_timeout", &self.request_timeout)
            .field("slack", &self.slack)
            .finish()
    }
}

impl fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlackConfig")
            .field("status_channel", &self.status_channel)
            .field("issues_channel", &self.issues_channel)
            .field("status_token", &self.status_token.as_ref().map(|_| "***"))
            .field("issues_token", &self.issues_token.as_ref().map(|_| "***"))
            .finish()
    }
}
