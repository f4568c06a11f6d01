use std::time::Duration;

use anyhow::Result;
use reqwest::{Client, StatusCode};
use tracing::{error, info, instrument};
use url::Url;

use crate::config::SyncConfig;
use crate::error::DeliveryError;
use crate::models::CatalogResult;

/// Destination for a filtered catalog payload.
#[async_trait::async_trait]
pub trait CatalogSink: Send + Sync {
    /// One delivery attempt. `true` only when the partner accepted the batch;
    /// failures are logged here and never propagate.
    async fn deliver(&self, result: &CatalogResult, run_id: &str) -> bool;
}

/// PSC partner web service client.
///
/// Pushes catalog payloads with a single authenticated POST:
/// - body: the `CatalogResult` as JSON
/// - auth: `Authorization: Bearer <PSC_SYNC_TOKEN>`
/// - success: HTTP 200 only (a 201 is a failure)
#[derive(Debug, Clone)]
pub struct PscProvider {
    url: Url,
    http: Client,
    token: String,
}

impl PscProvider {
    pub fn new(url: Url, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let builder = Client::builder()
            .user_agent(concat!("psc-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout);
        // Loopback stubs in tests must not be routed through HTTP_PROXY
        #[cfg(test)]
        let builder = builder.no_proxy();
        let http = builder.build()?;

        Ok(Self {
            url,
            http,
            token: token.into(),
        })
    }

    pub fn from_config(cfg: &SyncConfig) -> Result<Self> {
        Self::new(
            cfg.psc_sync_url.clone(),
            cfg.psc_sync_token.clone(),
            cfg.request_timeout,
        )
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// POST the payload once; no retries.
    #[instrument(skip(self, result))]
    pub async fn push(&self, result: &CatalogResult, run_id: &str) -> Result<(), DeliveryError> {
        let resp = self
            .http
            .post(self.url.clone())
            .bearer_auth(&self.token)
            .json(result)
            .send()
            .await?;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(DeliveryError::Status(status.as_u16()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CatalogSink for PscProvider {
    async fn deliver(&self, result: &CatalogResult, run_id: &str) -> bool {
        match self.push(result, run_id).await {
            Ok(()) => {
                info!(
                    run_id,
                    catalogs = result.catalogs().len(),
                    past_runs = result.past_runs().len(),
                    "PSC sync delivered"
                );
                true
            }
            Err(DeliveryError::Status(code)) => {
                error!(
                    run_id,
                    status = code,
                    "PSC sync failure code {code} for run id {run_id}"
                );
                false
            }
            Err(err) => {
                error!(
                    run_id,
                    error = %err,
                    "PSC sync transport failure for run id {run_id}"
                );
                false
            }
        }
    }
}
