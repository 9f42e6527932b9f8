//! Outbound API over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, Method};
use serde_json::Value;
use tracing::{debug, warn};

use sluice_core::{InteractionId, OutboundApi, TransportError, TransportResult};

/// Settings for [`HttpOutboundApi`].
#[derive(Debug, Clone)]
pub struct HttpOutboundConfig {
    /// API base, e.g. `https://discord.com/api/v10`.
    pub base_url: String,
    /// Application id, used in follow-up URLs.
    pub application_id: String,
    pub timeout: Duration,
}

impl HttpOutboundConfig {
    pub fn new(base_url: impl Into<String>, application_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            application_id: application_id.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// [`OutboundApi`] backed by `reqwest`.
pub struct HttpOutboundApi {
    client: Client,
    config: HttpOutboundConfig,
}

impl HttpOutboundApi {
    pub fn new(config: HttpOutboundConfig) -> TransportResult<Self> {
        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TransportError::Io(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    async fn send(&self, method: Method, url: String, body: Value) -> TransportResult<()> {
        debug!(method = %method, url = %url, "Sending outbound request");
        let resp = self
            .client
            .request(method, &url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(url = %url, status = status.as_u16(), "Outbound request rejected");
            return Err(TransportError::SendFailed(format!(
                "HTTP {} error: {}",
                status.as_u16(),
                text
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl OutboundApi for HttpOutboundApi {
    async fn send_callback(
        &self,
        interaction_id: &InteractionId,
        token: &str,
        body: Value,
    ) -> TransportResult<()> {
        let url = format!("{}/interactions/{}/{}/callback", self.base(), interaction_id, token);
        self.send(Method::POST, url, body).await
    }

    async fn send_followup(&self, token: &str, body: Value) -> TransportResult<()> {
        let url = format!(
            "{}/webhooks/{}/{}/messages/@original",
            self.base(),
            self.config.application_id,
            token
        );
        self.send(Method::PATCH, url, body).await
    }
}
