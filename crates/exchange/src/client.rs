//! Exchange client — posts OIP refill requests upstream.

use crate::wire::{OipRequest, OipResponse};
use async_trait::async_trait;
use pantry_core::config::ExchangeConfig;
use pantry_core::{PantryError, PantryResult};
use std::time::Duration;
use tracing::debug;

/// Trait seam for the upstream exchange, injected into the refill scheduler.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn fetch(&self, request: &OipRequest) -> PantryResult<OipResponse>;
}

/// HTTP implementation posting JSON to the configured OIP endpoint.
///
/// The client carries a request timeout; expiry surfaces as a transport
/// error and feeds the scheduler's retry backoff.
pub struct HttpExchangeClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpExchangeClient {
    pub fn new(config: &ExchangeConfig) -> PantryResult<Self> {
        let endpoint = url::Url::parse(&config.endpoint)
            .map_err(|e| PantryError::Config(format!("exchange endpoint: {e}")))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| PantryError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl ExchangeClient for HttpExchangeClient {
    async fn fetch(&self, request: &OipRequest) -> PantryResult<OipResponse> {
        debug!(endpoint = %self.endpoint, sizes = request.size_count(), "Posting refill request");

        let response = self
            .http
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| PantryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PantryError::Transport(format!(
                "exchange returned {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| PantryError::Transport(e.to_string()))?;

        serde_json::from_str(&body).map_err(|e| PantryError::MalformedResponse(e.to_string()))
    }
}
