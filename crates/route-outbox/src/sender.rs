//! Route submission over HTTP.

use crate::{OutboxError, OutboxResult, QueueItem};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Sender configuration.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Base URL of the API; submissions go to `<base>/routes`.
    pub api_base_url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8081/api".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Delivers a single queue item. One call is one attempt.
#[async_trait]
pub trait RouteSubmitter: Send + Sync {
    async fn submit(&self, token: &str, item: &QueueItem) -> OutboxResult<()>;
}

/// Posts payloads to `<base>/routes` with a bearer token.
pub struct HttpRouteSubmitter {
    client: Client,
    routes_url: String,
}

impl HttpRouteSubmitter {
    /// Create a submitter with its own HTTP client.
    pub fn new(config: SenderConfig) -> OutboxResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            routes_url: format!("{}/routes", config.api_base_url.trim_end_matches('/')),
        })
    }

    pub fn routes_url(&self) -> &str {
        &self.routes_url
    }
}

#[async_trait]
impl RouteSubmitter for HttpRouteSubmitter {
    async fn submit(&self, token: &str, item: &QueueItem) -> OutboxResult<()> {
        debug!(url = %self.routes_url, item_id = %item.id, "Submitting route");

        let response = self
            .client
            .post(&self.routes_url)
            .header("Authorization", format!("Bearer {}", token))
            .json(&item.payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OutboxError::Send(format!("HTTP {}: {}", status, body)));
        }

        Ok(())
    }
}
