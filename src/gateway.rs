use anyhow::{Context, Result};
use serde_json::Value;
use std::time::Duration;

/// Read-only client for the decentralized storage gateway. A traceability
/// record is an arbitrary JSON document addressed by its content hash; the
/// display tabs consume it as-is.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build gateway HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub async fn fetch_record(&self, hash: &str) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, hash);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("Failed to reach the storage gateway")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("Gateway returned status {} for hash {}", status, hash);
        }

        resp.json()
            .await
            .context("Gateway record is not valid JSON")
    }
}
