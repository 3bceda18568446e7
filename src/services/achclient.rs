//! HTTP accessor for the ACH codec service.
//!
//! The ACH service owns per-transfer entry files; this client fetches their
//! raw NACHA contents by file id for merging.

use anyhow::{anyhow, Result};
use reqwest::Client;
use std::time::Duration;
use uuid::Uuid;

#[derive(Clone)]
pub struct AchClient {
    client: Client,
    endpoint: String,
}

impl AchClient {
    pub fn new(endpoint: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("build reqwest client");
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    fn build_address(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    pub async fn ping(&self) -> Result<()> {
        let resp = self
            .client
            .get(self.build_address("/ping"))
            .send()
            .await
            .map_err(|e| anyhow!("ACH ping failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(anyhow!("ACH ping returned {}", resp.status()));
        }
        Ok(())
    }

    /// Raw NACHA contents of a file held by the ACH service.
    pub async fn file_contents(&self, file_id: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(self.build_address(&format!("/files/{file_id}/contents")))
            .header("x-idempotency-key", Uuid::new_v4().to_string())
            .send()
            .await
            .map_err(|e| anyhow!("fetching ACH file {file_id}: {e}"))?;
        if !resp.status().is_success() {
            return Err(anyhow!(
                "fetching ACH file {file_id}: status {}",
                resp.status()
            ));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}
