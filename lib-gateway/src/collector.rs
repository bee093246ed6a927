//! External collector client
//!
//! The collector's contract: `POST /api/messages` with a JSON body of
//! `{deviceId, deviceName, timestamp, messages}` in UTF-8 with ISO-8601
//! dates. Any 2xx is success; the response body is not parsed. The collector
//! deduplicates by message id, so re-delivery and reordering are safe.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lib_protocol::UPLOAD_TIMEOUT;
use serde::Serialize;
use serde_json::Value;

/// One sync tick's upload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadBatch {
    pub device_id: String,
    pub device_name: String,
    pub timestamp: DateTime<Utc>,
    /// Wire-encoded envelopes.
    pub messages: Vec<Value>,
}

/// Seam between the uploader and the collector, so tests can stand in for
/// the HTTP side.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Deliver one batch. `Ok` means the collector acknowledged with 2xx.
    async fn push(&self, batch: &UploadBatch) -> Result<()>;
}

/// The production collector client.
pub struct HttpCollector {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCollector {
    /// Build a client for the given `/api/messages` endpoint URL.
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .build()
            .context("building collector http client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Collector for HttpCollector {
    async fn push(&self, batch: &UploadBatch) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("X-Device-ID", &batch.device_id)
            .json(batch)
            .send()
            .await
            .context("collector request failed")?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            bail!("collector returned {status}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_serializes_with_camel_case_keys() {
        let batch = UploadBatch {
            device_id: "dev-1".into(),
            device_name: "Pigeon-dev1".into(),
            timestamp: Utc::now(),
            messages: vec![],
        };
        let value = serde_json::to_value(&batch).expect("serialize");
        assert!(value.get("deviceId").is_some());
        assert!(value.get("deviceName").is_some());
        assert!(value["timestamp"].as_str().expect("string").contains('T'));
    }
}
