use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration as StdDuration;

/// Result of optical amount extraction from a receipt image.
#[derive(Debug, Clone, Deserialize)]
pub struct OcrExtraction {
    pub amount: Option<f64>,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub status: String,
}

/// OCR collaborator boundary. Failures degrade to manual verification, so
/// implementations only need to be honest, not reliable.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn extract_amount(&self, image: &[u8]) -> Result<OcrExtraction>;
}

pub struct HttpOcr {
    api_base: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpOcr {
    pub fn new(api_base: String, api_key: Option<String>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(timeout_secs.max(1)))
            .build()
            .unwrap_or_default();
        Self {
            api_base,
            api_key,
            client,
        }
    }
}

#[async_trait]
impl OcrEngine for HttpOcr {
    async fn extract_amount(&self, image: &[u8]) -> Result<OcrExtraction> {
        let url = format!("{}/v1/extract-amount", self.api_base.trim_end_matches('/'));
        let mut req = self
            .client
            .post(&url)
            .header("content-type", "application/octet-stream")
            .body(image.to_vec());
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?.error_for_status()?;
        Ok(resp.json::<OcrExtraction>().await?)
    }
}
