use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use shopline_core::types::OutboundMessage;
use std::time::{Duration as StdDuration, SystemTime, UNIX_EPOCH};
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

pub mod ocr;

#[derive(Debug, Clone, Default)]
pub struct Profile {
    pub display_name: Option<String>,
    pub picture_url: Option<String>,
}

/// Chat platform boundary. Everything here is best-effort from the core's
/// perspective: callers catch failures locally and degrade. The trait seam
/// lets engine tests substitute a recording fake.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Reply within the event's reply window.
    async fn reply(
        &self,
        access_token: &str,
        reply_token: &str,
        messages: &[OutboundMessage],
    ) -> Result<()>;

    /// Push outside a reply window.
    async fn push(
        &self,
        access_token: &str,
        user_id: &str,
        messages: &[OutboundMessage],
    ) -> Result<()>;

    async fn get_profile(&self, access_token: &str, user_id: &str) -> Result<Profile>;

    /// Download binary message content (receipt images).
    async fn get_content(&self, access_token: &str, message_id: &str) -> Result<Vec<u8>>;
}

#[derive(Clone)]
pub struct LineClient {
    api_base: String,
    content_api_base: String,
    retry_jitter_ms: u64,
    client: Client,
}

impl LineClient {
    pub fn new(
        api_base: Option<String>,
        content_api_base: Option<String>,
        timeout_secs: u64,
        retry_jitter_ms: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(timeout_secs.max(1)))
            .build()
            .unwrap_or_default();
        Self {
            api_base: api_base.unwrap_or_else(|| "https://api.line.me".to_string()),
            content_api_base: content_api_base
                .unwrap_or_else(|| "https://api-data.line.me".to_string()),
            retry_jitter_ms,
            client,
        }
    }

    fn jitter_delay(&self, attempt: u32) -> StdDuration {
        if self.retry_jitter_ms == 0 {
            return StdDuration::from_millis(0);
        }
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let jitter = (seed ^ ((attempt as u64) << 7)) % (self.retry_jitter_ms + 1);
        StdDuration::from_millis(jitter)
    }

    fn render_messages(messages: &[OutboundMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| {
                let mut msg = json!({ "type": "text", "text": m.text });
                if !m.quick_replies.is_empty() {
                    let items: Vec<Value> = m
                        .quick_replies
                        .iter()
                        .map(|q| {
                            json!({
                                "type": "action",
                                "action": { "type": "message", "label": q.label, "text": q.text }
                            })
                        })
                        .collect();
                    msg["quickReply"] = json!({ "items": items });
                }
                msg
            })
            .collect()
    }

    async fn post_with_retry(&self, token: &str, url: &str, payload: &Value) -> Result<()> {
        let mut delay = Duration::from_secs(1);
        for attempt in 1..=3 {
            let resp = self
                .client
                .post(url)
                .bearer_auth(token)
                .json(payload)
                .send()
                .await;

            match resp {
                Ok(r) if r.status().is_success() => {
                    info!(attempt, url = %url, "outbound sent");
                    return Ok(());
                }
                Ok(r) => {
                    let status = r.status();
                    // 4xx will not heal on retry; surface it immediately.
                    if status.is_client_error() {
                        let body = r.text().await.unwrap_or_default();
                        anyhow::bail!("outbound rejected: {} {}", status, body);
                    }
                    let body = r.text().await.unwrap_or_default();
                    warn!(attempt, %status, body = %body, "outbound failed");
                }
                Err(e) => {
                    warn!(attempt, error = %e, "outbound network error");
                }
            }

            sleep(delay + self.jitter_delay(attempt)).await;
            delay *= 2;
        }

        anyhow::bail!("failed to deliver message after retries")
    }
}

#[async_trait]
impl ChatApi for LineClient {
    async fn reply(
        &self,
        access_token: &str,
        reply_token: &str,
        messages: &[OutboundMessage],
    ) -> Result<()> {
        let url = format!("{}/v2/bot/message/reply", self.api_base.trim_end_matches('/'));
        let payload = json!({
            "replyToken": reply_token,
            "messages": Self::render_messages(messages),
        });
        self.post_with_retry(access_token, &url, &payload).await
    }

    async fn push(
        &self,
        access_token: &str,
        user_id: &str,
        messages: &[OutboundMessage],
    ) -> Result<()> {
        let url = format!("{}/v2/bot/message/push", self.api_base.trim_end_matches('/'));
        let payload = json!({
            "to": user_id,
            "messages": Self::render_messages(messages),
        });
        self.post_with_retry(access_token, &url, &payload).await
    }

    async fn get_profile(&self, access_token: &str, user_id: &str) -> Result<Profile> {
        let url = format!(
            "{}/v2/bot/profile/{}",
            self.api_base.trim_end_matches('/'),
            user_id
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?;
        let body: Value = resp.json().await?;
        Ok(Profile {
            display_name: body
                .get("displayName")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            picture_url: body
                .get("pictureUrl")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        })
    }

    async fn get_content(&self, access_token: &str, message_id: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/v2/bot/message/{}/content",
            self.content_api_base.trim_end_matches('/'),
            message_id
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_quick_reply_buttons() {
        let msg = OutboundMessage::text("review")
            .with_quick_reply("ยืนยัน", "1010")
            .with_quick_reply("ปัดตก", "0011");
        let rendered = LineClient::render_messages(&[msg]);
        assert_eq!(rendered.len(), 1);
        let items = rendered[0]["quickReply"]["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["action"]["text"], "1010");
    }

    #[test]
    fn plain_text_has_no_quick_reply_block() {
        let rendered = LineClient::render_messages(&[OutboundMessage::text("hi")]);
        assert!(rendered[0].get("quickReply").is_none());
    }
}
