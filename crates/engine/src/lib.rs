use shopline_core::config::Limits;
use shopline_core::error::EventError;
use shopline_core::metrics::MetricsStore;
use shopline_core::types::{InboundEvent, OutboundMessage, TenantConfig};
use shopline_line::ocr::OcrEngine;
use shopline_line::ChatApi;
use shopline_store::{MediaStore, SqliteTenantStore};
use std::sync::Arc;
use tracing::warn;

pub mod onboarding;
pub mod owners;
pub mod reconcile;

mod replies;

/// Conversation and reconciliation flows behind the event router. All chat
/// and OCR collaborators sit behind traits so tests drive the flows with
/// recording fakes.
pub struct Engine {
    store: SqliteTenantStore,
    chat: Arc<dyn ChatApi>,
    ocr: Option<Arc<dyn OcrEngine>>,
    media: Arc<dyn MediaStore>,
    metrics: Arc<MetricsStore>,
    limits: Limits,
    invite_base_url: String,
}

impl Engine {
    pub fn new(
        store: SqliteTenantStore,
        chat: Arc<dyn ChatApi>,
        ocr: Option<Arc<dyn OcrEngine>>,
        media: Arc<dyn MediaStore>,
        metrics: Arc<MetricsStore>,
        limits: Limits,
        invite_base_url: String,
    ) -> Self {
        Self {
            store,
            chat,
            ocr,
            media,
            metrics,
            limits,
            invite_base_url,
        }
    }

    pub fn store(&self) -> &SqliteTenantStore {
        &self.store
    }

    /// Answer on the event's reply token when one exists, otherwise push.
    /// Outbound failures are logged and swallowed: the stored state is the
    /// source of truth, not the notification.
    pub(crate) async fn respond(
        &self,
        tenant: &TenantConfig,
        access_token: Option<&str>,
        ev: &InboundEvent,
        messages: Vec<OutboundMessage>,
    ) {
        let Some(token) = access_token else {
            warn!(tenant = %tenant.tenant_id, "no access token; dropping outbound reply");
            return;
        };

        let result = match ev.reply_token.as_deref() {
            Some(reply_token) => self.chat.reply(token, reply_token, &messages).await,
            None => self.chat.push(token, &ev.user_id, &messages).await,
        };

        match result {
            Ok(()) => self.metrics.inc_messages_out(),
            Err(e) => warn!(
                tenant = %tenant.tenant_id,
                user = %ev.user_id,
                error = %e,
                "outbound send failed"
            ),
        }
    }

    /// Push to an arbitrary user (owner notifications, customer pushes).
    pub(crate) async fn push_to(
        &self,
        tenant: &TenantConfig,
        access_token: Option<&str>,
        user_id: &str,
        messages: Vec<OutboundMessage>,
    ) {
        let Some(token) = access_token else {
            warn!(tenant = %tenant.tenant_id, "no access token; dropping outbound push");
            return;
        };
        match self.chat.push(token, user_id, &messages).await {
            Ok(()) => self.metrics.inc_messages_out(),
            Err(e) => warn!(
                tenant = %tenant.tenant_id,
                user = %user_id,
                error = %e,
                "owner/customer push failed"
            ),
        }
    }

    /// Download message content from the platform and persist it to the
    /// media store, under the outbound timeout budget.
    pub(crate) async fn download_and_store(
        &self,
        tenant: &TenantConfig,
        access_token: Option<&str>,
        kind: &str,
        message_id: &str,
    ) -> anyhow::Result<shopline_store::StoredMedia> {
        let token = access_token.ok_or_else(|| anyhow::anyhow!("no access token"))?;
        let budget = std::time::Duration::from_secs(self.limits.outbound_timeout_secs.max(1));
        let content = tokio::time::timeout(budget, self.chat.get_content(token, message_id))
            .await
            .map_err(|_| anyhow::anyhow!("content download timed out"))??;
        self.media
            .store(&tenant.tenant_id, kind, message_id, &content)
            .await
    }

    /// Best-effort display-name refresh from the platform profile API.
    /// Failures only cost us a nicer name, so they are logged and dropped.
    pub async fn refresh_customer_profile(
        &self,
        tenant: &TenantConfig,
        access_token: Option<&str>,
        ev: &InboundEvent,
    ) {
        let Some(token) = access_token else {
            return;
        };
        let budget = std::time::Duration::from_secs(self.limits.outbound_timeout_secs.max(1));
        let display_name =
            match tokio::time::timeout(budget, self.chat.get_profile(token, &ev.user_id)).await {
                Ok(Ok(profile)) => profile.display_name,
                Ok(Err(e)) => {
                    warn!(tenant = %tenant.tenant_id, user = %ev.user_id, error = %e, "profile fetch failed");
                    None
                }
                Err(_) => None,
            };

        if let Err(e) = self
            .store
            .upsert_customer(&tenant.tenant_id, &ev.user_id, display_name.as_deref())
            .await
        {
            warn!(tenant = %tenant.tenant_id, user = %ev.user_id, error = %e, "customer upsert failed");
        }
    }

    /// Media from a sender outside any flow: persist it for the audit
    /// trail and acknowledge.
    pub async fn fallback_media(
        &self,
        tenant: &TenantConfig,
        access_token: Option<&str>,
        ev: &InboundEvent,
    ) -> Result<(), EventError> {
        let media_ref = match ev.message_id.as_deref() {
            Some(message_id) => match self
                .download_and_store(tenant, access_token, "image", message_id)
                .await
            {
                Ok(stored) => Some(stored.media_ref),
                Err(e) => {
                    warn!(tenant = %tenant.tenant_id, error = %e, "media storage failed");
                    None
                }
            },
            None => None,
        };

        self.store
            .save_message(&shopline_store::NewMessage {
                tenant_id: &tenant.tenant_id,
                user_id: &ev.user_id,
                direction: "inbound",
                text: "<image>",
                intent: Some("image"),
                media_ref: media_ref.as_deref(),
                media_message_id: ev.message_id.as_deref(),
            })
            .await?;
        self.respond(tenant, access_token, ev, vec![OutboundMessage::text(replies::ACK_GENERIC)])
            .await;
        Ok(())
    }

    /// Default path for text that matched no flow: log it and acknowledge,
    /// so the sender never faces a silent drop.
    pub async fn fallback_text(
        &self,
        tenant: &TenantConfig,
        access_token: Option<&str>,
        ev: &InboundEvent,
    ) -> Result<(), EventError> {
        if let Some(text) = ev.text.as_deref() {
            self.store
                .save_message(&shopline_store::NewMessage {
                    tenant_id: &tenant.tenant_id,
                    user_id: &ev.user_id,
                    direction: "inbound",
                    text,
                    intent: Some("message"),
                    media_ref: None,
                    media_message_id: None,
                })
                .await?;
        }
        self.respond(tenant, access_token, ev, vec![OutboundMessage::text(replies::ACK_GENERIC)])
            .await;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use shopline_line::ocr::OcrExtraction;
    use shopline_line::Profile;
    use shopline_store::StoredMedia;
    use std::sync::Mutex;

    /// Records every outbound call instead of talking to a platform.
    #[derive(Default)]
    pub struct RecordingChat {
        pub sent: Mutex<Vec<(String, String, String)>>,
        pub fail_sends: std::sync::atomic::AtomicBool,
    }

    impl RecordingChat {
        pub fn texts_to(&self, user: &str) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, to, _)| to == user)
                .map(|(_, _, text)| text.clone())
                .collect()
        }

        pub fn all_texts(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(_, _, text)| text.clone())
                .collect()
        }
    }

    #[async_trait]
    impl ChatApi for RecordingChat {
        async fn reply(
            &self,
            _token: &str,
            reply_token: &str,
            messages: &[OutboundMessage],
        ) -> Result<()> {
            if self.fail_sends.load(std::sync::atomic::Ordering::SeqCst) {
                anyhow::bail!("send failed");
            }
            let mut sent = self.sent.lock().unwrap();
            for m in messages {
                sent.push(("reply".to_string(), reply_token.to_string(), m.text.clone()));
            }
            Ok(())
        }

        async fn push(&self, _token: &str, user_id: &str, messages: &[OutboundMessage]) -> Result<()> {
            if self.fail_sends.load(std::sync::atomic::Ordering::SeqCst) {
                anyhow::bail!("send failed");
            }
            let mut sent = self.sent.lock().unwrap();
            for m in messages {
                sent.push(("push".to_string(), user_id.to_string(), m.text.clone()));
            }
            Ok(())
        }

        async fn get_profile(&self, _token: &str, _user_id: &str) -> Result<Profile> {
            Ok(Profile::default())
        }

        async fn get_content(&self, _token: &str, message_id: &str) -> Result<Vec<u8>> {
            Ok(format!("image-bytes-{message_id}").into_bytes())
        }
    }

    /// OCR fake returning a fixed extraction, or an error when unset.
    pub struct FakeOcr(pub Option<OcrExtraction>);

    #[async_trait]
    impl OcrEngine for FakeOcr {
        async fn extract_amount(&self, _image: &[u8]) -> Result<OcrExtraction> {
            match &self.0 {
                Some(x) => Ok(x.clone()),
                None => anyhow::bail!("ocr backend down"),
            }
        }
    }

    pub struct NullMedia;

    #[async_trait]
    impl MediaStore for NullMedia {
        async fn store(
            &self,
            tenant_id: &str,
            kind: &str,
            message_id: &str,
            content: &[u8],
        ) -> Result<StoredMedia> {
            Ok(StoredMedia {
                media_ref: format!("{tenant_id}/media/{kind}/{message_id}.jpg"),
                content_type: "image/jpeg".to_string(),
                size: content.len(),
            })
        }
    }

    pub async fn engine_with(
        chat: Arc<RecordingChat>,
        ocr: Option<Arc<dyn OcrEngine>>,
    ) -> Engine {
        let store = SqliteTenantStore::memory().await.unwrap();
        Engine::new(
            store,
            chat,
            ocr,
            Arc::new(NullMedia),
            MetricsStore::new(),
            Limits::default(),
            "https://portal.example.com".to_string(),
        )
    }

    pub fn tenant() -> TenantConfig {
        use shopline_core::types::{ChannelRole, TenantChannel};
        TenantConfig {
            tenant_id: "shop1".to_string(),
            active: true,
            channels: vec![
                TenantChannel {
                    name: "admin".to_string(),
                    role: ChannelRole::Admin,
                    channel_id: "Uadmin".to_string(),
                    legacy_channel_id: None,
                    channel_secret: Some("secret".to_string()),
                    access_token: Some("token".to_string()),
                },
                TenantChannel {
                    name: "storefront".to_string(),
                    role: ChannelRole::Consumer,
                    channel_id: "Ufront".to_string(),
                    legacy_channel_id: None,
                    channel_secret: Some("secret".to_string()),
                    access_token: Some("token".to_string()),
                },
            ],
        }
    }

    pub fn text_event(user: &str, text: &str) -> InboundEvent {
        use shopline_core::types::EventKind;
        InboundEvent {
            kind: EventKind::Text,
            user_id: user.to_string(),
            event_id: Some(uuid::Uuid::new_v4().simple().to_string()),
            message_id: None,
            reply_token: None,
            text: Some(text.to_string()),
            latitude: None,
            longitude: None,
            address: None,
            received_at: chrono::Utc::now(),
        }
    }

    pub fn image_event(user: &str, message_id: &str) -> InboundEvent {
        use shopline_core::types::EventKind;
        InboundEvent {
            kind: EventKind::Image,
            user_id: user.to_string(),
            event_id: Some(uuid::Uuid::new_v4().simple().to_string()),
            message_id: Some(message_id.to_string()),
            reply_token: None,
            text: None,
            latitude: None,
            longitude: None,
            address: None,
            received_at: chrono::Utc::now(),
        }
    }
}
