use crate::resolver::TenantResolver;
use crate::signature::verify_signature;
use shopline_core::error::EventError;
use shopline_core::metrics::MetricsStore;
use shopline_core::parse;
use shopline_core::types::{ChannelRole, EventKind, InboundEvent, TenantConfig, WebhookEnvelope};
use shopline_engine::Engine;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Composition root for one webhook delivery: resolve tenant, verify
/// signature, then run each event through dedup, context classification,
/// and the matching flow. One delivery carries a batch of independent
/// events; a failure in one never skips or corrupts its siblings.
pub struct EventRouter {
    resolver: Arc<TenantResolver>,
    engine: Arc<Engine>,
    metrics: Arc<MetricsStore>,
    event_budget: Duration,
}

impl EventRouter {
    pub fn new(
        resolver: Arc<TenantResolver>,
        engine: Arc<Engine>,
        metrics: Arc<MetricsStore>,
        event_budget_secs: u64,
    ) -> Self {
        Self {
            resolver,
            engine,
            metrics,
            event_budget: Duration::from_secs(event_budget_secs.max(1)),
        }
    }

    /// Returns the number of events accepted for processing. Request-level
    /// failures (unknown tenant, bad signature, missing secret) reject the
    /// whole delivery before any state is touched.
    pub async fn dispatch(
        &self,
        envelope: &WebhookEnvelope,
        raw_body: &[u8],
        signature: &str,
    ) -> Result<usize, EventError> {
        let destination = envelope.destination.as_deref().unwrap_or_default();
        let tenant = self.resolver.resolve(destination).await?;

        let secret = tenant.channel_secret_for(destination).ok_or_else(|| {
            EventError::ConfigurationError {
                tenant: tenant.tenant_id.clone(),
                what: "channel secret",
            }
        })?;
        if !verify_signature(secret, raw_body, signature) {
            warn!(tenant = %tenant.tenant_id, "invalid webhook signature");
            return Err(EventError::InvalidSignature {
                tenant: tenant.tenant_id.clone(),
            });
        }

        let context = tenant.classify(destination);
        let mut accepted = 0usize;

        for raw in &envelope.events {
            let Some(ev) = InboundEvent::from_webhook(raw) else {
                continue;
            };
            self.metrics.inc_events_in();
            accepted += 1;

            // Soft budget so one slow OCR or download cannot stall the
            // rest of the batch; then catch-and-log at the event boundary.
            let handled =
                tokio::time::timeout(self.event_budget, self.handle_event(&tenant, context, &ev))
                    .await;
            match handled {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_benign() => {
                    info!(
                        tenant = %tenant.tenant_id,
                        user = %ev.user_id,
                        event = ev.event_id.as_deref().unwrap_or("-"),
                        "{e}"
                    );
                }
                Ok(Err(e)) => {
                    self.metrics.inc_events_failed();
                    error!(
                        tenant = %tenant.tenant_id,
                        user = %ev.user_id,
                        event = ev.event_id.as_deref().unwrap_or("-"),
                        error = %e,
                        "event processing failed"
                    );
                }
                Err(_) => {
                    self.metrics.inc_events_failed();
                    error!(
                        tenant = %tenant.tenant_id,
                        user = %ev.user_id,
                        event = ev.event_id.as_deref().unwrap_or("-"),
                        "event processing exceeded budget"
                    );
                }
            }
        }

        Ok(accepted)
    }

    async fn handle_event(
        &self,
        tenant: &TenantConfig,
        context: ChannelRole,
        ev: &InboundEvent,
    ) -> Result<(), EventError> {
        let store = self.engine.store();

        let is_new = store
            .claim_event_once(&tenant.tenant_id, ev.event_id.as_deref())
            .await?;
        if !is_new {
            self.metrics.inc_events_duplicate();
            return Err(EventError::DuplicateEvent {
                event_id: ev.event_id.clone().unwrap_or_default(),
            });
        }

        let access_token = tenant.access_token_for(context);
        let is_owner = store.is_owner(&tenant.tenant_id, &ev.user_id).await?;

        self.engine
            .refresh_customer_profile(tenant, access_token, ev)
            .await;

        match ev.kind {
            EventKind::Text => {
                if is_owner {
                    let handled = self.engine.owner_text(tenant, access_token, ev).await?;
                    if !handled {
                        self.engine.fallback_text(tenant, access_token, ev).await?;
                    }
                    return Ok(());
                }
                match context {
                    ChannelRole::Admin => self.engine.onboarding_text(tenant, access_token, ev).await,
                    ChannelRole::Consumer => {
                        let text = ev.text.as_deref().unwrap_or_default();
                        if parse::is_owner_claim_keyword(text) {
                            self.engine.claim_ownership(tenant, access_token, ev).await
                        } else if parse::is_payment_claim(text) {
                            self.engine.payment_claim_text(tenant, access_token, ev).await
                        } else {
                            let prompted = self
                                .engine
                                .maybe_send_owner_prompt(tenant, access_token, ev)
                                .await?;
                            if !prompted {
                                self.engine.fallback_text(tenant, access_token, ev).await?;
                            }
                            Ok(())
                        }
                    }
                }
            }
            EventKind::Image => {
                if is_owner {
                    return self.engine.fallback_media(tenant, access_token, ev).await;
                }
                match context {
                    ChannelRole::Admin => self.engine.onboarding_image(tenant, access_token, ev).await,
                    ChannelRole::Consumer => self.engine.consumer_image(tenant, access_token, ev).await,
                }
            }
            EventKind::Location => {
                if is_owner {
                    self.engine.owner_location(tenant, access_token, ev).await
                } else if context == ChannelRole::Admin {
                    self.engine.onboarding_location(tenant, access_token, ev).await
                } else {
                    self.engine.fallback_text(tenant, access_token, ev).await
                }
            }
            EventKind::Postback | EventKind::Other => {
                info!(
                    tenant = %tenant.tenant_id,
                    user = %ev.user_id,
                    kind = ?ev.kind,
                    "skipping unsupported event kind"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::compute_signature;
    use anyhow::Result;
    use async_trait::async_trait;
    use shopline_core::cache::SystemClock;
    use shopline_core::config::Limits;
    use shopline_core::types::{ChannelRole, OutboundMessage, TenantChannel};
    use shopline_line::{ChatApi, Profile};
    use shopline_store::{MediaStore, SqliteTenantStore, StoredMedia};

    struct NoopChat;

    #[async_trait]
    impl ChatApi for NoopChat {
        async fn reply(&self, _t: &str, _r: &str, _m: &[OutboundMessage]) -> Result<()> {
            Ok(())
        }
        async fn push(&self, _t: &str, _u: &str, _m: &[OutboundMessage]) -> Result<()> {
            Ok(())
        }
        async fn get_profile(&self, _t: &str, _u: &str) -> Result<Profile> {
            Ok(Profile::default())
        }
        async fn get_content(&self, _t: &str, _m: &str) -> Result<Vec<u8>> {
            Ok(vec![0u8; 4])
        }
    }

    struct NullMedia;

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

    async fn build_router(secret: Option<&str>) -> (EventRouter, SqliteTenantStore) {
        let store = SqliteTenantStore::memory().await.unwrap();
        store.upsert_tenant("shop1").await.unwrap();
        store
            .upsert_channel(
                "shop1",
                &TenantChannel {
                    name: "storefront".to_string(),
                    role: ChannelRole::Consumer,
                    channel_id: "Ufront".to_string(),
                    legacy_channel_id: None,
                    channel_secret: secret.map(str::to_string),
                    access_token: Some("token".to_string()),
                },
            )
            .await
            .unwrap();

        let metrics = MetricsStore::new();
        let engine = Arc::new(Engine::new(
            store.clone(),
            Arc::new(NoopChat),
            None,
            Arc::new(NullMedia),
            metrics.clone(),
            Limits::default(),
            "https://portal.example.com".to_string(),
        ));
        let resolver = Arc::new(TenantResolver::new(
            store.clone(),
            60_000,
            Arc::new(SystemClock),
            None,
        ));
        (EventRouter::new(resolver, engine, metrics, 30), store)
    }

    fn claim_envelope(event_id: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "destination": "Ufront",
            "events": [{
                "type": "message",
                "webhookEventId": event_id,
                "replyToken": "r1",
                "source": { "userId": "C1" },
                "message": { "type": "text", "id": "m1", "text": "โอน 500" }
            }]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn redelivered_event_has_one_effect() {
        let (router, store) = build_router(Some("secret-s")).await;
        let body = claim_envelope("evt-1");
        let sig = compute_signature("secret-s", &body);
        let envelope: WebhookEnvelope = serde_json::from_slice(&body).unwrap();

        router.dispatch(&envelope, &body, &sig).await.unwrap();
        router.dispatch(&envelope, &body, &sig).await.unwrap();

        // Exactly one pending intent came out of the two deliveries.
        let intent = store
            .latest_pending_intent("shop1", 120, 50)
            .await
            .unwrap()
            .unwrap();
        store.confirm_intent(&intent.id).await.unwrap().unwrap();
        assert!(store
            .latest_pending_intent("shop1", 120, 50)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn bad_signature_rejects_before_any_dispatch() {
        let (router, store) = build_router(Some("secret-s")).await;
        let body = claim_envelope("evt-1");
        let envelope: WebhookEnvelope = serde_json::from_slice(&body).unwrap();

        let err = router
            .dispatch(&envelope, &body, "bm90LXRoZS1zaWduYXR1cmU=")
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::InvalidSignature { .. }));

        // No state transition happened.
        assert!(store
            .latest_pending_intent("shop1", 120, 50)
            .await
            .unwrap()
            .is_none());
        assert!(store.claim_event_once("shop1", Some("evt-1")).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_destination_is_not_found() {
        let (router, _store) = build_router(Some("secret-s")).await;
        let body = serde_json::to_vec(&serde_json::json!({
            "destination": "Uelsewhere",
            "events": []
        }))
        .unwrap();
        let envelope: WebhookEnvelope = serde_json::from_slice(&body).unwrap();
        let err = router
            .dispatch(&envelope, &body, "sig")
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::TenantNotFound { .. }));
    }

    #[tokio::test]
    async fn missing_secret_fails_closed() {
        let (router, _store) = build_router(None).await;
        let body = claim_envelope("evt-1");
        let envelope: WebhookEnvelope = serde_json::from_slice(&body).unwrap();
        let err = router.dispatch(&envelope, &body, "sig").await.unwrap_err();
        assert!(matches!(err, EventError::ConfigurationError { .. }));
    }

    #[tokio::test]
    async fn failing_event_does_not_abort_batch() {
        let (router, store) = build_router(Some("secret-s")).await;
        // First event is a claim with no amount (parse failure), the
        // second is a valid claim. Both share one delivery.
        let body = serde_json::to_vec(&serde_json::json!({
            "destination": "Ufront",
            "events": [
                {
                    "type": "message",
                    "webhookEventId": "evt-a",
                    "source": { "userId": "C1" },
                    "message": { "type": "text", "id": "ma", "text": "แจ้งโอนแล้วนะ" }
                },
                {
                    "type": "message",
                    "webhookEventId": "evt-b",
                    "source": { "userId": "C2" },
                    "message": { "type": "text", "id": "mb", "text": "โอน 700" }
                }
            ]
        }))
        .unwrap();
        let sig = compute_signature("secret-s", &body);
        let envelope: WebhookEnvelope = serde_json::from_slice(&body).unwrap();

        let accepted = router.dispatch(&envelope, &body, &sig).await.unwrap();
        assert_eq!(accepted, 2);

        let intent = store
            .latest_pending_intent("shop1", 120, 50)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(intent.customer_id, "C2");
        assert_eq!(intent.amount, 700.0);
    }
}
