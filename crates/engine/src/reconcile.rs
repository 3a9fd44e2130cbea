use crate::{replies, Engine};
use shopline_core::error::EventError;
use shopline_core::parse::{self, OwnerAction};
use shopline_core::types::{InboundEvent, OutboundMessage, TenantConfig};
use shopline_store::{IntentRecord, NewIntent, NewMessage};
use tracing::{info, warn};

impl Engine {
    /// Customer text that reads as a payment claim. Parses the amount,
    /// creates a pending intent, pairs it with a recently sent receipt
    /// image when one exists, and notifies the owners for review.
    pub async fn payment_claim_text(
        &self,
        tenant: &TenantConfig,
        access_token: Option<&str>,
        ev: &InboundEvent,
    ) -> Result<(), EventError> {
        let text = ev.text.as_deref().unwrap_or_default();
        let Some(parsed) = parse::parse_amount(text) else {
            // Claim keywords without a readable amount: ask again rather
            // than guessing.
            self.store
                .save_message(&NewMessage {
                    tenant_id: &tenant.tenant_id,
                    user_id: &ev.user_id,
                    direction: "inbound",
                    text,
                    intent: Some("payment"),
                    media_ref: None,
                    media_message_id: None,
                })
                .await?;
            self.respond(
                tenant,
                access_token,
                ev,
                vec![OutboundMessage::text(replies::PAYMENT_AMOUNT_AGAIN)],
            )
            .await;
            return Err(EventError::ParseFailure { what: "amount" });
        };

        // An image sent moments before the claim is almost always its
        // receipt; pick it up as evidence.
        let recent_image = self
            .store
            .recent_inbound_image(
                &tenant.tenant_id,
                &ev.user_id,
                self.limits.recent_media_lookback_mins,
                self.limits.recency_scan_limit,
            )
            .await?;
        let (evidence_ref, evidence_message_id) = match &recent_image {
            Some(m) => (m.media_ref.clone(), m.media_message_id.clone()),
            None => (None, None),
        };

        let intent = self
            .store
            .create_intent(&NewIntent {
                tenant_id: tenant.tenant_id.clone(),
                customer_id: ev.user_id.clone(),
                amount: parsed.amount,
                currency: parsed.currency.clone(),
                evidence_ref,
                evidence_message_id,
                ocr_amount: None,
                ocr_confidence: None,
                ocr_verdict: None,
                created_at: ev.received_at,
            })
            .await?;
        self.metrics.inc_intents_created();
        info!(
            tenant = %tenant.tenant_id,
            user = %ev.user_id,
            intent = %intent.id,
            amount = parsed.amount,
            has_evidence = intent.has_evidence(),
            "payment intent created from text"
        );

        self.store
            .save_message(&NewMessage {
                tenant_id: &tenant.tenant_id,
                user_id: &ev.user_id,
                direction: "inbound",
                text,
                intent: Some("payment"),
                media_ref: None,
                media_message_id: None,
            })
            .await?;

        let code = intent.confirm_code.clone().unwrap_or_default();
        let review = replies::owner_review(
            intent.amount,
            &intent.currency,
            intent.has_evidence(),
            &code,
        );
        self.notify_owners(tenant, access_token, &review).await?;

        self.respond(
            tenant,
            access_token,
            ev,
            vec![OutboundMessage::text(replies::PAYMENT_CLAIM_ACK)],
        )
        .await;
        Ok(())
    }

    /// Customer image on the storefront context. New evidence first tries
    /// to attach to an existing intent; otherwise it opens an
    /// evidence-first intent, running OCR only while an owner quote is
    /// active and comparing within the configured tolerance.
    pub async fn consumer_image(
        &self,
        tenant: &TenantConfig,
        access_token: Option<&str>,
        ev: &InboundEvent,
    ) -> Result<(), EventError> {
        let Some(message_id) = ev.message_id.clone() else {
            self.respond(tenant, access_token, ev, vec![OutboundMessage::text(replies::ACK_GENERIC)])
                .await;
            return Ok(());
        };

        // Download and persist the receipt. Storage failure must not stop
        // the flow: the message id still references the evidence upstream.
        let (media_ref, content) = match self
            .download_content(tenant, access_token, &message_id)
            .await
        {
            Ok(bytes) => {
                match self
                    .media
                    .store(&tenant.tenant_id, "image", &message_id, &bytes)
                    .await
                {
                    Ok(stored) => (Some(stored.media_ref), Some(bytes)),
                    Err(e) => {
                        warn!(tenant = %tenant.tenant_id, error = %e, "evidence storage failed");
                        (None, Some(bytes))
                    }
                }
            }
            Err(e) => {
                warn!(tenant = %tenant.tenant_id, error = %e, "evidence download failed");
                (None, None)
            }
        };

        self.store
            .save_message(&NewMessage {
                tenant_id: &tenant.tenant_id,
                user_id: &ev.user_id,
                direction: "inbound",
                text: "<image>",
                intent: Some("image"),
                media_ref: media_ref.as_deref(),
                media_message_id: Some(&message_id),
            })
            .await?;

        let attached = self
            .store
            .attach_recent_intent_by_user(
                &tenant.tenant_id,
                &ev.user_id,
                media_ref.as_deref(),
                Some(&message_id),
                self.limits.attach_window_mins,
                self.limits.recency_scan_limit,
            )
            .await?;
        if let Some(intent) = attached {
            info!(
                tenant = %tenant.tenant_id,
                intent = %intent.id,
                "evidence attached to existing intent"
            );
            self.respond(
                tenant,
                access_token,
                ev,
                vec![OutboundMessage::text(replies::SLIP_RECEIVED_ACK)],
            )
            .await;
            return Ok(());
        }

        self.evidence_first_intent(tenant, access_token, ev, &message_id, media_ref, content)
            .await
    }

    async fn evidence_first_intent(
        &self,
        tenant: &TenantConfig,
        access_token: Option<&str>,
        ev: &InboundEvent,
        message_id: &str,
        media_ref: Option<String>,
        content: Option<Vec<u8>>,
    ) -> Result<(), EventError> {
        let quote = self
            .store
            .active_quote(&tenant.tenant_id, self.limits.quote_ttl_mins)
            .await?;

        let mut amount = 0.0;
        let mut currency = "THB".to_string();
        let mut ocr_amount = None;
        let mut ocr_confidence = None;
        let mut ocr_verdict = None;

        if let Some(quote) = &quote {
            amount = quote.amount;
            currency = quote.currency.clone();

            // OCR only runs while a quote is active: it is the cost and
            // noise gate, and it gives the comparison a target.
            match self.run_ocr(content.as_deref()).await {
                Ok(extraction) => {
                    ocr_confidence = extraction.confidence;
                    if let Some(read) = extraction.amount {
                        ocr_amount = Some(read);
                        if (read - quote.amount).abs() <= self.limits.ocr_tolerance {
                            ocr_verdict = Some("match".to_string());
                            amount = read;
                        } else {
                            ocr_verdict = Some("mismatch".to_string());
                        }
                    }
                }
                Err(e) => {
                    warn!(tenant = %tenant.tenant_id, error = %e, "ocr degraded to manual review");
                }
            }
        }

        let intent = self
            .store
            .create_intent(&NewIntent {
                tenant_id: tenant.tenant_id.clone(),
                customer_id: ev.user_id.clone(),
                amount,
                currency,
                evidence_ref: media_ref,
                evidence_message_id: Some(message_id.to_string()),
                ocr_amount,
                ocr_confidence,
                ocr_verdict: ocr_verdict.clone(),
                created_at: ev.received_at,
            })
            .await?;
        self.metrics.inc_intents_created();
        info!(
            tenant = %tenant.tenant_id,
            user = %ev.user_id,
            intent = %intent.id,
            verdict = ocr_verdict.as_deref().unwrap_or("manual"),
            "payment intent created from evidence"
        );

        let code = intent.confirm_code.clone().unwrap_or_default();
        // Mismatched or unverified amounts are withheld from the owner so
        // a wrong OCR read cannot anchor the manual check.
        let review = if ocr_verdict.as_deref() == Some("match") {
            replies::owner_review_ocr_match(intent.amount, &intent.currency, &code)
        } else {
            replies::owner_review_manual(&code)
        };
        self.notify_owners(tenant, access_token, &review).await?;

        self.respond(
            tenant,
            access_token,
            ev,
            vec![OutboundMessage::text(replies::SLIP_RECEIVED_ACK)],
        )
        .await;
        Ok(())
    }

    async fn run_ocr(
        &self,
        content: Option<&[u8]>,
    ) -> Result<shopline_line::ocr::OcrExtraction, EventError> {
        let ocr = self.ocr.as_ref().ok_or(EventError::EvidenceUnavailable {
            reason: "ocr not configured".to_string(),
        })?;
        let content = content.ok_or(EventError::EvidenceUnavailable {
            reason: "no image content".to_string(),
        })?;
        let budget = std::time::Duration::from_secs(self.limits.ocr_timeout_secs.max(1));
        match tokio::time::timeout(budget, ocr.extract_amount(content)).await {
            Ok(Ok(extraction)) => Ok(extraction),
            Ok(Err(e)) => Err(EventError::EvidenceUnavailable {
                reason: e.to_string(),
            }),
            Err(_) => Err(EventError::EvidenceUnavailable {
                reason: "ocr timed out".to_string(),
            }),
        }
    }

    /// Owner confirm/reject, addressed by short code or "most recent
    /// pending". Nothing pending is a polite no-op: retransmitted or stale
    /// decisions must never crash the conversation.
    pub async fn owner_review(
        &self,
        tenant: &TenantConfig,
        access_token: Option<&str>,
        ev: &InboundEvent,
        action: OwnerAction,
    ) -> Result<(), EventError> {
        let (code, confirm) = match &action {
            OwnerAction::Confirm { code } => (code.clone(), true),
            OwnerAction::Reject { code } => (code.clone(), false),
        };

        let intent = match code {
            Some(code) => {
                self.store
                    .pending_intent_by_code(&tenant.tenant_id, &code, self.limits.recency_scan_limit)
                    .await?
            }
            None => {
                self.store
                    .latest_pending_intent(
                        &tenant.tenant_id,
                        self.limits.review_window_mins,
                        self.limits.recency_scan_limit,
                    )
                    .await?
            }
        };

        let Some(intent) = intent else {
            // Acknowledge, then report the no-op so the dispatch boundary
            // logs it at the benign level.
            self.respond(
                tenant,
                access_token,
                ev,
                vec![OutboundMessage::text(replies::OWNER_NOTHING_PENDING)],
            )
            .await;
            return Err(EventError::NoPendingIntent);
        };

        if confirm {
            self.confirm(tenant, access_token, ev, intent).await
        } else {
            self.reject(tenant, access_token, ev, intent).await
        }
    }

    async fn confirm(
        &self,
        tenant: &TenantConfig,
        access_token: Option<&str>,
        ev: &InboundEvent,
        intent: IntentRecord,
    ) -> Result<(), EventError> {
        // The conditional transition means a concurrent duplicate decision
        // collapses to the nothing-pending branch.
        let Some(payment) = self.store.confirm_intent(&intent.id).await? else {
            self.respond(
                tenant,
                access_token,
                ev,
                vec![OutboundMessage::text(replies::OWNER_NOTHING_PENDING)],
            )
            .await;
            return Err(EventError::NoPendingIntent);
        };

        self.metrics.inc_intents_confirmed();
        info!(
            tenant = %tenant.tenant_id,
            intent = %intent.id,
            payment = %payment.id,
            "intent confirmed into payment"
        );

        self.respond(
            tenant,
            access_token,
            ev,
            vec![OutboundMessage::text(replies::OWNER_CONFIRM_ACK)],
        )
        .await;
        self.push_to(
            tenant,
            access_token,
            &payment.customer_id,
            vec![OutboundMessage::text(replies::customer_confirmed(
                payment.amount,
                &payment.currency,
            ))],
        )
        .await;
        Ok(())
    }

    async fn reject(
        &self,
        tenant: &TenantConfig,
        access_token: Option<&str>,
        ev: &InboundEvent,
        intent: IntentRecord,
    ) -> Result<(), EventError> {
        if !self.store.reject_intent(&intent.id).await? {
            self.respond(
                tenant,
                access_token,
                ev,
                vec![OutboundMessage::text(replies::OWNER_NOTHING_PENDING)],
            )
            .await;
            return Err(EventError::NoPendingIntent);
        }

        self.metrics.inc_intents_rejected();
        info!(tenant = %tenant.tenant_id, intent = %intent.id, "intent rejected");

        self.respond(
            tenant,
            access_token,
            ev,
            vec![OutboundMessage::text(replies::OWNER_REJECT_ACK)],
        )
        .await;
        self.push_to(
            tenant,
            access_token,
            &intent.customer_id,
            vec![OutboundMessage::text(replies::CUSTOMER_REJECTED)],
        )
        .await;
        Ok(())
    }

    /// Push a review prompt, with the two fixed codes as quick replies, to
    /// every active owner.
    async fn notify_owners(
        &self,
        tenant: &TenantConfig,
        access_token: Option<&str>,
        text: &str,
    ) -> Result<(), EventError> {
        let owners = self.store.list_owners(&tenant.tenant_id).await?;
        if owners.is_empty() {
            warn!(tenant = %tenant.tenant_id, "no owners bound; review prompt has no audience");
            return Ok(());
        }
        for owner in owners {
            let msg = OutboundMessage::text(text)
                .with_quick_reply("ยืนยัน", parse::CONFIRM_CODE)
                .with_quick_reply("ปัดตก", parse::REJECT_CODE);
            self.push_to(tenant, access_token, &owner, vec![msg]).await;
        }
        Ok(())
    }

    async fn download_content(
        &self,
        _tenant: &TenantConfig,
        access_token: Option<&str>,
        message_id: &str,
    ) -> anyhow::Result<Vec<u8>> {
        let token = access_token.ok_or_else(|| anyhow::anyhow!("no access token"))?;
        let budget = std::time::Duration::from_secs(self.limits.outbound_timeout_secs.max(1));
        tokio::time::timeout(budget, self.chat.get_content(token, message_id))
            .await
            .map_err(|_| anyhow::anyhow!("content download timed out"))?
    }
}
