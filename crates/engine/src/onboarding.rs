use crate::{replies, Engine};
use shopline_core::error::EventError;
use shopline_core::parse;
use shopline_core::types::{InboundEvent, OutboundMessage, TenantConfig};
use shopline_store::{NewMessage, SessionRecord};
use tracing::{info, warn};

/// Onboarding collection steps. The ordinal is what the store persists;
/// transitions only ever move to the next ordinal, back to 0 on cancel, or
/// delete the row on finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    None,
    CollectName,
    CollectPhone,
    CollectLabel,
    CollectLocation,
    CollectPaymentChannel,
}

impl Step {
    pub fn from_ordinal(step: i64) -> Self {
        match step {
            1 => Step::CollectName,
            2 => Step::CollectPhone,
            3 => Step::CollectLabel,
            4 => Step::CollectLocation,
            5 => Step::CollectPaymentChannel,
            _ => Step::None,
        }
    }

    fn prompt(&self) -> &'static str {
        match self {
            Step::None => replies::NOT_IN_FLOW,
            Step::CollectName => replies::ASK_NAME_AGAIN,
            Step::CollectPhone => replies::ASK_PHONE_AGAIN,
            Step::CollectLabel => replies::ASK_LABEL_AGAIN,
            Step::CollectLocation => replies::ASK_LOCATION_AGAIN,
            Step::CollectPaymentChannel => replies::ASK_PAYMENT,
        }
    }
}

impl Engine {
    /// Text on the administrative context from a non-owner sender drives
    /// the onboarding flow.
    pub async fn onboarding_text(
        &self,
        tenant: &TenantConfig,
        access_token: Option<&str>,
        ev: &InboundEvent,
    ) -> Result<(), EventError> {
        let Some(text) = ev.text.as_deref() else {
            return self.fallback_text(tenant, access_token, ev).await;
        };

        self.store
            .save_message(&NewMessage {
                tenant_id: &tenant.tenant_id,
                user_id: &ev.user_id,
                direction: "inbound",
                text,
                intent: Some("onboarding"),
                media_ref: None,
                media_message_id: None,
            })
            .await?;

        if parse::is_start_keyword(text) {
            return self.start_onboarding(tenant, access_token, ev).await;
        }

        let session = self.store.session(&tenant.tenant_id, &ev.user_id).await?;
        let Some(session) = session.filter(|s| s.step > 0) else {
            self.respond(tenant, access_token, ev, vec![OutboundMessage::text(replies::NOT_IN_FLOW)])
                .await;
            return Ok(());
        };

        if parse::is_cancel_keyword(text) {
            self.store
                .cancel_session(&tenant.tenant_id, &ev.user_id)
                .await?;
            info!(tenant = %tenant.tenant_id, user = %ev.user_id, "onboarding cancelled");
            self.respond(tenant, access_token, ev, vec![OutboundMessage::text(replies::CANCELLED)])
                .await;
            return Ok(());
        }

        if parse::is_confirm_keyword(text) {
            return self.finalize_onboarding(tenant, access_token, ev, session).await;
        }

        self.collect_step_input(tenant, access_token, ev, session, text)
            .await
    }

    async fn start_onboarding(
        &self,
        tenant: &TenantConfig,
        access_token: Option<&str>,
        ev: &InboundEvent,
    ) -> Result<(), EventError> {
        let started = self
            .store
            .start_session(&tenant.tenant_id, &ev.user_id)
            .await?;
        let reply = if started {
            info!(tenant = %tenant.tenant_id, user = %ev.user_id, "onboarding started");
            replies::ASK_NAME
        } else {
            // Already mid-flow: repeat the current step instead of resetting.
            let session = self.store.session(&tenant.tenant_id, &ev.user_id).await?;
            let step = session.map(|s| s.step).unwrap_or(0);
            Step::from_ordinal(step).prompt()
        };
        self.respond(tenant, access_token, ev, vec![OutboundMessage::text(reply)])
            .await;
        Ok(())
    }

    /// One semantic input per step; a valid input advances exactly one
    /// ordinal, anything else re-prompts without advancing.
    async fn collect_step_input(
        &self,
        tenant: &TenantConfig,
        access_token: Option<&str>,
        ev: &InboundEvent,
        mut session: SessionRecord,
        text: &str,
    ) -> Result<(), EventError> {
        let current = session.step;
        let reply: &str = match Step::from_ordinal(current) {
            Step::CollectName => {
                if text.chars().count() >= 2 {
                    session.contact_name = Some(text.to_string());
                    session.step = 2;
                    replies::ASK_PHONE
                } else {
                    replies::ASK_NAME_AGAIN
                }
            }
            Step::CollectPhone => match parse::normalize_phone_th(text) {
                Some(phone) => {
                    session.phone = Some(phone);
                    session.step = 3;
                    replies::ASK_LABEL
                }
                None => replies::ASK_PHONE_AGAIN,
            },
            Step::CollectLabel => {
                if text.chars().count() >= 2 {
                    session.shop_label = Some(text.to_string());
                    session.step = 4;
                    replies::ASK_LOCATION
                } else {
                    replies::ASK_LABEL_AGAIN
                }
            }
            Step::CollectLocation => {
                if text.chars().count() >= 4 {
                    session.location_address = Some(text.to_string());
                    session.step = 5;
                    replies::ASK_PAYMENT
                } else {
                    replies::ASK_LOCATION_AGAIN
                }
            }
            Step::CollectPaymentChannel => {
                // Step 5 keeps accepting refinements without advancing.
                if let Some(account) = parse::normalize_phone_th(text) {
                    session.payment_account = Some(account);
                } else if session.payment_account.is_none() && text.chars().all(|c| c.is_ascii_digit())
                {
                    session.payment_account = Some(text.to_string());
                } else {
                    session.payment_note = Some(text.to_string());
                }
                replies::PAYMENT_SAVED
            }
            Step::None => replies::NOT_IN_FLOW,
        };

        if session.step != current || Step::from_ordinal(current) == Step::CollectPaymentChannel {
            let updated = self.store.update_session_if_step(&session, current).await?;
            if !updated {
                // Lost a step race; the other writer's prompt stands.
                warn!(tenant = %tenant.tenant_id, user = %ev.user_id, step = current, "session step moved underneath us");
                return Ok(());
            }
        }

        self.respond(tenant, access_token, ev, vec![OutboundMessage::text(reply)])
            .await;
        Ok(())
    }

    async fn finalize_onboarding(
        &self,
        tenant: &TenantConfig,
        access_token: Option<&str>,
        ev: &InboundEvent,
        session: SessionRecord,
    ) -> Result<(), EventError> {
        let missing = session.missing_fields();
        if !missing.is_empty() {
            // Incomplete: keep the session and tell the user what's left.
            self.respond(
                tenant,
                access_token,
                ev,
                vec![OutboundMessage::text(replies::finalize_missing(&missing))],
            )
            .await;
            return Ok(());
        }

        let request_id = self.store.submit_onboarding_request(&session).await?;
        self.store
            .delete_session(&tenant.tenant_id, &ev.user_id)
            .await?;
        info!(
            tenant = %tenant.tenant_id,
            user = %ev.user_id,
            request = %request_id,
            "onboarding finalized"
        );
        self.respond(tenant, access_token, ev, vec![OutboundMessage::text(replies::FINALIZED)])
            .await;
        Ok(())
    }

    /// A shared location event satisfies the location step.
    pub async fn onboarding_location(
        &self,
        tenant: &TenantConfig,
        access_token: Option<&str>,
        ev: &InboundEvent,
    ) -> Result<(), EventError> {
        let session = self.store.session(&tenant.tenant_id, &ev.user_id).await?;
        let Some(mut session) = session.filter(|s| s.step == 4) else {
            self.respond(tenant, access_token, ev, vec![OutboundMessage::text(replies::ACK_GENERIC)])
                .await;
            return Ok(());
        };

        session.location_lat = ev.latitude;
        session.location_lng = ev.longitude;
        session.location_address = ev.address.clone();
        session.step = 5;
        if self.store.update_session_if_step(&session, 4).await? {
            self.respond(tenant, access_token, ev, vec![OutboundMessage::text(replies::ASK_PAYMENT)])
                .await;
        }
        Ok(())
    }

    /// An image at the payment step is treated as a payment QR.
    pub async fn onboarding_image(
        &self,
        tenant: &TenantConfig,
        access_token: Option<&str>,
        ev: &InboundEvent,
    ) -> Result<(), EventError> {
        let session = self.store.session(&tenant.tenant_id, &ev.user_id).await?;
        let Some(mut session) = session.filter(|s| s.step == 5) else {
            self.respond(tenant, access_token, ev, vec![OutboundMessage::text(replies::ACK_GENERIC)])
                .await;
            return Ok(());
        };

        let media_ref = match ev.message_id.as_deref() {
            Some(message_id) => match self.download_and_store(tenant, access_token, "image", message_id).await {
                Ok(stored) => Some(stored.media_ref),
                Err(e) => {
                    warn!(tenant = %tenant.tenant_id, error = %e, "payment QR storage failed");
                    None
                }
            },
            None => None,
        };

        session.payment_qr_ref = media_ref;
        if self.store.update_session_if_step(&session, 5).await? {
            self.respond(tenant, access_token, ev, vec![OutboundMessage::text(replies::PAYMENT_SAVED)])
                .await;
        }
        Ok(())
    }
}
