use crate::{replies, Engine};
use shopline_core::error::EventError;
use shopline_core::parse;
use shopline_core::types::{InboundEvent, OutboundMessage, TenantConfig};
use shopline_store::SCOPE_OWNER_INVITE;
use tracing::info;

impl Engine {
    /// A recognized owner-claim keyword on the storefront context:
    /// register the sender as an owner candidate (the first active binding
    /// becomes primary) and send back a single-use invite link that binds
    /// their external identity.
    pub async fn claim_ownership(
        &self,
        tenant: &TenantConfig,
        access_token: Option<&str>,
        ev: &InboundEvent,
    ) -> Result<(), EventError> {
        let binding = self
            .store
            .bind_owner(&tenant.tenant_id, &ev.user_id, None)
            .await?;
        let link = self
            .store
            .mint_magic_link(
                &tenant.tenant_id,
                SCOPE_OWNER_INVITE,
                Some(&ev.user_id),
                self.limits.invite_ttl_mins,
            )
            .await?;

        let url = format!(
            "{}/owner/claim?tenant={}&token={}",
            self.invite_base_url.trim_end_matches('/'),
            tenant.tenant_id,
            link.token
        );
        info!(
            tenant = %tenant.tenant_id,
            user = %ev.user_id,
            primary = binding.is_primary,
            "owner candidate registered"
        );
        self.respond(
            tenant,
            access_token,
            ev,
            vec![OutboundMessage::text(replies::owner_invite(&url))],
        )
        .await;
        Ok(())
    }

    /// First-contact question on the storefront context, sent at most once
    /// per user. Returns true when the prompt went out this time.
    pub async fn maybe_send_owner_prompt(
        &self,
        tenant: &TenantConfig,
        access_token: Option<&str>,
        ev: &InboundEvent,
    ) -> Result<bool, EventError> {
        let newly_marked = self
            .store
            .mark_owner_prompted(&tenant.tenant_id, &ev.user_id)
            .await?;
        if newly_marked {
            self.respond(
                tenant,
                access_token,
                ev,
                vec![OutboundMessage::text(replies::OWNER_PROMPT)],
            )
            .await;
        }
        Ok(newly_marked)
    }

    /// Free text from a bound owner: review codes first, then a quote
    /// declaration, then profile field heuristics. Returns true when the
    /// text was consumed by one of those flows.
    pub async fn owner_text(
        &self,
        tenant: &TenantConfig,
        access_token: Option<&str>,
        ev: &InboundEvent,
    ) -> Result<bool, EventError> {
        let Some(text) = ev.text.as_deref() else {
            return Ok(false);
        };

        if let Some(action) = parse::parse_owner_action(text) {
            self.owner_review(tenant, access_token, ev, action).await?;
            return Ok(true);
        }

        if let Some(quote) = parse::parse_quote(text) {
            self.store
                .set_pending_quote(
                    &tenant.tenant_id,
                    quote.amount,
                    &quote.currency,
                    &ev.user_id,
                    Some(text),
                )
                .await?;
            info!(tenant = %tenant.tenant_id, amount = quote.amount, "pending quote set");
            self.respond(
                tenant,
                access_token,
                ev,
                vec![OutboundMessage::text(replies::quote_set(
                    quote.amount,
                    &quote.currency,
                ))],
            )
            .await;
            return Ok(true);
        }

        if let Some(field) = parse::parse_owner_profile_field(text) {
            self.store
                .upsert_owner_profile_field(&tenant.tenant_id, &field)
                .await?;
            info!(tenant = %tenant.tenant_id, user = %ev.user_id, ?field, "owner profile field saved");
            self.respond(
                tenant,
                access_token,
                ev,
                vec![OutboundMessage::text(replies::OWNER_PROFILE_SAVED)],
            )
            .await;
            return Ok(true);
        }

        Ok(false)
    }

    /// An owner sharing a location pin updates the shop profile.
    pub async fn owner_location(
        &self,
        tenant: &TenantConfig,
        access_token: Option<&str>,
        ev: &InboundEvent,
    ) -> Result<(), EventError> {
        self.store
            .upsert_owner_location(
                &tenant.tenant_id,
                ev.latitude,
                ev.longitude,
                ev.address.as_deref(),
            )
            .await?;
        self.respond(
            tenant,
            access_token,
            ev,
            vec![OutboundMessage::text(replies::OWNER_PROFILE_SAVED)],
        )
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::testutil::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn claim_binds_owner_and_sends_single_use_invite() {
        let chat = Arc::new(RecordingChat::default());
        let engine = engine_with(chat.clone(), None).await;
        let tenant = tenant();

        engine
            .claim_ownership(&tenant, Some("t"), &text_event("U1", "เจ้าของร้าน"))
            .await
            .unwrap();

        assert!(engine.store().is_owner("shop1", "U1").await.unwrap());
        assert_eq!(engine.store().primary_owner_count("shop1").await.unwrap(), 1);

        let invite = chat.texts_to("U1").pop().unwrap();
        assert!(invite.contains("/owner/claim?tenant=shop1&token="));

        let token = invite.rsplit("token=").next().unwrap().trim().to_string();
        assert!(engine
            .store()
            .consume_magic_link("shop1", &token)
            .await
            .unwrap()
            .is_some());
        assert!(engine
            .store()
            .consume_magic_link("shop1", &token)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn second_claimant_is_not_primary() {
        let chat = Arc::new(RecordingChat::default());
        let engine = engine_with(chat.clone(), None).await;
        let tenant = tenant();

        engine
            .claim_ownership(&tenant, Some("t"), &text_event("U1", "owner"))
            .await
            .unwrap();
        engine
            .claim_ownership(&tenant, Some("t"), &text_event("U2", "owner"))
            .await
            .unwrap();
        assert_eq!(engine.store().primary_owner_count("shop1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn owner_prompt_goes_out_once() {
        let chat = Arc::new(RecordingChat::default());
        let engine = engine_with(chat.clone(), None).await;
        let tenant = tenant();

        assert!(engine
            .maybe_send_owner_prompt(&tenant, Some("t"), &text_event("U1", "สวัสดี"))
            .await
            .unwrap());
        assert!(!engine
            .maybe_send_owner_prompt(&tenant, Some("t"), &text_event("U1", "อีกครั้ง"))
            .await
            .unwrap());
        assert_eq!(chat.texts_to("U1").len(), 1);
    }

    #[tokio::test]
    async fn owner_profile_field_from_free_text() {
        let chat = Arc::new(RecordingChat::default());
        let engine = engine_with(chat.clone(), None).await;
        let tenant = tenant();

        let handled = engine
            .owner_text(&tenant, Some("t"), &text_event("U1", "ชื่อร้าน: กาแฟดี"))
            .await
            .unwrap();
        assert!(handled);
        let profile = engine.store().owner_profile("shop1").await.unwrap().unwrap();
        assert_eq!(profile.business_name.as_deref(), Some("กาแฟดี"));
    }
}
