use crate::SqliteTenantStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::instrument;
use uuid::Uuid;

/// Conversation state for one (tenant, end-user). Step 0 means no active
/// onboarding; the row may still exist to carry the owner-prompt guard.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRecord {
    pub tenant_id: String,
    pub user_id: String,
    pub step: i64,
    pub contact_name: Option<String>,
    pub phone: Option<String>,
    pub shop_label: Option<String>,
    pub location_lat: Option<f64>,
    pub location_lng: Option<f64>,
    pub location_address: Option<String>,
    pub payment_account: Option<String>,
    pub payment_note: Option<String>,
    pub payment_qr_ref: Option<String>,
    pub owner_prompt_sent: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn has_payment_detail(&self) -> bool {
        self.payment_account.is_some()
            || self.payment_note.is_some()
            || self.payment_qr_ref.is_some()
    }

    pub fn has_location(&self) -> bool {
        self.location_address.is_some() || (self.location_lat.is_some() && self.location_lng.is_some())
    }

    /// Fields still required before the session can finalize.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.contact_name.is_none() {
            missing.push("name");
        }
        if self.phone.is_none() {
            missing.push("phone");
        }
        if self.shop_label.is_none() {
            missing.push("shop");
        }
        if !self.has_location() {
            missing.push("location");
        }
        if !self.has_payment_detail() {
            missing.push("payment");
        }
        missing
    }

    /// Stable digest of the collected payload, used to collapse repeated
    /// finalizations of identical data into one request record.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{:?}|{:?}|{:?}|{}|{}|{}",
            self.contact_name.as_deref().unwrap_or(""),
            self.phone.as_deref().unwrap_or(""),
            self.shop_label.as_deref().unwrap_or(""),
            self.location_lat,
            self.location_lng,
            self.location_address,
            self.payment_account.as_deref().unwrap_or(""),
            self.payment_note.as_deref().unwrap_or(""),
            self.payment_qr_ref.as_deref().unwrap_or(""),
        )
    }
}

impl SqliteTenantStore {
    #[instrument(skip(self))]
    pub async fn session(&self, tenant_id: &str, user_id: &str) -> Result<Option<SessionRecord>> {
        sqlx::query_as::<_, SessionRecord>(
            "SELECT * FROM onboarding_sessions WHERE tenant_id = ? AND user_id = ?",
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_optional(self.pool())
        .await
        .context("Failed to fetch session")
    }

    /// Make sure a session row exists (step 0) without touching state that
    /// is already there.
    #[instrument(skip(self))]
    pub async fn ensure_session(&self, tenant_id: &str, user_id: &str) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO onboarding_sessions (tenant_id, user_id, step, created_at, updated_at)
            VALUES (?, ?, 0, ?, ?)
            ON CONFLICT (tenant_id, user_id) DO NOTHING
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .context("Failed to ensure session")?;
        Ok(())
    }

    /// Begin onboarding at the first collection step. Conditional on the
    /// session being idle so a racing duplicate cannot restart a flow in
    /// progress. Returns true when the session actually started.
    #[instrument(skip(self))]
    pub async fn start_session(&self, tenant_id: &str, user_id: &str) -> Result<bool> {
        self.ensure_session(tenant_id, user_id).await?;
        let result = sqlx::query(
            r#"
            UPDATE onboarding_sessions SET step = 1, updated_at = ?
            WHERE tenant_id = ? AND user_id = ? AND step = 0
            "#,
        )
        .bind(Utc::now())
        .bind(tenant_id)
        .bind(user_id)
        .execute(self.pool())
        .await
        .context("Failed to start session")?;
        Ok(result.rows_affected() == 1)
    }

    /// Persist the session's collected fields and new step, but only if the
    /// stored step still matches what this handler read. Lost races leave
    /// the other writer's state intact.
    #[instrument(skip(self, record), fields(tenant = %record.tenant_id, user = %record.user_id))]
    pub async fn update_session_if_step(
        &self,
        record: &SessionRecord,
        expected_step: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE onboarding_sessions SET
                step = ?,
                contact_name = ?,
                phone = ?,
                shop_label = ?,
                location_lat = ?,
                location_lng = ?,
                location_address = ?,
                payment_account = ?,
                payment_note = ?,
                payment_qr_ref = ?,
                updated_at = ?
            WHERE tenant_id = ? AND user_id = ? AND step = ?
            "#,
        )
        .bind(record.step)
        .bind(&record.contact_name)
        .bind(&record.phone)
        .bind(&record.shop_label)
        .bind(record.location_lat)
        .bind(record.location_lng)
        .bind(&record.location_address)
        .bind(&record.payment_account)
        .bind(&record.payment_note)
        .bind(&record.payment_qr_ref)
        .bind(Utc::now())
        .bind(&record.tenant_id)
        .bind(&record.user_id)
        .bind(expected_step)
        .execute(self.pool())
        .await
        .context("Failed to update session")?;
        Ok(result.rows_affected() == 1)
    }

    /// Flip the owner-prompt guard. Returns true only for the caller that
    /// flipped it, so the prompt goes out at most once.
    #[instrument(skip(self))]
    pub async fn mark_owner_prompted(&self, tenant_id: &str, user_id: &str) -> Result<bool> {
        self.ensure_session(tenant_id, user_id).await?;
        let result = sqlx::query(
            r#"
            UPDATE onboarding_sessions SET owner_prompt_sent = 1, updated_at = ?
            WHERE tenant_id = ? AND user_id = ? AND owner_prompt_sent = 0
            "#,
        )
        .bind(Utc::now())
        .bind(tenant_id)
        .bind(user_id)
        .execute(self.pool())
        .await
        .context("Failed to mark owner prompt")?;
        Ok(result.rows_affected() == 1)
    }

    /// Cancel: back to step 0 with all collected fields discarded.
    #[instrument(skip(self))]
    pub async fn cancel_session(&self, tenant_id: &str, user_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE onboarding_sessions SET
                step = 0,
                contact_name = NULL,
                phone = NULL,
                shop_label = NULL,
                location_lat = NULL,
                location_lng = NULL,
                location_address = NULL,
                payment_account = NULL,
                payment_note = NULL,
                payment_qr_ref = NULL,
                owner_prompt_sent = 0,
                updated_at = ?
            WHERE tenant_id = ? AND user_id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(tenant_id)
        .bind(user_id)
        .execute(self.pool())
        .await
        .context("Failed to cancel session")?;
        Ok(())
    }

    /// Finalize removes the session entirely.
    #[instrument(skip(self))]
    pub async fn delete_session(&self, tenant_id: &str, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM onboarding_sessions WHERE tenant_id = ? AND user_id = ?")
            .bind(tenant_id)
            .bind(user_id)
            .execute(self.pool())
            .await
            .context("Failed to delete session")?;
        Ok(())
    }

    /// Write the durable onboarding request produced by finalization. A
    /// pending request with the same fingerprint is touched instead of
    /// duplicated. Returns the request id.
    #[instrument(skip(self, session), fields(tenant = %session.tenant_id, user = %session.user_id))]
    pub async fn submit_onboarding_request(&self, session: &SessionRecord) -> Result<String> {
        let fingerprint = session.fingerprint();
        let now = Utc::now();

        let existing: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT id FROM onboarding_requests
            WHERE tenant_id = ? AND user_id = ? AND status = 'pending' AND fingerprint = ?
            LIMIT 1
            "#,
        )
        .bind(&session.tenant_id)
        .bind(&session.user_id)
        .bind(&fingerprint)
        .fetch_optional(self.pool())
        .await
        .context("Failed to check for duplicate onboarding request")?;

        if let Some((id,)) = existing {
            sqlx::query("UPDATE onboarding_requests SET last_submitted_at = ? WHERE id = ?")
                .bind(now)
                .bind(&id)
                .execute(self.pool())
                .await
                .context("Failed to touch onboarding request")?;
            return Ok(id);
        }

        let id = Uuid::new_v4().simple().to_string();
        sqlx::query(
            r#"
            INSERT INTO onboarding_requests
                (id, tenant_id, user_id, contact_name, phone, shop_label,
                 location_lat, location_lng, location_address,
                 payment_account, payment_note, payment_qr_ref,
                 status, fingerprint, created_at, last_submitted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&session.tenant_id)
        .bind(&session.user_id)
        .bind(session.contact_name.as_deref().unwrap_or_default())
        .bind(session.phone.as_deref().unwrap_or_default())
        .bind(session.shop_label.as_deref().unwrap_or_default())
        .bind(session.location_lat)
        .bind(session.location_lng)
        .bind(&session.location_address)
        .bind(&session.payment_account)
        .bind(&session.payment_note)
        .bind(&session.payment_qr_ref)
        .bind(&fingerprint)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .context("Failed to insert onboarding request")?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_is_conditional_on_idle_session() {
        let store = SqliteTenantStore::memory().await.unwrap();
        assert!(store.start_session("shop1", "U1").await.unwrap());
        // Already in progress: a second start must not reset the flow.
        assert!(!store.start_session("shop1", "U1").await.unwrap());
    }

    #[tokio::test]
    async fn step_update_requires_expected_step() {
        let store = SqliteTenantStore::memory().await.unwrap();
        store.start_session("shop1", "U1").await.unwrap();
        let mut session = store.session("shop1", "U1").await.unwrap().unwrap();
        session.contact_name = Some("Somchai".to_string());
        session.step = 2;
        assert!(store.update_session_if_step(&session, 1).await.unwrap());
        // A stale writer that still believes step == 1 loses.
        assert!(!store.update_session_if_step(&session, 1).await.unwrap());
    }

    #[tokio::test]
    async fn owner_prompt_fires_once() {
        let store = SqliteTenantStore::memory().await.unwrap();
        assert!(store.mark_owner_prompted("shop1", "U1").await.unwrap());
        assert!(!store.mark_owner_prompted("shop1", "U1").await.unwrap());
    }

    #[tokio::test]
    async fn cancel_discards_fields_and_resets_step() {
        let store = SqliteTenantStore::memory().await.unwrap();
        store.start_session("shop1", "U1").await.unwrap();
        let mut session = store.session("shop1", "U1").await.unwrap().unwrap();
        session.contact_name = Some("Somchai".to_string());
        session.step = 2;
        store.update_session_if_step(&session, 1).await.unwrap();

        store.cancel_session("shop1", "U1").await.unwrap();
        let session = store.session("shop1", "U1").await.unwrap().unwrap();
        assert_eq!(session.step, 0);
        assert!(session.contact_name.is_none());
    }

    #[tokio::test]
    async fn repeated_finalize_with_same_payload_reuses_request() {
        let store = SqliteTenantStore::memory().await.unwrap();
        store.start_session("shop1", "U1").await.unwrap();
        let mut session = store.session("shop1", "U1").await.unwrap().unwrap();
        session.contact_name = Some("Somchai".to_string());
        session.phone = Some("0812345678".to_string());
        session.shop_label = Some("Coffee".to_string());
        session.location_address = Some("Bangkok".to_string());
        session.payment_account = Some("0812345678".to_string());

        let first = store.submit_onboarding_request(&session).await.unwrap();
        let second = store.submit_onboarding_request(&session).await.unwrap();
        assert_eq!(first, second);
    }
}
