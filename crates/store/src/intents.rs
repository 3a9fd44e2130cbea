use crate::SqliteTenantStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
pub enum IntentStatus {
    Pending,
    Confirmed,
    Rejected,
}

/// A staged payment claim awaiting owner review. Append-only: status
/// transitions are terminal, rows are never deleted.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IntentRecord {
    pub id: String,
    pub tenant_id: String,
    pub customer_id: String,
    pub amount: f64,
    pub currency: String,
    pub status: IntentStatus,
    pub evidence_ref: Option<String>,
    pub evidence_message_id: Option<String>,
    pub ocr_amount: Option<f64>,
    pub ocr_confidence: Option<f64>,
    pub ocr_verdict: Option<String>,
    pub confirm_code: Option<String>,
    pub payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IntentRecord {
    pub fn has_evidence(&self) -> bool {
        self.evidence_ref.is_some() || self.evidence_message_id.is_some()
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentRecord {
    pub id: String,
    pub tenant_id: String,
    pub customer_id: String,
    pub amount: f64,
    pub currency: String,
    pub method: String,
    pub status: String,
    pub evidence_ref: Option<String>,
    pub evidence_message_id: Option<String>,
    pub intent_id: Option<String>,
    pub paid_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Parameters for a new intent. `created_at` is the event arrival time so
/// review windows measure against the claim, not the insert.
#[derive(Debug, Clone)]
pub struct NewIntent {
    pub tenant_id: String,
    pub customer_id: String,
    pub amount: f64,
    pub currency: String,
    pub evidence_ref: Option<String>,
    pub evidence_message_id: Option<String>,
    pub ocr_amount: Option<f64>,
    pub ocr_confidence: Option<f64>,
    pub ocr_verdict: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SqliteTenantStore {
    /// Create a pending intent. The short confirm code owners can type is
    /// the tail of the id; it is an addressing convenience, not a secret.
    #[instrument(skip(self, intent), fields(tenant = %intent.tenant_id, customer = %intent.customer_id))]
    pub async fn create_intent(&self, intent: &NewIntent) -> Result<IntentRecord> {
        let id = Uuid::new_v4().simple().to_string();
        let confirm_code = id[id.len() - 6..].to_string();

        sqlx::query(
            r#"
            INSERT INTO payment_intents
                (id, tenant_id, customer_id, amount, currency, status,
                 evidence_ref, evidence_message_id, ocr_amount, ocr_confidence,
                 ocr_verdict, confirm_code, payment_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 'pending', ?, ?, ?, ?, ?, ?, NULL, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&intent.tenant_id)
        .bind(&intent.customer_id)
        .bind(intent.amount)
        .bind(&intent.currency)
        .bind(&intent.evidence_ref)
        .bind(&intent.evidence_message_id)
        .bind(intent.ocr_amount)
        .bind(intent.ocr_confidence)
        .bind(&intent.ocr_verdict)
        .bind(&confirm_code)
        .bind(intent.created_at)
        .bind(intent.created_at)
        .execute(self.pool())
        .await
        .context("Failed to create payment intent")?;

        self.intent(&id)
            .await?
            .context("Intent vanished after insert")
    }

    #[instrument(skip(self))]
    pub async fn intent(&self, intent_id: &str) -> Result<Option<IntentRecord>> {
        sqlx::query_as::<_, IntentRecord>("SELECT * FROM payment_intents WHERE id = ?")
            .bind(intent_id)
            .fetch_optional(self.pool())
            .await
            .context("Failed to fetch intent")
    }

    /// Recent intents for a tenant, newest first. Bounded recency read:
    /// callers apply their own predicates in memory instead of relying on
    /// compound server-side filters. `scan_limit` is the scalability knob.
    async fn recent_intents(&self, tenant_id: &str, scan_limit: i64) -> Result<Vec<IntentRecord>> {
        sqlx::query_as::<_, IntentRecord>(
            r#"
            SELECT * FROM payment_intents
            WHERE tenant_id = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(tenant_id)
        .bind(scan_limit)
        .fetch_all(self.pool())
        .await
        .context("Failed to scan recent intents")
    }

    /// Most recent pending intent inside the review window, if any.
    #[instrument(skip(self))]
    pub async fn latest_pending_intent(
        &self,
        tenant_id: &str,
        window_mins: i64,
        scan_limit: i64,
    ) -> Result<Option<IntentRecord>> {
        let since = Utc::now() - Duration::minutes(window_mins);
        let recent = self.recent_intents(tenant_id, scan_limit).await?;
        Ok(recent
            .into_iter()
            .find(|i| i.status == IntentStatus::Pending && i.created_at >= since))
    }

    /// Pending intent addressed by its short confirm code.
    #[instrument(skip(self))]
    pub async fn pending_intent_by_code(
        &self,
        tenant_id: &str,
        code: &str,
        scan_limit: i64,
    ) -> Result<Option<IntentRecord>> {
        let recent = self.recent_intents(tenant_id, scan_limit).await?;
        Ok(recent.into_iter().find(|i| {
            i.status == IntentStatus::Pending && i.confirm_code.as_deref() == Some(code)
        }))
    }

    /// Attach new receipt evidence to the customer's most recent pending
    /// intent in the window that has none yet. If no pending intent
    /// qualifies, the evidence backfills the most recent evidence-less
    /// confirmed intent (and its payment record): confirmation must not
    /// block late-arriving evidence.
    #[instrument(skip(self, evidence_ref, message_id))]
    pub async fn attach_recent_intent_by_user(
        &self,
        tenant_id: &str,
        customer_id: &str,
        evidence_ref: Option<&str>,
        message_id: Option<&str>,
        window_mins: i64,
        scan_limit: i64,
    ) -> Result<Option<IntentRecord>> {
        if evidence_ref.is_none() && message_id.is_none() {
            return Ok(None);
        }
        let since = Utc::now() - Duration::minutes(window_mins);

        let rows = sqlx::query_as::<_, IntentRecord>(
            r#"
            SELECT * FROM payment_intents
            WHERE tenant_id = ? AND customer_id = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(tenant_id)
        .bind(customer_id)
        .bind(scan_limit)
        .fetch_all(self.pool())
        .await
        .context("Failed to scan intents for attachment")?;

        let mut target: Option<&IntentRecord> = None;
        for row in &rows {
            if row.created_at < since || row.has_evidence() {
                continue;
            }
            match row.status {
                IntentStatus::Pending => {
                    target = Some(row);
                    break;
                }
                IntentStatus::Confirmed if row.payment_id.is_some() => {
                    if target.is_none() {
                        target = Some(row);
                    }
                }
                _ => {}
            }
        }

        let Some(target) = target else {
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE payment_intents SET
                evidence_ref = COALESCE(?, evidence_ref),
                evidence_message_id = COALESCE(?, evidence_message_id),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(evidence_ref)
        .bind(message_id)
        .bind(Utc::now())
        .bind(&target.id)
        .execute(self.pool())
        .await
        .context("Failed to attach evidence to intent")?;

        if target.status == IntentStatus::Confirmed {
            if let Some(payment_id) = &target.payment_id {
                self.attach_payment_evidence(payment_id, evidence_ref, message_id)
                    .await?;
            }
        }

        self.intent(&target.id).await
    }

    /// Convert a pending intent into a confirmed payment record. The
    /// status transition is a single conditional write, so retransmitted
    /// confirms (or a racing second owner) mint exactly one payment.
    /// Returns None when the intent is no longer pending.
    #[instrument(skip(self))]
    pub async fn confirm_intent(&self, intent_id: &str) -> Result<Option<PaymentRecord>> {
        let Some(intent) = self.intent(intent_id).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        let payment_id = Uuid::new_v4().simple().to_string();

        let mut tx = self.pool().begin().await.context("begin confirm_intent")?;

        let claimed = sqlx::query(
            r#"
            UPDATE payment_intents
            SET status = 'confirmed', payment_id = ?, updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(&payment_id)
        .bind(now)
        .bind(intent_id)
        .execute(&mut *tx)
        .await
        .context("Failed to mark intent confirmed")?;

        if claimed.rows_affected() != 1 {
            tx.rollback().await.ok();
            return Ok(None);
        }

        sqlx::query(
            r#"
            INSERT INTO payments
                (id, tenant_id, customer_id, amount, currency, method, status,
                 evidence_ref, evidence_message_id, intent_id, paid_at,
                 confirmed_at, created_at)
            VALUES (?, ?, ?, ?, ?, 'transfer', 'confirmed', ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&payment_id)
        .bind(&intent.tenant_id)
        .bind(&intent.customer_id)
        .bind(intent.amount)
        .bind(&intent.currency)
        .bind(&intent.evidence_ref)
        .bind(&intent.evidence_message_id)
        .bind(&intent.id)
        .bind(intent.created_at)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to insert payment record")?;

        tx.commit().await.context("commit confirm_intent")?;
        self.payment(&payment_id).await
    }

    /// Terminal reject. Returns false when the intent was not pending.
    #[instrument(skip(self))]
    pub async fn reject_intent(&self, intent_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payment_intents SET status = 'rejected', updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(Utc::now())
        .bind(intent_id)
        .execute(self.pool())
        .await
        .context("Failed to reject intent")?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    pub async fn payment(&self, payment_id: &str) -> Result<Option<PaymentRecord>> {
        sqlx::query_as::<_, PaymentRecord>("SELECT * FROM payments WHERE id = ?")
            .bind(payment_id)
            .fetch_optional(self.pool())
            .await
            .context("Failed to fetch payment")
    }

    #[instrument(skip(self, evidence_ref, message_id))]
    pub async fn attach_payment_evidence(
        &self,
        payment_id: &str,
        evidence_ref: Option<&str>,
        message_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE payments SET
                evidence_ref = COALESCE(?, evidence_ref),
                evidence_message_id = COALESCE(?, evidence_message_id)
            WHERE id = ?
            "#,
        )
        .bind(evidence_ref)
        .bind(message_id)
        .bind(payment_id)
        .execute(self.pool())
        .await
        .context("Failed to attach payment evidence")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_intent(tenant: &str, customer: &str, amount: f64) -> NewIntent {
        NewIntent {
            tenant_id: tenant.to_string(),
            customer_id: customer.to_string(),
            amount,
            currency: "THB".to_string(),
            evidence_ref: None,
            evidence_message_id: None,
            ocr_amount: None,
            ocr_confidence: None,
            ocr_verdict: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn confirm_is_terminal_and_idempotent() {
        let store = SqliteTenantStore::memory().await.unwrap();
        let intent = store
            .create_intent(&new_intent("shop1", "C1", 500.0))
            .await
            .unwrap();

        let payment = store.confirm_intent(&intent.id).await.unwrap().unwrap();
        assert_eq!(payment.amount, 500.0);
        assert_eq!(payment.status, "confirmed");

        // Second confirm: no second payment, no error.
        assert!(store.confirm_intent(&intent.id).await.unwrap().is_none());
        // Reject after confirm is also a no-op.
        assert!(!store.reject_intent(&intent.id).await.unwrap());

        let stored = store.intent(&intent.id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Confirmed);
        assert_eq!(stored.payment_id.as_deref(), Some(payment.id.as_str()));
    }

    #[tokio::test]
    async fn latest_pending_respects_window() {
        let store = SqliteTenantStore::memory().await.unwrap();
        let mut old = new_intent("shop1", "C1", 100.0);
        old.created_at = Utc::now() - Duration::minutes(300);
        store.create_intent(&old).await.unwrap();

        assert!(store
            .latest_pending_intent("shop1", 120, 50)
            .await
            .unwrap()
            .is_none());

        let fresh = store
            .create_intent(&new_intent("shop1", "C1", 200.0))
            .await
            .unwrap();
        let found = store
            .latest_pending_intent("shop1", 120, 50)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, fresh.id);
    }

    #[tokio::test]
    async fn attach_prefers_pending_then_backfills_confirmed() {
        let store = SqliteTenantStore::memory().await.unwrap();
        let intent = store
            .create_intent(&new_intent("shop1", "C1", 500.0))
            .await
            .unwrap();

        let attached = store
            .attach_recent_intent_by_user("shop1", "C1", Some("media/slip1"), Some("m1"), 60, 50)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attached.id, intent.id);
        assert_eq!(attached.evidence_ref.as_deref(), Some("media/slip1"));

        // Evidence already present: a second image finds nothing to claim.
        assert!(store
            .attach_recent_intent_by_user("shop1", "C1", Some("media/slip2"), Some("m2"), 60, 50)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn attach_backfills_confirmed_payment() {
        let store = SqliteTenantStore::memory().await.unwrap();
        let intent = store
            .create_intent(&new_intent("shop1", "C1", 500.0))
            .await
            .unwrap();
        let payment = store.confirm_intent(&intent.id).await.unwrap().unwrap();

        let attached = store
            .attach_recent_intent_by_user("shop1", "C1", Some("media/slip1"), Some("m1"), 60, 50)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attached.id, intent.id);

        let payment = store.payment(&payment.id).await.unwrap().unwrap();
        assert_eq!(payment.evidence_ref.as_deref(), Some("media/slip1"));
    }

    #[tokio::test]
    async fn attach_ignores_evidence_outside_window() {
        let store = SqliteTenantStore::memory().await.unwrap();
        let mut stale = new_intent("shop1", "C1", 500.0);
        stale.created_at = Utc::now() - Duration::minutes(90);
        store.create_intent(&stale).await.unwrap();

        assert!(store
            .attach_recent_intent_by_user("shop1", "C1", Some("media/slip1"), Some("m1"), 60, 50)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn short_code_addresses_a_specific_intent() {
        let store = SqliteTenantStore::memory().await.unwrap();
        let first = store
            .create_intent(&new_intent("shop1", "C1", 100.0))
            .await
            .unwrap();
        store
            .create_intent(&new_intent("shop1", "C2", 200.0))
            .await
            .unwrap();

        let code = first.confirm_code.clone().unwrap();
        let found = store
            .pending_intent_by_code("shop1", &code, 50)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, first.id);
    }
}
