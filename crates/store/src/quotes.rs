use crate::SqliteTenantStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::instrument;

/// Owner-declared expected amount used to gate OCR verification.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QuoteRecord {
    pub tenant_id: String,
    pub amount: f64,
    pub currency: String,
    pub owner_id: String,
    pub source_text: Option<String>,
    pub issued_at: DateTime<Utc>,
}

impl SqliteTenantStore {
    /// Declare the tenant's expected amount. One quote per tenant,
    /// most-recent-wins.
    #[instrument(skip(self, source_text))]
    pub async fn set_pending_quote(
        &self,
        tenant_id: &str,
        amount: f64,
        currency: &str,
        owner_id: &str,
        source_text: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_quotes
                (tenant_id, amount, currency, owner_id, source_text, issued_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (tenant_id) DO UPDATE SET
                amount = excluded.amount,
                currency = excluded.currency,
                owner_id = excluded.owner_id,
                source_text = excluded.source_text,
                issued_at = excluded.issued_at
            "#,
        )
        .bind(tenant_id)
        .bind(amount)
        .bind(currency)
        .bind(owner_id)
        .bind(source_text)
        .bind(Utc::now())
        .execute(self.pool())
        .await
        .context("Failed to set pending quote")?;
        Ok(())
    }

    /// The active quote, if one was issued within the TTL.
    #[instrument(skip(self))]
    pub async fn active_quote(&self, tenant_id: &str, ttl_mins: i64) -> Result<Option<QuoteRecord>> {
        let quote = sqlx::query_as::<_, QuoteRecord>(
            "SELECT * FROM pending_quotes WHERE tenant_id = ?",
        )
        .bind(tenant_id)
        .fetch_optional(self.pool())
        .await
        .context("Failed to fetch pending quote")?;

        let cutoff = Utc::now() - Duration::minutes(ttl_mins);
        Ok(quote.filter(|q| q.issued_at >= cutoff))
    }
}
