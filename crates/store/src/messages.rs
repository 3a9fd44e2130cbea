use crate::SqliteTenantStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRecord {
    pub id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub direction: String,
    pub text: String,
    pub intent: Option<String>,
    pub media_ref: Option<String>,
    pub media_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub tenant_id: &'a str,
    pub user_id: &'a str,
    pub direction: &'a str,
    pub text: &'a str,
    pub intent: Option<&'a str>,
    pub media_ref: Option<&'a str>,
    pub media_message_id: Option<&'a str>,
}

impl SqliteTenantStore {
    /// Persist a message and bump the customer's interaction timestamps.
    #[instrument(skip(self, msg), fields(tenant = %msg.tenant_id, user = %msg.user_id))]
    pub async fn save_message(&self, msg: &NewMessage<'_>) -> Result<String> {
        let id = Uuid::new_v4().simple().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO messages
                (id, tenant_id, user_id, direction, text, intent,
                 media_ref, media_message_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(msg.tenant_id)
        .bind(msg.user_id)
        .bind(msg.direction)
        .bind(msg.text)
        .bind(msg.intent)
        .bind(msg.media_ref)
        .bind(msg.media_message_id)
        .bind(now)
        .execute(self.pool())
        .await
        .context("Failed to insert message")?;

        sqlx::query(
            r#"
            INSERT INTO customers
                (tenant_id, user_id, first_interaction_at, last_interaction_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (tenant_id, user_id) DO UPDATE SET
                last_interaction_at = excluded.last_interaction_at
            "#,
        )
        .bind(msg.tenant_id)
        .bind(msg.user_id)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .context("Failed to bump customer interaction")?;

        Ok(id)
    }

    #[instrument(skip(self))]
    pub async fn upsert_customer(
        &self,
        tenant_id: &str,
        user_id: &str,
        display_name: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO customers
                (tenant_id, user_id, display_name, first_interaction_at, last_interaction_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (tenant_id, user_id) DO UPDATE SET
                display_name = COALESCE(excluded.display_name, display_name),
                last_interaction_at = excluded.last_interaction_at
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(display_name)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .context("Failed to upsert customer")?;
        Ok(())
    }

    /// The customer's most recent inbound image inside the lookback
    /// window. Bounded recency read with the predicate applied in memory.
    #[instrument(skip(self))]
    pub async fn recent_inbound_image(
        &self,
        tenant_id: &str,
        user_id: &str,
        lookback_mins: i64,
        scan_limit: i64,
    ) -> Result<Option<MessageRecord>> {
        let since = Utc::now() - Duration::minutes(lookback_mins);
        let rows = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT * FROM messages
            WHERE tenant_id = ? AND user_id = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(scan_limit)
        .fetch_all(self.pool())
        .await
        .context("Failed to scan recent messages")?;

        Ok(rows.into_iter().find(|m| {
            m.direction == "inbound"
                && m.created_at >= since
                && (m.media_ref.is_some() || m.media_message_id.is_some())
        }))
    }
}
