use crate::SqliteTenantStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::instrument;
use uuid::Uuid;

pub const SCOPE_OWNER_INVITE: &str = "owner_invite";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MagicLink {
    pub tenant_id: String,
    pub token: String,
    pub scope: String,
    pub target_user_id: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub used_at: Option<DateTime<Utc>>,
}

impl SqliteTenantStore {
    #[instrument(skip(self))]
    pub async fn mint_magic_link(
        &self,
        tenant_id: &str,
        scope: &str,
        target_user_id: Option<&str>,
        ttl_mins: i64,
    ) -> Result<MagicLink> {
        let now = Utc::now();
        let link = MagicLink {
            tenant_id: tenant_id.to_string(),
            token: Uuid::new_v4().simple().to_string(),
            scope: scope.to_string(),
            target_user_id: target_user_id.map(str::to_string),
            issued_at: now,
            expires_at: now + Duration::minutes(ttl_mins),
            revoked: false,
            used_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO magic_links
                (tenant_id, token, scope, target_user_id, issued_at, expires_at, revoked, used_at)
            VALUES (?, ?, ?, ?, ?, ?, 0, NULL)
            "#,
        )
        .bind(&link.tenant_id)
        .bind(&link.token)
        .bind(&link.scope)
        .bind(&link.target_user_id)
        .bind(link.issued_at)
        .bind(link.expires_at)
        .execute(self.pool())
        .await
        .context("Failed to mint magic link")?;

        Ok(link)
    }

    /// Consume a link. A single conditional write: succeeds exactly once,
    /// and only while the link is unexpired and not revoked.
    #[instrument(skip(self))]
    pub async fn consume_magic_link(&self, tenant_id: &str, token: &str) -> Result<Option<MagicLink>> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE magic_links SET used_at = ?
            WHERE tenant_id = ? AND token = ?
              AND used_at IS NULL AND revoked = 0 AND expires_at > ?
            "#,
        )
        .bind(now)
        .bind(tenant_id)
        .bind(token)
        .bind(now)
        .execute(self.pool())
        .await
        .context("Failed to consume magic link")?;

        if result.rows_affected() != 1 {
            return Ok(None);
        }

        let link = sqlx::query_as::<_, MagicLink>(
            "SELECT * FROM magic_links WHERE tenant_id = ? AND token = ?",
        )
        .bind(tenant_id)
        .bind(token)
        .fetch_one(self.pool())
        .await
        .context("Failed to read back magic link")?;
        Ok(Some(link))
    }

    /// A revoked link is never consumable again, expiry notwithstanding.
    #[instrument(skip(self))]
    pub async fn revoke_magic_link(&self, tenant_id: &str, token: &str) -> Result<()> {
        sqlx::query("UPDATE magic_links SET revoked = 1 WHERE tenant_id = ? AND token = ?")
            .bind(tenant_id)
            .bind(token)
            .execute(self.pool())
            .await
            .context("Failed to revoke magic link")?;
        Ok(())
    }
}
