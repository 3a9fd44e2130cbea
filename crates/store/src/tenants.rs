use crate::SqliteTenantStore;
use anyhow::{Context, Result};
use chrono::Utc;
use shopline_core::types::{ChannelRole, TenantChannel, TenantConfig};
use tracing::instrument;

impl SqliteTenantStore {
    #[instrument(skip(self))]
    pub async fn upsert_tenant(&self, tenant_id: &str) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO tenants (id, active, created_at, updated_at)
            VALUES (?, 1, ?, ?)
            ON CONFLICT (id) DO UPDATE SET active = 1, updated_at = excluded.updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .context("Failed to upsert tenant")?;
        Ok(())
    }

    /// Tenants are never deleted; deactivation stops webhook routing.
    #[instrument(skip(self))]
    pub async fn deactivate_tenant(&self, tenant_id: &str) -> Result<()> {
        sqlx::query("UPDATE tenants SET active = 0, updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(tenant_id)
            .execute(self.pool())
            .await
            .context("Failed to deactivate tenant")?;
        Ok(())
    }

    /// Upsert a sub-channel. When the channel is the consumer-facing
    /// storefront, any other consumer channel of the tenant is demoted in
    /// the same transaction so exactly one storefront exists at a time.
    #[instrument(skip(self, channel), fields(channel = %channel.name))]
    pub async fn upsert_channel(&self, tenant_id: &str, channel: &TenantChannel) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool().begin().await.context("begin upsert_channel")?;

        if channel.role == ChannelRole::Consumer {
            sqlx::query(
                r#"
                UPDATE tenant_channels SET role = 'admin', updated_at = ?
                WHERE tenant_id = ? AND role = 'consumer' AND name != ?
                "#,
            )
            .bind(now)
            .bind(tenant_id)
            .bind(&channel.name)
            .execute(&mut *tx)
            .await
            .context("Failed to demote previous storefront channel")?;
        }

        sqlx::query(
            r#"
            INSERT INTO tenant_channels
                (tenant_id, name, role, channel_id, legacy_channel_id,
                 channel_secret, access_token, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (tenant_id, name) DO UPDATE SET
                role = excluded.role,
                channel_id = excluded.channel_id,
                legacy_channel_id = excluded.legacy_channel_id,
                channel_secret = excluded.channel_secret,
                access_token = excluded.access_token,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(&channel.name)
        .bind(channel.role.as_str())
        .bind(&channel.channel_id)
        .bind(&channel.legacy_channel_id)
        .bind(&channel.channel_secret)
        .bind(&channel.access_token)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to upsert tenant channel")?;

        tx.commit().await.context("commit upsert_channel")?;
        Ok(())
    }

    /// Primary index: routing identifier -> tenant id.
    #[instrument(skip(self))]
    pub async fn tenant_id_by_channel(&self, channel_id: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT tenant_id FROM tenant_channels WHERE channel_id = ? LIMIT 1",
        )
        .bind(channel_id)
        .fetch_optional(self.pool())
        .await
        .context("Failed to look up tenant by channel id")?;
        Ok(row.map(|r| r.0))
    }

    /// Legacy index kept for tenants onboarded before routing ids existed.
    #[instrument(skip(self))]
    pub async fn tenant_id_by_legacy_channel(&self, legacy_id: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT tenant_id FROM tenant_channels WHERE legacy_channel_id = ? LIMIT 1",
        )
        .bind(legacy_id)
        .fetch_optional(self.pool())
        .await
        .context("Failed to look up tenant by legacy channel id")?;
        Ok(row.map(|r| r.0))
    }

    /// Merged tenant configuration: the tenant row plus all sub-channels.
    #[instrument(skip(self))]
    pub async fn tenant_config(&self, tenant_id: &str) -> Result<Option<TenantConfig>> {
        let tenant: Option<(String, i64)> =
            sqlx::query_as("SELECT id, active FROM tenants WHERE id = ?")
                .bind(tenant_id)
                .fetch_optional(self.pool())
                .await
                .context("Failed to fetch tenant")?;

        let Some((id, active)) = tenant else {
            return Ok(None);
        };

        let rows: Vec<(String, String, String, Option<String>, Option<String>, Option<String>)> =
            sqlx::query_as(
                r#"
                SELECT name, role, channel_id, legacy_channel_id, channel_secret, access_token
                FROM tenant_channels WHERE tenant_id = ?
                ORDER BY name ASC
                "#,
            )
            .bind(tenant_id)
            .fetch_all(self.pool())
            .await
            .context("Failed to fetch tenant channels")?;

        let channels = rows
            .into_iter()
            .map(
                |(name, role, channel_id, legacy_channel_id, channel_secret, access_token)| {
                    TenantChannel {
                        name,
                        role: ChannelRole::parse(&role).unwrap_or(ChannelRole::Admin),
                        channel_id,
                        legacy_channel_id,
                        channel_secret,
                        access_token,
                    }
                },
            )
            .collect();

        Ok(Some(TenantConfig {
            tenant_id: id,
            active: active == 1,
            channels,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(name: &str, role: ChannelRole, channel_id: &str) -> TenantChannel {
        TenantChannel {
            name: name.to_string(),
            role,
            channel_id: channel_id.to_string(),
            legacy_channel_id: None,
            channel_secret: Some("secret".to_string()),
            access_token: Some("token".to_string()),
        }
    }

    #[tokio::test]
    async fn resolves_by_channel_and_legacy_id() {
        let store = SqliteTenantStore::memory().await.unwrap();
        store.upsert_tenant("shop1").await.unwrap();
        let mut admin = channel("admin", ChannelRole::Admin, "Uadmin");
        admin.legacy_channel_id = Some("12345".to_string());
        store.upsert_channel("shop1", &admin).await.unwrap();

        assert_eq!(
            store.tenant_id_by_channel("Uadmin").await.unwrap().as_deref(),
            Some("shop1")
        );
        assert_eq!(
            store
                .tenant_id_by_legacy_channel("12345")
                .await
                .unwrap()
                .as_deref(),
            Some("shop1")
        );
        assert!(store.tenant_id_by_channel("Unone").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn only_one_storefront_channel_at_a_time() {
        let store = SqliteTenantStore::memory().await.unwrap();
        store.upsert_tenant("shop1").await.unwrap();
        store
            .upsert_channel("shop1", &channel("front_a", ChannelRole::Consumer, "Ua"))
            .await
            .unwrap();
        store
            .upsert_channel("shop1", &channel("front_b", ChannelRole::Consumer, "Ub"))
            .await
            .unwrap();

        let cfg = store.tenant_config("shop1").await.unwrap().unwrap();
        let consumers = cfg
            .channels
            .iter()
            .filter(|c| c.role == ChannelRole::Consumer)
            .count();
        assert_eq!(consumers, 1);
        assert_eq!(cfg.classify("Ub"), ChannelRole::Consumer);
        assert_eq!(cfg.classify("Ua"), ChannelRole::Admin);
    }
}
