use crate::SqliteTenantStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use shopline_core::parse::OwnerProfileField;
use tracing::instrument;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OwnerBindingRecord {
    pub tenant_id: String,
    pub user_id: String,
    pub active: bool,
    pub is_primary: bool,
    pub roles: String,
    pub external_identity: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct OwnerProfile {
    pub business_name: Option<String>,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub display_name: Option<String>,
    pub location_lat: Option<f64>,
    pub location_lng: Option<f64>,
    pub location_address: Option<String>,
}

impl SqliteTenantStore {
    /// Bind a user as an owner of the tenant. Idempotent: re-binding only
    /// refreshes the timestamp. The first active binding becomes primary;
    /// the transaction keeps the primary count at most one under races.
    #[instrument(skip(self))]
    pub async fn bind_owner(
        &self,
        tenant_id: &str,
        user_id: &str,
        external_identity: Option<&str>,
    ) -> Result<OwnerBindingRecord> {
        let now = Utc::now();
        let mut tx = self.pool().begin().await.context("begin bind_owner")?;

        let has_primary: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM owner_bindings WHERE tenant_id = ? AND active = 1 AND is_primary = 1 LIMIT 1",
        )
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to check primary owner")?;

        let is_primary = has_primary.is_none();

        sqlx::query(
            r#"
            INSERT INTO owner_bindings
                (tenant_id, user_id, active, is_primary, roles, external_identity,
                 created_at, updated_at)
            VALUES (?, ?, 1, ?, 'owner', ?, ?, ?)
            ON CONFLICT (tenant_id, user_id) DO UPDATE SET
                active = 1,
                external_identity = COALESCE(excluded.external_identity, external_identity),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(is_primary)
        .bind(external_identity)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to bind owner")?;

        let record = sqlx::query_as::<_, OwnerBindingRecord>(
            "SELECT * FROM owner_bindings WHERE tenant_id = ? AND user_id = ?",
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to read back owner binding")?;

        tx.commit().await.context("commit bind_owner")?;
        Ok(record)
    }

    #[instrument(skip(self))]
    pub async fn is_owner(&self, tenant_id: &str, user_id: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM owner_bindings WHERE tenant_id = ? AND user_id = ? AND active = 1",
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_optional(self.pool())
        .await
        .context("Failed to check owner binding")?;
        Ok(row.is_some())
    }

    /// Active owner user ids for a tenant, for review pushes.
    #[instrument(skip(self))]
    pub async fn list_owners(&self, tenant_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT user_id FROM owner_bindings WHERE tenant_id = ? AND active = 1 ORDER BY created_at ASC",
        )
        .bind(tenant_id)
        .fetch_all(self.pool())
        .await
        .context("Failed to list owners")?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    #[instrument(skip(self))]
    pub async fn primary_owner_count(&self, tenant_id: &str) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM owner_bindings WHERE tenant_id = ? AND active = 1 AND is_primary = 1",
        )
        .bind(tenant_id)
        .fetch_one(self.pool())
        .await
        .context("Failed to count primary owners")?;
        Ok(row.0)
    }

    #[instrument(skip(self))]
    pub async fn owner_profile(&self, tenant_id: &str) -> Result<Option<OwnerProfile>> {
        sqlx::query_as::<_, OwnerProfile>(
            r#"
            SELECT business_name, full_name, phone, display_name,
                   location_lat, location_lng, location_address
            FROM owner_profiles WHERE tenant_id = ?
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(self.pool())
        .await
        .context("Failed to fetch owner profile")
    }

    /// Merge one recognized field into the tenant's owner profile.
    #[instrument(skip(self, field))]
    pub async fn upsert_owner_profile_field(
        &self,
        tenant_id: &str,
        field: &OwnerProfileField,
    ) -> Result<()> {
        let (column, value) = match field {
            OwnerProfileField::BusinessName(v) => ("business_name", v),
            OwnerProfileField::FullName(v) => ("full_name", v),
            OwnerProfileField::Phone(v) => ("phone", v),
        };
        // column comes from the match above, never from input
        let sql = format!(
            r#"
            INSERT INTO owner_profiles (tenant_id, {column}, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (tenant_id) DO UPDATE SET
                {column} = excluded.{column},
                updated_at = excluded.updated_at
            "#
        );
        sqlx::query(&sql)
            .bind(tenant_id)
            .bind(value)
            .bind(Utc::now())
            .execute(self.pool())
            .await
            .context("Failed to upsert owner profile field")?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn upsert_owner_location(
        &self,
        tenant_id: &str,
        lat: Option<f64>,
        lng: Option<f64>,
        address: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO owner_profiles
                (tenant_id, location_lat, location_lng, location_address, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (tenant_id) DO UPDATE SET
                location_lat = excluded.location_lat,
                location_lng = excluded.location_lng,
                location_address = excluded.location_address,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(lat)
        .bind(lng)
        .bind(address)
        .bind(Utc::now())
        .execute(self.pool())
        .await
        .context("Failed to upsert owner location")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_binding_is_primary_later_ones_are_not() {
        let store = SqliteTenantStore::memory().await.unwrap();
        let first = store.bind_owner("shop1", "U1", None).await.unwrap();
        let second = store.bind_owner("shop1", "U2", None).await.unwrap();
        assert!(first.is_primary);
        assert!(!second.is_primary);
        assert_eq!(store.primary_owner_count("shop1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rebinding_is_idempotent() {
        let store = SqliteTenantStore::memory().await.unwrap();
        let first = store.bind_owner("shop1", "U1", None).await.unwrap();
        let again = store.bind_owner("shop1", "U1", Some("ext-9")).await.unwrap();
        assert!(again.is_primary);
        assert_eq!(again.external_identity.as_deref(), Some("ext-9"));
        assert_eq!(again.created_at, first.created_at);
        assert_eq!(store.primary_owner_count("shop1").await.unwrap(), 1);
        assert_eq!(store.list_owners("shop1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn profile_fields_merge() {
        let store = SqliteTenantStore::memory().await.unwrap();
        store
            .upsert_owner_profile_field("shop1", &OwnerProfileField::Phone("0812345678".to_string()))
            .await
            .unwrap();
        store
            .upsert_owner_profile_field(
                "shop1",
                &OwnerProfileField::BusinessName("ร้านกาแฟ".to_string()),
            )
            .await
            .unwrap();
        let profile = store.owner_profile("shop1").await.unwrap().unwrap();
        assert_eq!(profile.phone.as_deref(), Some("0812345678"));
        assert_eq!(profile.business_name.as_deref(), Some("ร้านกาแฟ"));
    }
}
