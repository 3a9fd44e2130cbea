use crate::SqliteTenantStore;
use anyhow::{Context, Result};
use chrono::Utc;
use tracing::instrument;

impl SqliteTenantStore {
    /// Atomically claim an upstream event for processing. Returns true if
    /// this call created the marker (the event is new), false if it was
    /// already claimed. An absent event id always claims as new: an extra
    /// processing pass beats silently dropping a message we cannot dedupe.
    #[instrument(skip(self))]
    pub async fn claim_event_once(
        &self,
        tenant_id: &str,
        event_id: Option<&str>,
    ) -> Result<bool> {
        let Some(event_id) = event_id.filter(|id| !id.is_empty()) else {
            return Ok(true);
        };

        let result = sqlx::query(
            r#"
            INSERT INTO events_seen (tenant_id, event_id, seen_at)
            VALUES (?, ?, ?)
            ON CONFLICT (tenant_id, event_id) DO NOTHING
            "#,
        )
        .bind(tenant_id)
        .bind(event_id)
        .bind(Utc::now())
        .execute(self.pool())
        .await
        .context("Failed to claim event marker")?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use crate::SqliteTenantStore;

    #[tokio::test]
    async fn first_claim_wins_and_repeats_are_duplicates() {
        let store = SqliteTenantStore::memory().await.unwrap();
        assert!(store.claim_event_once("shop1", Some("evt1")).await.unwrap());
        assert!(!store.claim_event_once("shop1", Some("evt1")).await.unwrap());
        assert!(!store.claim_event_once("shop1", Some("evt1")).await.unwrap());
    }

    #[tokio::test]
    async fn claims_are_scoped_per_tenant() {
        let store = SqliteTenantStore::memory().await.unwrap();
        assert!(store.claim_event_once("shop1", Some("evt1")).await.unwrap());
        assert!(store.claim_event_once("shop2", Some("evt1")).await.unwrap());
    }

    #[tokio::test]
    async fn missing_event_id_is_always_new() {
        let store = SqliteTenantStore::memory().await.unwrap();
        assert!(store.claim_event_once("shop1", None).await.unwrap());
        assert!(store.claim_event_once("shop1", None).await.unwrap());
        assert!(store.claim_event_once("shop1", Some("")).await.unwrap());
    }
}
