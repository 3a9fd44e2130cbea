use shopline_core::cache::{Clock, TtlCache};
use shopline_core::error::EventError;
use shopline_core::types::TenantConfig;
use shopline_store::SqliteTenantStore;
use std::sync::Arc;
use tracing::{instrument, warn};

/// Maps a webhook's opaque destination to a tenant and its merged
/// configuration. Results are cached per process with a bounded TTL so
/// webhook bursts do not hammer the tenant store with config reads.
pub struct TenantResolver {
    store: SqliteTenantStore,
    cache: TtlCache<TenantConfig>,
    clock: Arc<dyn Clock>,
    /// Development fallback when no mapping exists; never set in prod.
    default_tenant_id: Option<String>,
}

impl TenantResolver {
    pub fn new(
        store: SqliteTenantStore,
        cache_ttl_ms: i64,
        clock: Arc<dyn Clock>,
        default_tenant_id: Option<String>,
    ) -> Self {
        Self {
            store,
            cache: TtlCache::new(cache_ttl_ms, 10_000),
            clock,
            default_tenant_id,
        }
    }

    /// Resolution order: routing-identifier index, legacy numeric index,
    /// configured dev fallback. Unresolved destinations are a
    /// non-retryable client error.
    #[instrument(skip(self))]
    pub async fn resolve(&self, destination: &str) -> Result<TenantConfig, EventError> {
        if let Some(cached) = self.cache.get(destination, self.clock.as_ref()) {
            return Ok(cached);
        }

        let mut tenant_id = self.store.tenant_id_by_channel(destination).await?;

        if tenant_id.is_none() && destination.chars().all(|c| c.is_ascii_digit()) {
            tenant_id = self.store.tenant_id_by_legacy_channel(destination).await?;
        }

        if tenant_id.is_none() {
            if let Some(fallback) = &self.default_tenant_id {
                warn!(destination, fallback = %fallback, "falling back to default tenant");
                tenant_id = Some(fallback.clone());
            }
        }

        let Some(tenant_id) = tenant_id else {
            return Err(EventError::TenantNotFound {
                destination: destination.to_string(),
            });
        };

        let config = self
            .store
            .tenant_config(&tenant_id)
            .await?
            .filter(|c| c.active)
            .ok_or_else(|| EventError::TenantNotFound {
                destination: destination.to_string(),
            })?;

        self.cache.put(destination, config.clone(), self.clock.as_ref());
        Ok(config)
    }

    /// Drop a cached mapping after admin-driven configuration changes.
    pub fn invalidate(&self, destination: &str) {
        self.cache.invalidate(destination);
    }
}
