use anyhow::{Context, Result};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;

mod dedup;
mod intents;
mod links;
mod media;
mod messages;
mod owners;
mod quotes;
mod sessions;
mod tenants;

pub use intents::{IntentRecord, IntentStatus, NewIntent, PaymentRecord};
pub use links::{MagicLink, SCOPE_OWNER_INVITE};
pub use media::{FsMediaStore, MediaStore, StoredMedia};
pub use messages::{MessageRecord, NewMessage};
pub use owners::{OwnerBindingRecord, OwnerProfile};
pub use quotes::QuoteRecord;
pub use sessions::SessionRecord;

/// SQLite-backed tenant document store. All conditional state transitions
/// (dedup claims, session step advances, intent confirm/reject) are single
/// atomic statements so concurrent webhook deliveries for the same
/// (tenant, user) serialize at this layer instead of holding locks.
#[derive(Clone)]
pub struct SqliteTenantStore {
    pool: SqlitePool,
}

impl SqliteTenantStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to SQLite database")?;

        // Run migrations
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        info!("SqliteTenantStore initialized");
        Ok(Self { pool })
    }

    /// In-memory store for tests and local development. A single
    /// connection, because each new :memory: connection is a fresh
    /// database.
    pub async fn memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory SQLite database")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self { pool })
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
