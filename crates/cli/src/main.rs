use clap::{Parser, Subcommand};
use shopline_core::cache::SystemClock;
use shopline_core::config::AppConfig;
use shopline_core::metrics::MetricsStore;
use shopline_core::types::{ChannelRole, TenantChannel};
use shopline_engine::Engine;
use shopline_line::ocr::{HttpOcr, OcrEngine};
use shopline_line::LineClient;
use shopline_server::gateway::Gateway;
use shopline_server::resolver::TenantResolver;
use shopline_server::router::EventRouter;
use shopline_store::{FsMediaStore, SqliteTenantStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};

const VERSION: &str = "0.1.0";

#[derive(Parser)]
#[command(name = "shopline")]
#[command(version = VERSION)]
#[command(about = "Multi-tenant chat-commerce webhook backend")]
struct Cli {
    /// Path to config.json (defaults to ~/.shopline/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the webhook gateway
    Serve,
    /// Manage tenants
    Tenant {
        #[command(subcommand)]
        action: TenantActions,
    },
}

#[derive(Subcommand)]
enum TenantActions {
    /// Create or update a tenant and one of its channels
    Add {
        /// Tenant id (e.g. shop-0042)
        #[arg(long)]
        id: String,
        /// Channel name within the tenant
        #[arg(long, default_value = "storefront")]
        channel: String,
        /// Channel role: admin or consumer
        #[arg(long, default_value = "consumer")]
        role: String,
        /// Routing identifier the platform sends as the webhook destination
        #[arg(long)]
        channel_id: String,
        /// Legacy numeric channel id, if the tenant predates routing ids
        #[arg(long)]
        legacy_channel_id: Option<String>,
        #[arg(long)]
        channel_secret: Option<String>,
        #[arg(long)]
        access_token: Option<String>,
    },
    /// Deactivate a tenant (tenants are never deleted)
    Deactivate {
        #[arg(long)]
        id: String,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(Level::INFO.into());
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.clone()).map_err(|e| {
        anyhow::anyhow!("Failed to load config: {}. Create ~/.shopline/config.json first.", e)
    })?;

    let store = SqliteTenantStore::connect(&config.database_url).await?;

    match cli.command {
        Commands::Serve => serve(config, store).await,
        Commands::Tenant { action } => tenant_admin(store, action).await,
    }
}

async fn serve(config: AppConfig, store: SqliteTenantStore) -> anyhow::Result<()> {
    let metrics = MetricsStore::new();
    let limits = config.limits.clone();

    let chat = Arc::new(LineClient::new(
        config.platform.api_base.clone(),
        config.platform.content_api_base.clone(),
        limits.outbound_timeout_secs,
        150,
    ));
    let ocr: Option<Arc<dyn OcrEngine>> = config.ocr.as_ref().map(|ocr_cfg| {
        Arc::new(HttpOcr::new(
            ocr_cfg.api_base.clone(),
            ocr_cfg.api_key.clone(),
            limits.ocr_timeout_secs,
        )) as Arc<dyn OcrEngine>
    });
    if ocr.is_none() {
        info!("OCR not configured; receipt amounts will be verified manually");
    }
    let media = Arc::new(FsMediaStore::new(config.media_dir.clone()));

    let engine = Arc::new(Engine::new(
        store.clone(),
        chat,
        ocr,
        media,
        metrics.clone(),
        limits.clone(),
        config.portal.invite_base_url.clone(),
    ));

    let resolver = Arc::new(TenantResolver::new(
        store,
        (limits.resolver_cache_ttl_secs as i64) * 1000,
        Arc::new(SystemClock),
        config.default_tenant_id.clone(),
    ));

    let router = Arc::new(EventRouter::new(
        resolver,
        engine,
        metrics.clone(),
        limits.event_budget_secs,
    ));

    let gateway = Gateway::new(router, metrics, config.server.port);
    gateway.start().await
}

async fn tenant_admin(store: SqliteTenantStore, action: TenantActions) -> anyhow::Result<()> {
    match action {
        TenantActions::Add {
            id,
            channel,
            role,
            channel_id,
            legacy_channel_id,
            channel_secret,
            access_token,
        } => {
            let role = ChannelRole::parse(&role)
                .ok_or_else(|| anyhow::anyhow!("role must be 'admin' or 'consumer'"))?;
            store.upsert_tenant(&id).await?;
            store
                .upsert_channel(
                    &id,
                    &TenantChannel {
                        name: channel.clone(),
                        role,
                        channel_id,
                        legacy_channel_id,
                        channel_secret,
                        access_token,
                    },
                )
                .await?;
            info!(tenant = %id, channel = %channel, "tenant channel saved");
            println!("Tenant '{id}' channel '{channel}' saved");
        }
        TenantActions::Deactivate { id } => {
            store.deactivate_tenant(&id).await?;
            println!("Tenant '{id}' deactivated");
        }
    }
    Ok(())
}
