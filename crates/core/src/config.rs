use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database_url: String,
    /// Directory receipt/media evidence is written to.
    pub media_dir: PathBuf,
    /// Development fallback tenant used when a destination resolves to
    /// nothing. Leave unset in production.
    pub default_tenant_id: Option<String>,
    pub platform: PlatformConfig,
    pub ocr: Option<OcrConfig>,
    pub portal: PortalConfig,
    #[serde(default)]
    pub limits: Limits,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PlatformConfig {
    /// Messaging API base, e.g. https://api.line.me
    pub api_base: Option<String>,
    /// Content download base (the platform serves media from a separate host).
    pub content_api_base: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OcrConfig {
    pub api_base: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PortalConfig {
    /// Base URL magic-link invites point at, e.g. https://portal.example.com
    pub invite_base_url: String,
}

/// Tunable windows and budgets. Defaults match production behavior; tests
/// narrow them to exercise expiry paths.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Limits {
    /// TTL for the per-process tenant-config cache.
    pub resolver_cache_ttl_secs: u64,
    /// How long an owner-declared quote stays active.
    pub quote_ttl_mins: i64,
    /// Absolute tolerance when comparing an OCR amount to the quote.
    pub ocr_tolerance: f64,
    /// Lookback for pairing a text claim with a recently sent image.
    pub recent_media_lookback_mins: i64,
    /// Window for auto-attaching new evidence to a pending intent.
    pub attach_window_mins: i64,
    /// Window an owner decision searches for the latest pending intent.
    pub review_window_mins: i64,
    /// How many recent rows a bounded recency query scans before
    /// client-side filtering. A real scalability limit, not a detail.
    pub recency_scan_limit: i64,
    /// Magic-link invite lifetime.
    pub invite_ttl_mins: i64,
    pub outbound_timeout_secs: u64,
    pub ocr_timeout_secs: u64,
    /// Soft budget for one event so a slow call cannot stall its batch.
    pub event_budget_secs: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            resolver_cache_ttl_secs: 300,
            quote_ttl_mins: 30,
            ocr_tolerance: 1.0,
            recent_media_lookback_mins: 10,
            attach_window_mins: 60,
            review_window_mins: 120,
            recency_scan_limit: 50,
            invite_ttl_mins: 60 * 24,
            outbound_timeout_secs: 10,
            ocr_timeout_secs: 20,
            event_budget_secs: 30,
        }
    }
}

impl AppConfig {
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config_path = if let Some(path) = custom_path {
            path
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".shopline/config.json")
        };

        let s = Config::builder()
            .add_source(File::from(config_path).required(true))
            // Environment variables (SHOPLINE_...) override file values
            .add_source(Environment::with_prefix("SHOPLINE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
