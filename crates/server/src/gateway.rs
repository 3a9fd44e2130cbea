use crate::router::EventRouter;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use shopline_core::error::EventError;
use shopline_core::metrics::{MetricsSnapshot, MetricsStore};
use shopline_core::types::WebhookEnvelope;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
    router: Arc<EventRouter>,
    metrics: Arc<MetricsStore>,
}

pub struct Gateway {
    router: Arc<EventRouter>,
    metrics: Arc<MetricsStore>,
    port: u16,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

impl Gateway {
    pub fn new(router: Arc<EventRouter>, metrics: Arc<MetricsStore>, port: u16) -> Self {
        Self {
            router,
            metrics,
            port,
        }
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        let state = AppState {
            router: self.router.clone(),
            metrics: self.metrics.clone(),
        };

        let app = Router::new()
            .route("/health", get(health_check))
            .route("/line/webhook", get(webhook_verify).post(webhook))
            .route("/line/webhook/", get(webhook_verify).post(webhook))
            .route("/api/monitor/metrics", get(get_metrics))
            .with_state(state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Gateway listening on {}", addr);

        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: "0.1.0",
    })
}

/// The platform's verification ping expects a bare 200.
async fn webhook_verify() -> &'static str {
    "OK"
}

async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// Map an event-handling failure to the HTTP contract: 400 for bad input
/// or signature, 404 for an unresolvable tenant, 500 for broken tenant
/// configuration or storage.
fn error_status(err: &EventError) -> StatusCode {
    match err {
        EventError::TenantNotFound { .. } => StatusCode::NOT_FOUND,
        EventError::InvalidSignature { .. } => StatusCode::BAD_REQUEST,
        EventError::ConfigurationError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, (StatusCode, &'static str)> {
    let signature = headers
        .get("x-signature")
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let envelope: WebhookEnvelope = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "malformed webhook body");
            return Err((StatusCode::BAD_REQUEST, "Invalid JSON body"));
        }
    };
    if envelope.destination.as_deref().unwrap_or_default().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Missing destination"));
    }

    match state.router.dispatch(&envelope, &body, &signature).await {
        Ok(accepted) => {
            info!(accepted, "webhook delivery processed");
            Ok("OK")
        }
        Err(e) => {
            warn!(error = %e, "webhook delivery rejected");
            Err((error_status(&e), "rejected"))
        }
    }
}
