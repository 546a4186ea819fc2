//! Code Review Gateway
//!
//! Single-binary Rust service that:
//! 1. Assembles a pool of Gemini API keys from the environment and config
//! 2. Accepts code review and optimization requests over HTTP
//! 3. Sends each request with the user's key or the next pooled key
//! 4. Rotates to another pooled key when one runs out of quota

mod api;
mod config;
mod error;
mod key_store;
mod metrics;
mod review;
mod service;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use key_pool::{CredentialPool, Executor};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::GeminiTransport;

use crate::api::ApiState;
use crate::config::Config;
use crate::key_store::KeyStore;
use crate::review::Reviewer;
use crate::service::{DRAIN_TIMEOUT, ServiceMetrics};

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    api: ApiState,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// The concurrency limit applies to every route, including health checks.
fn build_router(state: AppState, max_connections: usize) -> Router {
    let api = api::build_api_router(state.api.clone());
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .merge(api)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting code-review gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        base_url = %config.gemini.base_url,
        model = %config.gemini.model,
        max_retries = config.gemini.max_retries,
        "configuration loaded"
    );

    let pool = Arc::new(CredentialPool::new(config.pool_keys()));
    if pool.is_empty() {
        warn!(
            env_prefix = %config.pool.env_prefix,
            "credential pool is empty; requests need a user-supplied API key"
        );
    }

    let client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let transport = Arc::new(GeminiTransport::new(
        client,
        config.gemini.base_url.clone(),
        Duration::from_secs(config.server.timeout_secs),
    ));

    let executor =
        Arc::new(Executor::new(pool, transport).with_max_retries(config.gemini.max_retries));
    let reviewer = Arc::new(Reviewer::new(executor, config.gemini.model.clone()));

    let key_store = KeyStore::load(config.storage.key_file.clone())
        .await
        .with_context(|| {
            format!(
                "failed to load stored API key from {}",
                config.storage.key_file.display()
            )
        })?;

    let metrics = ServiceMetrics::new();
    let app_state = AppState {
        api: ApiState {
            reviewer,
            key_store: Arc::new(key_store),
            metrics: metrics.clone(),
        },
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;

    info!(addr = %listen_addr, "accepting requests");

    // The drain timer starts at signal receipt, not at server start: notify the
    // server to drain, then race the drain against DRAIN_TIMEOUT.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            let remaining = metrics.in_flight.load(Ordering::Relaxed);
            warn!(
                remaining,
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: overall status, pool summary, uptime, requests served.
///
/// `healthy` while a pooled key is usable, `degraded` when only a stored user
/// key is left, `unhealthy` (503) when no credential can be selected.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let pool = state.api.reviewer.executor().pool().health();
    let user_key = state.api.key_store.is_configured().await;
    let pool_available = pool["keys_available"].as_u64().unwrap_or(0) > 0;

    let (status_code, status) = if pool_available {
        (axum::http::StatusCode::OK, "healthy")
    } else if user_key {
        (axum::http::StatusCode::OK, "degraded")
    } else {
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    let metrics = &state.api.metrics;
    let body = serde_json::json!({
        "status": status,
        "pool": pool,
        "user_key_configured": user_key,
        "uptime_seconds": metrics.uptime_secs(),
        "requests_served": metrics.requests_total.load(Ordering::Relaxed),
        "errors_total": metrics.errors_total.load(Ordering::Relaxed),
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint, text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
