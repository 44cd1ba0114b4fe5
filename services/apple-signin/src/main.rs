//! Sign in with Apple service
//!
//! Single-binary Rust service that:
//! 1. Redirects browsers to Apple to start sign-in
//! 2. Receives Apple's callback (query or `form_post`) and native app token
//!    submissions
//! 3. Exchanges the authorization code using a freshly minted client secret
//! 4. Verifies the identity token and returns the user's profile

mod config;
mod metrics;
mod routes;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use apple_auth::{
    FlowKind, HttpTokenExchange, JwksKeyStore, KeyStore, Strategy, TokenExchange, Verify,
};
use axum::Router;
use axum::extract::{FromRef, State};
use axum::response::IntoResponse;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::routes::AuthState;

/// Grace period for in-flight sign-ins after a shutdown signal
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    auth: AuthState,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

/// Build the axum router with all routes and shared state.
///
/// The concurrency limit bounds simultaneous sign-ins, each of which may
/// hold an outbound connection to Apple.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/auth/apple", get(routes::login))
        .route(
            "/auth/apple/callback",
            get(routes::callback).post(routes::callback),
        )
        .route("/auth/apple/token", get(routes::token).post(routes::token))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Assemble both flows over one token exchange and one key cache.
fn build_auth_state(
    config: &Config,
    exchange: Arc<dyn TokenExchange>,
    keys: Arc<dyn KeyStore>,
) -> apple_auth::Result<AuthState> {
    let strategy = |kind| {
        Strategy::new(
            config.apple.strategy.clone(),
            kind,
            exchange.clone(),
            keys.clone(),
            Verify::profile(),
        )
        .map(Arc::new)
    };
    Ok(AuthState {
        redirect: strategy(FlowKind::Redirect)?,
        token: strategy(FlowKind::Token)?,
    })
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

    info!("starting apple-signin");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus = metrics::install_recorder().context("failed to install metrics recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        client_id = %config.apple.strategy.client_id,
        callback_url = %config.apple.strategy.callback_url,
        scope = ?config.apple.strategy.scope,
        "configuration loaded"
    );

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.server.http_timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    let keys = match &config.apple.keys_url {
        Some(url) => JwksKeyStore::with_uri(http.clone(), url.clone()),
        None => JwksKeyStore::new(http.clone()),
    };
    let exchange = HttpTokenExchange::new(http, &config.apple.strategy);

    let auth = build_auth_state(&config, Arc::new(exchange), Arc::new(keys))
        .context("invalid [apple] configuration")?;

    let state = AppState {
        auth,
        prometheus,
        started_at: Instant::now(),
    };
    let app = build_router(state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts.
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
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    info!("shutdown complete");
    Ok(())
}

/// Liveness endpoint. The service holds no connections of its own, so it is
/// healthy whenever it answers.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    });
    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
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
