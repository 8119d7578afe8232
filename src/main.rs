mod auth;
mod config;
mod db;
mod error;
mod middleware;
mod permissions;
mod repository;
mod routes;
mod schemas;
mod services;
mod state;

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::Router;
use config::AppConfig;
use middleware::cors::build_cors_layer;
use middleware::rate_limit::governor_quota;
use state::AppState;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::GovernorLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::from_env();
    let state = AppState::build(config)?;

    if state.config.auth_dev_overrides_enabled() {
        tracing::warn!("Dev auth overrides are enabled; do not use in production");
    }
    if state.config.api_token.is_none() {
        tracing::warn!("API_TOKEN is not set; requests are not token-checked");
    }

    if let Some(pool) = &state.db_pool {
        db::ensure_schema(pool).await?;
    }

    let mut app = Router::new()
        .nest(&state.config.api_prefix, routes::v1_router())
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::GATEWAY_TIMEOUT,
            Duration::from_secs(state.config.request_timeout_seconds.max(1)),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(&state.config));

    // Keyed by the socket peer; forwarded headers are not trusted.
    if state.config.rate_limit_enabled {
        let (period, burst) = governor_quota(
            state.config.rate_limit_window_seconds,
            state.config.rate_limit_max_requests,
        );
        let governor_config = GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .period(period)
            .burst_size(burst)
            .finish()
            .ok_or("RATE_LIMIT_WINDOW_SECONDS and RATE_LIMIT_MAX_REQUESTS must be positive")?;
        app = app.layer(GovernorLayer::new(governor_config));
    }
    let app = app.with_state(state.clone());

    let socket_addr: SocketAddr = format!("{}:{}", state.config.host, state.config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(socket_addr).await?;

    tracing::info!(
        app_name = %state.config.app_name,
        environment = %state.config.environment,
        api_prefix = %state.config.api_prefix,
        rate_limit = state.config.rate_limit_enabled,
        report_dir = %state.config.report_output_dir,
        "Ledger backend listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "Could not register SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    tracing::info!("Shutdown signal received, finishing in-flight requests");
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
