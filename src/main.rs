//! toolbridge server binary.
//!
//! This is the entry point for running toolbridge as a standalone proxy.
//! For library usage (the translation engine, the parser) import from
//! the `toolbridge` crate instead.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::DefaultBodyLimit, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use toolbridge::{api, backend::BackendClient, cli::Cli, utils::config::Config, AppState};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    let default_filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if cli.debug {
                config.debug_mode = true;
            }
            config
        }
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        backend_mode = config.backend_mode.name(),
        proxy_host = %config.proxy_host,
        proxy_port = config.proxy_port,
        "toolbridge configuration loaded"
    );

    let backend = match BackendClient::with_stream_timeout(
        Duration::from_secs(config.connection_timeout_secs),
        Duration::from_secs(config.stream_connection_timeout_secs),
    ) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "failed to build backend HTTP client");
            return ExitCode::FAILURE;
        }
    };

    let max_buffer_size = config.max_buffer_size;
    let addr = format!("{}:{}", config.proxy_host, config.proxy_port);

    let state = AppState {
        config: Arc::new(config),
        backend: Arc::new(backend),
    };

    let app: Router = api::routes::create_router()
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_buffer_size))
        .with_state(state);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "failed to bind");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(%addr, "toolbridge listening");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
