// SPDX-License-Identifier: PMPL-1.0-or-later

//! GraphQL Rate Limit server
//!
//! Serves the query API on `POST /graphql`, with GraphiQL on `/graphiql` and a
//! health check on `/health`.
//!
//! ## Configuration
//!
//! Loaded from `.env`, an optional `rate-limit.toml` and environment variables
//! prefixed with `GRAPHQL_RATE_LIMIT_`:
//!
//! - `GRAPHQL_RATE_LIMIT_HOST` / `GRAPHQL_RATE_LIMIT_PORT`: bind address
//!   (default: 0.0.0.0:4000); a plain `PORT` is also accepted
//! - `GRAPHQL_RATE_LIMIT_PORT_ATTEMPTS`: ports tried upwards when one is taken (default: 10)
//! - `GRAPHQL_RATE_LIMIT_RATE_LIMIT__LIMIT` / `..._RATE_LIMIT__DURATION`: Query
//!   field policy (default: 1 per 15s)
//! - `GRAPHQL_RATE_LIMIT_RATE_LIMIT__RULES_FILE`: extra `@rateLimit` annotations in SDL
//! - `GRAPHQL_RATE_LIMIT_CREDENTIAL_HEADER`: header identifying callers (default: authorization)
//! - `GRAPHQL_RATE_LIMIT_LOG_JSON`: JSON logs; `RUST_LOG` overrides the level (default: info)

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use graphql_rate_limit::{
    build_schema,
    config::Config,
    handlers::{router, AppState},
    limiter::RateLimiter,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    init_tracing(config.log_json);

    info!("Starting GraphQL Rate Limit server");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        limit = config.rate_limit.limit,
        duration = config.rate_limit.duration,
        credential_header = %config.credential_header,
        "Configuration loaded"
    );

    // Invalid annotations stop startup here, before anything is bound
    let limiter = Arc::new(RateLimiter::new());
    let schema = build_schema(&config, limiter.clone())?;

    if let Some(period) = config.cleanup_interval() {
        let limiter = limiter.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                limiter.purge_expired();
            }
        });
    }

    let listener = bind(&config.host, config.port, config.port_attempts).await?;
    let addr = listener.local_addr()?;
    info!("GraphQL server listening on http://{}/graphql", addr);
    info!("GraphiQL playground: http://{}/graphiql", addr);

    let state = Arc::new(AppState { schema, config });
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("GraphQL Rate Limit server stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false))
            .with(filter)
            .init();
    }
}

/// Bind `host:port`, moving to the next port while the current one is taken.
async fn bind(host: &str, port: u16, attempts: u16) -> anyhow::Result<TcpListener> {
    let mut port = port;
    for attempt in 1..=attempts {
        match TcpListener::bind((host, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == ErrorKind::AddrInUse && attempt < attempts => {
                warn!(port, "Port is already in use, trying another port");
                port = port.checked_add(1).ok_or_else(|| {
                    anyhow::anyhow!("ran out of ports after {}", port)
                })?;
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "unable to bind {}:{} after {} attempt(s): {}",
                    host,
                    port,
                    attempt,
                    e
                ))
            }
        }
    }
    Err(anyhow::anyhow!("no port attempts configured"))
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
