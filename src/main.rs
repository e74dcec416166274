//! Admission gate server.
//!
//! Wires the pipeline in front of a demo API: loads config, connects the
//! shared counter store, and wraps every route with the admission
//! middleware.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, routing::any, Router};
use clap::Parser;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use gatekeeper::config::schema::StoreBackend;
use gatekeeper::config::{load_config, GatekeeperConfig};
use gatekeeper::security::admission::{admission_middleware, AdmissionState, PolicySet};
use gatekeeper::security::behavior::BehaviorDetector;
use gatekeeper::security::rate_limit::RateLimiter;
use gatekeeper::store::{CounterStore, MemoryStore, RedisStore};
use gatekeeper::util::clock::SystemClock;

#[derive(Parser, Debug)]
#[command(name = "gatekeeper", about = "Admission-control and bot-mitigation gate")]
struct Args {
    /// Path to a TOML config file; defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured bind address.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatekeeperConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    gatekeeper::observability::logging::init(&config.observability.log_level);
    tracing::info!("gatekeeper v0.1.0 starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => gatekeeper::observability::metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let store: Arc<dyn CounterStore> = match config.store.backend {
        StoreBackend::Redis => Arc::new(RedisStore::connect(&config.store.url).await?),
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; counts are not shared across instances");
            Arc::new(MemoryStore::new())
        }
    };

    let clock = Arc::new(SystemClock);
    let store_timeout = Duration::from_millis(config.store.timeout_ms);
    let state = AdmissionState {
        limiter: Arc::new(RateLimiter::new(store.clone(), clock.clone(), store_timeout)),
        detector: Arc::new(BehaviorDetector::new(
            store.clone(),
            config.behavior.clone(),
            store_timeout,
        )),
        policies: Arc::new(PolicySet::from_config(&config.admission)),
        store,
    };

    let app = Router::new()
        .route("/", any(ok_handler))
        .route("/{*path}", any(ok_handler))
        .layer(middleware::from_fn_with_state(state, admission_middleware))
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Placeholder for the business logic this gate protects.
async fn ok_handler() -> &'static str {
    "ok"
}

/// Wait for shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received");
}
