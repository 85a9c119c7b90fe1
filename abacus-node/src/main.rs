use anyhow::{Context, Result};
use metrics::describe_counter;
use std::sync::Arc;
use tracing::{error, info, warn};

use abacus_node::api::{start_api_server, ApiState, ShutdownSignal};
use abacus_node::config::{AbacusConfig, StoreBackend};
use abacus_node::engine::ConsistencyEngine;
use abacus_node::store::{MemoryStore, RedisStore, SharedStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first so the tracing filter can come from it;
    // the outcome is logged right after the subscriber is up.
    let (mut config, load_error) = match AbacusConfig::from_file("config/default") {
        Ok(config) => (config, None),
        Err(e) => (AbacusConfig::default(), Some(e.to_string())),
    };
    config.apply_environment_overrides();

    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with_target(false)
        .init();

    info!("Starting Abacus Node v{}", env!("CARGO_PKG_VERSION"));
    match load_error {
        None => info!("Configuration loaded from config/default.toml"),
        Some(e) => warn!("Failed to load config file: {}, using defaults", e),
    }

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    initialize_metrics();
    if config.metrics.enabled {
        let metrics_addr = config
            .metrics_addr()
            .context("Invalid metrics listen address")?;
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(%metrics_addr, "Prometheus metrics exporter started");
    }

    let node_id = config
        .service
        .node_id
        .clone()
        .unwrap_or_else(|| format!("node-{}", uuid::Uuid::new_v4()));
    info!(
        node_id = %node_id,
        environment = %config.service.environment,
        counter_key = %config.store.counter_key,
        "Node identity resolved"
    );

    match config.store.backend {
        StoreBackend::Redis => {
            let store = Arc::new(
                RedisStore::connect(config.store.clone())
                    .await
                    .context("Failed to connect to the shared store")?,
            );
            run(config, node_id, store).await
        }
        StoreBackend::Memory => {
            warn!("Using the in-process memory store; counter state is not shared across nodes");
            run(config, node_id, Arc::new(MemoryStore::new())).await
        }
    }
}

/// Wire the engine and API server over the chosen store and serve until
/// a shutdown signal arrives
async fn run<S: SharedStore>(config: AbacusConfig, node_id: String, store: Arc<S>) -> Result<()> {
    let engine = Arc::new(ConsistencyEngine::new(
        Arc::clone(&store),
        config.store.counter_key.clone(),
        config.occ.clone(),
    ));

    let shutdown = ShutdownSignal::new();
    let shutdown_on_signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received, terminating");
        shutdown_on_signal.initiate_shutdown();
    });

    let state = ApiState {
        config: config.api.clone(),
        node_id,
        engine,
        store,
        shutdown,
    };

    start_api_server(state).await
}

/// Initialize metrics descriptions
fn initialize_metrics() {
    describe_counter!("abacus_commits_total", "Total counter updates committed");
    describe_counter!(
        "abacus_conflicts_total",
        "Commit attempts lost to a concurrent writer"
    );
    describe_counter!(
        "abacus_retries_exhausted_total",
        "Updates abandoned after exhausting the retry budget"
    );
}
