use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::{net::TcpListener, sync::Notify};
use tracing::{info, instrument, warn};

use crate::config::ApiConfig;
use crate::engine::ConsistencyEngine;
use crate::error::AbacusError;
use crate::store::{SharedStore, StoreStats};

/// Shared shutdown signal for graceful termination
#[derive(Debug)]
pub struct ShutdownSignal {
    /// Atomic flag indicating shutdown has been initiated
    pub should_shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Clone for ShutdownSignal {
    fn clone(&self) -> Self {
        Self {
            should_shutdown: Arc::clone(&self.should_shutdown),
            notify: Arc::clone(&self.notify),
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            should_shutdown: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.should_shutdown.load(Ordering::Relaxed)
    }

    pub fn initiate_shutdown(&self) {
        self.should_shutdown.store(true, Ordering::Relaxed);
        self.notify.notify_waiters();
    }

    /// Wait until shutdown is initiated
    pub async fn wait(&self) {
        while !self.is_shutdown_requested() {
            let notified = self.notify.notified();
            if self.is_shutdown_requested() {
                break;
            }
            notified.await;
        }
    }
}

/// API server state shared by all request handlers
pub struct ApiState<S: SharedStore> {
    /// Configuration
    pub config: ApiConfig,
    /// Identity of this node, echoed in every response
    pub node_id: String,
    /// Consistency engine over the shared counter
    pub engine: Arc<ConsistencyEngine<S>>,
    /// Backing store, used read-only by the health adapter
    pub store: Arc<S>,
    /// Shutdown signal
    pub shutdown: ShutdownSignal,
}

impl<S: SharedStore> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            node_id: self.node_id.clone(),
            engine: Arc::clone(&self.engine),
            store: Arc::clone(&self.store),
            shutdown: self.shutdown.clone(),
        }
    }
}

/// Request payload for adding a number
#[derive(Debug, Deserialize)]
pub struct AddRequest {
    /// Number to add to the running sum
    pub number: i64,
}

/// Response for add operations
#[derive(Debug, Serialize)]
pub struct AddResponse {
    /// New sum after the addition
    pub new_sum: i64,
    /// Number that was added
    pub added: i64,
    /// Conditional-write attempts the commit took
    pub attempts: u32,
    /// Timestamp of the operation
    pub timestamp: String,
    /// ID of the node that processed the request
    pub node_id: String,
}

/// Response for sum queries
#[derive(Debug, Serialize)]
pub struct SumResponse {
    /// Current running sum
    pub sum: i64,
    /// Timestamp of the response
    pub timestamp: String,
    /// ID of the node that processed the request
    pub node_id: String,
}

/// Response for reset operations
#[derive(Debug, Serialize)]
pub struct ResetResponse {
    /// Status message
    pub message: String,
    /// Timestamp of the operation
    pub timestamp: String,
    /// ID of the node that processed the request
    pub node_id: String,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status: healthy or degraded
    pub status: String,
    /// ID of this node
    pub node_id: String,
    /// Whether the backing store answered a liveness probe
    pub store_connected: bool,
    /// Current counter value
    pub current_sum: i64,
    /// Raw store usage statistics
    pub stats: StoreStats,
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Map a core error to an HTTP status
///
/// `ConflictExhausted` already reflects a spent retry budget, so it maps to
/// 503 for the client to retry later; handlers never re-invoke the engine
/// for it. `OverflowRejected` is permanent for that input and maps to 400.
fn error_status(err: &AbacusError) -> StatusCode {
    match err {
        AbacusError::ConflictExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
        AbacusError::OverflowRejected { .. } => StatusCode::BAD_REQUEST,
        AbacusError::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        AbacusError::Protocol(_) => StatusCode::INTERNAL_SERVER_ERROR,
        AbacusError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Handle add-number requests
#[instrument(skip(state))]
async fn handle_add<S: SharedStore>(
    State(state): State<ApiState<S>>,
    Json(request): Json<AddRequest>,
) -> Result<Json<AddResponse>, StatusCode> {
    match state.engine.apply_delta(request.number).await {
        Ok(outcome) => {
            info!(
                added = request.number,
                new_sum = outcome.value,
                attempts = outcome.attempts,
                "Added number to sum"
            );
            Ok(Json(AddResponse {
                new_sum: outcome.value,
                added: request.number,
                attempts: outcome.attempts,
                timestamp: timestamp(),
                node_id: state.node_id.clone(),
            }))
        }
        Err(e) => {
            warn!(number = request.number, error = %e, "Failed to add number");
            Err(error_status(&e))
        }
    }
}

/// Handle sum queries
#[instrument(skip(state))]
async fn handle_sum<S: SharedStore>(
    State(state): State<ApiState<S>>,
) -> Result<Json<SumResponse>, StatusCode> {
    match state.engine.read_current().await {
        Ok(sum) => Ok(Json(SumResponse {
            sum,
            timestamp: timestamp(),
            node_id: state.node_id.clone(),
        })),
        Err(e) => {
            warn!(error = %e, "Failed to read sum");
            Err(error_status(&e))
        }
    }
}

/// Handle reset requests
#[instrument(skip(state))]
async fn handle_reset<S: SharedStore>(
    State(state): State<ApiState<S>>,
) -> Result<Json<ResetResponse>, StatusCode> {
    match state.engine.reset().await {
        Ok(outcome) => {
            info!(attempts = outcome.attempts, "Sum reset to 0");
            Ok(Json(ResetResponse {
                message: "Sum reset to 0".to_string(),
                timestamp: timestamp(),
                node_id: state.node_id.clone(),
            }))
        }
        Err(e) => {
            warn!(error = %e, "Failed to reset sum");
            Err(error_status(&e))
        }
    }
}

/// Health check endpoint
///
/// Forwards the store's liveness probe and usage statistics, annotated with
/// the current counter value and this node's identity. Strictly read-only:
/// it never mutates the counter.
#[instrument(skip(state))]
async fn handle_health<S: SharedStore>(
    State(state): State<ApiState<S>>,
) -> (StatusCode, Json<HealthResponse>) {
    let store_connected = state.store.ping().await.unwrap_or(false);
    let current_sum = state.engine.read_current().await.unwrap_or(0);
    let stats = state.store.stats().await.unwrap_or_default();

    let (status, code) = if store_connected {
        ("healthy", StatusCode::OK)
    } else {
        ("degraded", StatusCode::SERVICE_UNAVAILABLE)
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            node_id: state.node_id.clone(),
            store_connected,
            current_sum,
            stats,
        }),
    )
}

/// Root endpoint - API information
async fn handle_root<S: SharedStore>(State(state): State<ApiState<S>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "Distributed Abacus Microservice",
        "version": env!("CARGO_PKG_VERSION"),
        "node_id": state.node_id,
        "endpoints": {
            "add": "POST /abacus/number",
            "sum": "GET /abacus/sum",
            "reset": "DELETE /abacus/sum",
            "health": "GET /health"
        }
    }))
}

/// Create the public API router
fn create_api_router<S: SharedStore>(state: ApiState<S>) -> Router {
    Router::new()
        .route("/abacus/number", post(handle_add::<S>))
        .route("/abacus/sum", get(handle_sum::<S>).delete(handle_reset::<S>))
        .route("/health", get(handle_health::<S>))
        .route("/", get(handle_root::<S>))
        .with_state(state)
}

/// Start the HTTP API server
#[instrument(skip(state))]
pub async fn start_api_server<S: SharedStore>(state: ApiState<S>) -> Result<()> {
    let listen_addr = state.config.listen_addr.clone();
    let shutdown = state.shutdown.clone();
    let app = create_api_router(state);

    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {listen_addr}"))?;

    info!(addr = %listen_addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
        .context("API server failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            error_status(&AbacusError::ConflictExhausted { attempts: 8 }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            error_status(&AbacusError::OverflowRejected {
                current: i64::MAX,
                delta: 1
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&AbacusError::StoreUnavailable("down".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_shutdown_signal() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_shutdown_requested());

        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });

        signal.initiate_shutdown();
        assert!(signal.is_shutdown_requested());
        handle.await.unwrap();
    }

    #[test]
    fn test_timestamp_is_rfc3339() {
        let ts = timestamp();
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
