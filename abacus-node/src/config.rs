use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main configuration for the abacus node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbacusConfig {
    /// Service identity and environment
    pub service: ServiceConfig,
    /// Backing store connection settings
    pub store: StoreConfig,
    /// Optimistic concurrency control policy
    pub occ: OccConfig,
    /// Public HTTP API settings
    pub api: ApiConfig,
    /// Metrics and monitoring
    pub metrics: MetricsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Service identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Deployment environment (development, staging, production)
    pub environment: String,
    /// Node identifier (if empty, one is generated at startup)
    pub node_id: Option<String>,
}

/// Which store implementation backs the shared counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Redis-compatible server over TCP
    Redis,
    /// In-process store, single node only
    Memory,
}

/// Backing store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store backend selection
    pub backend: StoreBackend,
    /// Store server hostname
    pub host: String,
    /// Store server port
    pub port: u16,
    /// Logical database index selected on connect
    pub db: u32,
    /// Key under which the shared counter lives
    pub counter_key: String,
    /// Connection establishment timeout in seconds
    pub connect_timeout_seconds: u64,
    /// Maximum idle connections kept in the pool
    pub pool_size: usize,
}

impl StoreConfig {
    /// Get connection establishment timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

/// Optimistic concurrency control policy
///
/// Conflicts are expected to be transient, so the retry bound is small and
/// the backoff stays below 10ms. Each retry sleeps a uniformly jittered
/// duration in `[backoff_floor_micros, backoff_ceiling_micros)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccConfig {
    /// Maximum conditional-write attempts before giving up
    pub max_attempts: u32,
    /// Lower bound of the jittered backoff window (microseconds)
    pub backoff_floor_micros: u64,
    /// Upper bound of the jittered backoff window (microseconds)
    pub backoff_ceiling_micros: u64,
}

/// Public HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Listen address for the HTTP API
    pub listen_addr: String,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter
    pub enabled: bool,
    /// Listen address for the Prometheus scrape endpoint
    pub listen_addr: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default tracing filter when RUST_LOG is not set
    pub level: String,
}

impl Default for AbacusConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                environment: "development".to_string(),
                node_id: None,
            },
            store: StoreConfig {
                backend: StoreBackend::Redis,
                host: "localhost".to_string(),
                port: 6379,
                db: 0,
                counter_key: "abacus:sum".to_string(),
                connect_timeout_seconds: 5,
                pool_size: 8,
            },
            occ: OccConfig {
                max_attempts: 8,
                backoff_floor_micros: 500,
                backoff_ceiling_micros: 8_000,
            },
            api: ApiConfig {
                listen_addr: "0.0.0.0:8000".to_string(),
            },
            metrics: MetricsConfig {
                enabled: false,
                listen_addr: "127.0.0.1:9100".to_string(),
            },
            logging: LoggingConfig {
                level: "abacus_node=info".to_string(),
            },
        }
    }
}

impl AbacusConfig {
    /// Load configuration from file with environment overrides
    pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("ABACUS").separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    /// Apply plain environment variables used by container deployments
    ///
    /// These predate the `ABACUS__` prefixed overrides and keep existing
    /// deployment manifests working: REDIS_HOST, REDIS_PORT, REDIS_DB,
    /// NODE_ID.
    pub fn apply_environment_overrides(&mut self) {
        if let Ok(host) = std::env::var("REDIS_HOST") {
            self.store.host = host;
        }
        if let Ok(port) = std::env::var("REDIS_PORT") {
            if let Ok(port) = port.parse() {
                self.store.port = port;
            }
        }
        if let Ok(db) = std::env::var("REDIS_DB") {
            if let Ok(db) = db.parse() {
                self.store.db = db;
            }
        }
        if let Ok(node_id) = std::env::var("NODE_ID") {
            self.service.node_id = Some(node_id);
        }
    }

    /// Get the API listen address
    pub fn listen_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api.listen_addr.parse()
    }

    /// Get the metrics listen address
    pub fn metrics_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.metrics.listen_addr.parse()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.store.port == 0 {
            return Err("Store port cannot be 0".to_string());
        }

        if self.store.counter_key.is_empty() {
            return Err("Counter key cannot be empty".to_string());
        }

        if self.store.pool_size == 0 {
            return Err("Store pool size must be at least 1".to_string());
        }

        if self.occ.max_attempts == 0 {
            return Err("OCC max_attempts must be at least 1".to_string());
        }

        if self.occ.backoff_floor_micros >= self.occ.backoff_ceiling_micros {
            return Err("OCC backoff floor must be below the ceiling".to_string());
        }

        if self.listen_addr().is_err() {
            return Err(format!(
                "Invalid API listen address: {}",
                self.api.listen_addr
            ));
        }

        if self.metrics.enabled && self.metrics_addr().is_err() {
            return Err(format!(
                "Invalid metrics listen address: {}",
                self.metrics.listen_addr
            ));
        }

        Ok(())
    }
}
