//! Abacus Node Library
//!
//! This library provides a distributed shared counter with strong
//! consistency: an optimistic-concurrency engine over an external key-value
//! store, plus the HTTP service shell around it.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod store;

// Re-export commonly used types
pub use api::{start_api_server, ApiState, ShutdownSignal};
pub use config::{AbacusConfig, OccConfig, StoreBackend};
pub use engine::{ConsistencyEngine, UpdateOutcome};
pub use error::{AbacusError, Result};
pub use store::{Commit, MemoryStore, RedisStore, SharedStore, StoreStats};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_imports() {
        // Simple test to ensure all modules can be imported
        let _ = std::any::type_name::<AbacusConfig>();
        let _ = std::any::type_name::<AbacusError>();
        let _ = std::any::type_name::<UpdateOutcome>();
        let _ = std::any::type_name::<MemoryStore>();
    }
}
