use thiserror::Error;

/// Errors that can occur in the abacus node library
#[derive(Error, Debug)]
pub enum AbacusError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The backing store is unreachable or a transport operation failed
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Retry budget exhausted under concurrent-modification races
    #[error("Conflict retries exhausted after {attempts} attempts")]
    ConflictExhausted { attempts: u32 },

    /// Candidate value would leave the representable numeric range
    #[error("Overflow rejected: {current} + {delta} exceeds the counter range")]
    OverflowRejected { current: i64, delta: i64 },

    /// The store replied with something the protocol layer cannot interpret
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type alias using AbacusError
pub type Result<T> = std::result::Result<T, AbacusError>;

impl From<std::io::Error> for AbacusError {
    fn from(err: std::io::Error) -> Self {
        AbacusError::StoreUnavailable(err.to_string())
    }
}
