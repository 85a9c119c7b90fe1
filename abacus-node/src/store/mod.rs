// Shared store abstraction
//
// The counter's authoritative state lives in an external key-value store.
// The core only depends on this contract: linearizable single-key reads and
// writes, plus a watch/conditional-commit primitive for conflict detection.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

pub mod memory;
pub mod redis;
pub mod resp;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// Outcome of a conditional commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// The watched key was unchanged and the write took effect
    Committed,
    /// Another writer modified the key after the watch began
    Conflict,
}

/// Raw usage statistics reported by the backing store
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    /// Clients currently connected to the store
    pub connected_clients: u64,
    /// Total commands the store has processed
    pub commands_processed: u64,
    /// Memory used by the store, in bytes
    pub memory_used_bytes: u64,
}

/// Contract offered by the backing key-value store
///
/// `watch` establishes a conflict-detection fence on a key; a later
/// `commit_if` with that fence succeeds only if no other writer touched the
/// key in between. Implementations must be safe for concurrent independent
/// use: any number of callers may hold fences on the same key at once.
#[async_trait]
pub trait SharedStore: Send + Sync + 'static {
    /// Token carrying the watch state between `watch` and `commit_if`
    type Fence: Send;

    /// Plain read of a key; `None` if the key is absent
    async fn read(&self, key: &str) -> Result<Option<i64>>;

    /// Begin an optimistic watch on a key
    async fn watch(&self, key: &str) -> Result<Self::Fence>;

    /// Write `value` to `key` only if the key is unchanged since the watch
    ///
    /// Consumes the fence either way; a fence is good for exactly one
    /// commit attempt.
    async fn commit_if(&self, fence: Self::Fence, key: &str, value: i64) -> Result<Commit>;

    /// Unconditionally remove a key
    async fn delete(&self, key: &str) -> Result<()>;

    /// Connectivity probe
    async fn ping(&self) -> Result<bool>;

    /// Usage statistics
    async fn stats(&self) -> Result<StoreStats>;
}
