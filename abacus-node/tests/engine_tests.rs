//! Consistency property tests for the abacus engine
//!
//! These validate the guarantees the OCC protocol makes under concurrency:
//! - Conservation: no committed delta is lost or double-applied
//! - Atomicity under contention: lost-update prevention
//! - Reset correctness when racing a concurrent add
//! - Retry bound under forced conflicts

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use abacus_node::config::OccConfig;
use abacus_node::engine::ConsistencyEngine;
use abacus_node::error::{AbacusError, Result};
use abacus_node::store::memory::MemoryFence;
use abacus_node::store::{Commit, MemoryStore, SharedStore, StoreStats};

const KEY: &str = "abacus:sum";

/// Generous retry budget for contention tests; the bound itself is
/// exercised separately with a forced-conflict store.
fn contended_policy() -> OccConfig {
    OccConfig {
        max_attempts: 1_000,
        backoff_floor_micros: 100,
        backoff_ceiling_micros: 800,
    }
}

fn engine_over(store: Arc<MemoryStore>) -> Arc<ConsistencyEngine<MemoryStore>> {
    Arc::new(ConsistencyEngine::new(store, KEY, contended_policy()))
}

/// Store wrapper whose conditional commits always lose the race
struct ForcedConflictStore {
    inner: MemoryStore,
    commit_attempts: AtomicU32,
}

impl ForcedConflictStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            commit_attempts: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl SharedStore for ForcedConflictStore {
    type Fence = MemoryFence;

    async fn read(&self, key: &str) -> Result<Option<i64>> {
        self.inner.read(key).await
    }

    async fn watch(&self, key: &str) -> Result<MemoryFence> {
        self.inner.watch(key).await
    }

    async fn commit_if(&self, _fence: MemoryFence, _key: &str, _value: i64) -> Result<Commit> {
        self.commit_attempts.fetch_add(1, Ordering::SeqCst);
        Ok(Commit::Conflict)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn ping(&self) -> Result<bool> {
        self.inner.ping().await
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.inner.stats().await
    }
}

mod consistency_tests {
    use super::*;

    #[tokio::test]
    async fn test_conservation_across_concurrent_writers() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_over(store);

        let writers = 8;
        let adds_per_writer: i64 = 25;

        let mut handles = Vec::new();
        for writer in 0..writers {
            let engine = Arc::clone(&engine);
            handles.push(tokio::spawn(async move {
                for i in 0..adds_per_writer {
                    // Mix of positive and negative deltas per writer
                    let delta = writer as i64 + i - 10;
                    engine.apply_delta(delta).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut expected = 0i64;
        for writer in 0..writers {
            for i in 0..adds_per_writer {
                expected += writer as i64 + i - 10;
            }
        }
        assert_eq!(engine.read_current().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_atomicity_of_two_concurrent_adds() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_over(store);
        engine.apply_delta(5).await.unwrap();

        let a = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.apply_delta(10).await.unwrap() })
        };
        let b = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.apply_delta(20).await.unwrap() })
        };
        a.await.unwrap();
        b.await.unwrap();

        // Never v+a or v+b alone, regardless of interleaving
        assert_eq!(engine.read_current().await.unwrap(), 35);
    }

    #[tokio::test]
    async fn test_worked_example_ten_and_twenty() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_over(store);

        let a = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.apply_delta(10).await.unwrap() })
        };
        let b = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.apply_delta(20).await.unwrap() })
        };
        a.await.unwrap();
        b.await.unwrap();

        assert_eq!(engine.read_current().await.unwrap(), 30);
    }

    #[tokio::test]
    async fn test_add_then_reset_then_read() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_over(store);

        engine.apply_delta(5).await.unwrap();
        engine.reset().await.unwrap();
        assert_eq!(engine.read_current().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reset_racing_concurrent_add() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_over(store);

        let add = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.apply_delta(7).await.unwrap() })
        };
        let reset = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.reset().await.unwrap() })
        };
        add.await.unwrap();
        reset.await.unwrap();

        // Commit order decides which lands last; anything else is corruption
        let value = engine.read_current().await.unwrap();
        assert!(value == 0 || value == 7, "unexpected counter value {value}");
    }

    #[tokio::test]
    async fn test_delete_resets_reads_to_zero() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_over(Arc::clone(&store));

        engine.apply_delta(5).await.unwrap();
        store.delete(KEY).await.unwrap();
        assert_eq!(engine.read_current().await.unwrap(), 0);
    }
}

mod retry_bound_tests {
    use super::*;

    #[tokio::test]
    async fn test_conflict_exhaustion_respects_the_bound() {
        let store = Arc::new(ForcedConflictStore::new());
        let policy = OccConfig {
            max_attempts: 5,
            backoff_floor_micros: 100,
            backoff_ceiling_micros: 400,
        };
        let engine = ConsistencyEngine::new(Arc::clone(&store), KEY, policy);

        let err = engine.apply_delta(1).await.unwrap_err();
        assert!(matches!(err, AbacusError::ConflictExhausted { attempts: 5 }));

        // Exactly max_attempts conditional writes were issued, no more
        assert_eq!(store.commit_attempts.load(Ordering::SeqCst), 5);

        // A failed update has no observable effect on the counter
        assert_eq!(engine.read_current().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reset_is_also_bounded() {
        let store = Arc::new(ForcedConflictStore::new());
        let policy = OccConfig {
            max_attempts: 3,
            backoff_floor_micros: 100,
            backoff_ceiling_micros: 400,
        };
        let engine = ConsistencyEngine::new(Arc::clone(&store), KEY, policy);

        let err = engine.reset().await.unwrap_err();
        assert!(matches!(err, AbacusError::ConflictExhausted { attempts: 3 }));
        assert_eq!(store.commit_attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_single_attempt_when_uncontended() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_over(store);

        let outcome = engine.apply_delta(3).await.unwrap();
        assert_eq!(outcome.attempts, 1);
    }
}
