// Consistency engine
//
// The optimistic-concurrency update cycle for the shared counter:
// watch the key, read under the fence, compute the candidate, commit it
// conditionally, retry on conflict with jittered backoff. No in-process lock
// is taken around the counter and no value is cached across calls; conflict
// detection lives entirely in the store's watch/commit primitive, so any
// number of nodes can race on the same key.

use metrics::counter;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::OccConfig;
use crate::error::{AbacusError, Result};
use crate::store::{Commit, SharedStore};

/// Result of a successful counter update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Counter value after the commit
    pub value: i64,
    /// Conditional-write attempts taken, starting at 1
    pub attempts: u32,
}

/// Optimistic-concurrency engine over the shared counter
pub struct ConsistencyEngine<S: SharedStore> {
    store: Arc<S>,
    key: String,
    policy: OccConfig,
}

impl<S: SharedStore> ConsistencyEngine<S> {
    pub fn new(store: Arc<S>, key: impl Into<String>, policy: OccConfig) -> Self {
        Self {
            store,
            key: key.into(),
            policy,
        }
    }

    /// Atomically add `delta` to the counter
    ///
    /// Returns the committed value and the number of attempts taken, or
    /// `ConflictExhausted` once the retry budget is spent. A failed attempt
    /// never leaves a partial write behind: either the conditional commit
    /// takes effect in full or the store discards it.
    pub async fn apply_delta(&self, delta: i64) -> Result<UpdateOutcome> {
        self.run_occ(|current| {
            current
                .checked_add(delta)
                .ok_or(AbacusError::OverflowRejected { current, delta })
        })
        .await
    }

    /// Plain read of the counter; an absent key reads as zero
    pub async fn read_current(&self) -> Result<i64> {
        Ok(self.store.read(&self.key).await?.unwrap_or(0))
    }

    /// Set the counter back to zero
    ///
    /// Goes through the same watch/commit cycle as `apply_delta` so a reset
    /// racing a concurrent add can neither lose that add silently nor
    /// resurrect a stale value; commit order decides which lands last.
    pub async fn reset(&self) -> Result<UpdateOutcome> {
        self.run_occ(|_| Ok(0)).await
    }

    /// One full OCC cycle: watch, read, compute, conditionally commit
    async fn run_occ<F>(&self, compute: F) -> Result<UpdateOutcome>
    where
        F: Fn(i64) -> Result<i64>,
    {
        for attempt in 1..=self.policy.max_attempts {
            let fence = self.store.watch(&self.key).await?;
            let current = self.store.read(&self.key).await?.unwrap_or(0);
            let candidate = compute(current)?;

            match self.store.commit_if(fence, &self.key, candidate).await? {
                Commit::Committed => {
                    counter!("abacus_commits_total", 1);
                    debug!(value = candidate, attempt, "Committed counter update");
                    return Ok(UpdateOutcome {
                        value: candidate,
                        attempts: attempt,
                    });
                }
                Commit::Conflict => {
                    counter!("abacus_conflicts_total", 1);
                    debug!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        "Commit conflict, retrying"
                    );
                    if attempt < self.policy.max_attempts {
                        self.backoff().await;
                    }
                }
            }
        }

        counter!("abacus_retries_exhausted_total", 1);
        warn!(
            attempts = self.policy.max_attempts,
            key = %self.key,
            "Retry budget exhausted, counter key is highly contended"
        );
        Err(AbacusError::ConflictExhausted {
            attempts: self.policy.max_attempts,
        })
    }

    /// Sleep a uniformly jittered sub-10ms interval between retries
    async fn backoff(&self) {
        let micros = {
            let mut rng = rand::thread_rng();
            rng.gen_range(self.policy.backoff_floor_micros..self.policy.backoff_ceiling_micros)
        };
        sleep(Duration::from_micros(micros)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn test_policy() -> OccConfig {
        OccConfig {
            max_attempts: 8,
            backoff_floor_micros: 100,
            backoff_ceiling_micros: 500,
        }
    }

    fn test_engine() -> ConsistencyEngine<MemoryStore> {
        ConsistencyEngine::new(Arc::new(MemoryStore::new()), "abacus:sum", test_policy())
    }

    #[tokio::test]
    async fn test_apply_delta_from_absent_key() {
        let engine = test_engine();

        let outcome = engine.apply_delta(42).await.unwrap();
        assert_eq!(outcome.value, 42);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_apply_delta_accumulates() {
        let engine = test_engine();

        engine.apply_delta(10).await.unwrap();
        engine.apply_delta(-3).await.unwrap();
        let outcome = engine.apply_delta(0).await.unwrap();

        assert_eq!(outcome.value, 7);
        assert_eq!(engine.read_current().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_read_current_defaults_to_zero() {
        let engine = test_engine();
        assert_eq!(engine.read_current().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reads_are_idempotent() {
        let engine = test_engine();
        engine.apply_delta(5).await.unwrap();

        let first = engine.read_current().await.unwrap();
        let second = engine.read_current().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_reset_leaves_zero() {
        let engine = test_engine();

        engine.apply_delta(5).await.unwrap();
        let outcome = engine.reset().await.unwrap();
        assert_eq!(outcome.value, 0);
        assert_eq!(engine.read_current().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_overflow_rejected_without_side_effect() {
        let engine = test_engine();
        engine.apply_delta(i64::MAX).await.unwrap();

        let err = engine.apply_delta(1).await.unwrap_err();
        assert!(matches!(
            err,
            AbacusError::OverflowRejected {
                current: i64::MAX,
                delta: 1
            }
        ));
        // The rejected delta must leave the counter untouched
        assert_eq!(engine.read_current().await.unwrap(), i64::MAX);
    }

    #[tokio::test]
    async fn test_underflow_rejected() {
        let engine = test_engine();
        engine.apply_delta(i64::MIN).await.unwrap();

        let err = engine.apply_delta(-1).await.unwrap_err();
        assert!(matches!(err, AbacusError::OverflowRejected { .. }));
    }
}
