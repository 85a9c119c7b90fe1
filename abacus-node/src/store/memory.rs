// In-process store implementation
//
// Backs the `memory` store backend for local development and gives tests a
// deterministic stand-in for the real server. Conflict detection uses a
// per-key version that is bumped by every successful commit or delete, so a
// stale fence can never commit over a concurrent write (including the
// delete-then-recreate case).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

use super::{Commit, SharedStore, StoreStats};
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    /// `None` once the key has been deleted; the version survives deletion
    value: Option<i64>,
    version: u64,
}

/// Fence over an in-memory key, valid for one commit attempt
#[derive(Debug)]
pub struct MemoryFence {
    version: u64,
}

/// Single-process [`SharedStore`] implementation
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<String, Slot>>,
    commands: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_command(&self) {
        self.commands.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    type Fence = MemoryFence;

    async fn read(&self, key: &str) -> Result<Option<i64>> {
        self.record_command();
        let slots = self.slots.lock().await;
        Ok(slots.get(key).and_then(|slot| slot.value))
    }

    async fn watch(&self, key: &str) -> Result<MemoryFence> {
        self.record_command();
        let slots = self.slots.lock().await;
        let version = slots.get(key).map(|slot| slot.version).unwrap_or(0);
        Ok(MemoryFence { version })
    }

    async fn commit_if(&self, fence: MemoryFence, key: &str, value: i64) -> Result<Commit> {
        self.record_command();
        let mut slots = self.slots.lock().await;
        let slot = slots.entry(key.to_string()).or_default();
        if slot.version != fence.version {
            return Ok(Commit::Conflict);
        }
        slot.value = Some(value);
        slot.version += 1;
        Ok(Commit::Committed)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.record_command();
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(key) {
            if slot.value.take().is_some() {
                slot.version += 1;
            }
        }
        Ok(())
    }

    async fn ping(&self) -> Result<bool> {
        self.record_command();
        Ok(true)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let slots = self.slots.lock().await;
        Ok(StoreStats {
            connected_clients: 1,
            commands_processed: self.commands.load(Ordering::Relaxed),
            memory_used_bytes: (slots.len() * std::mem::size_of::<(String, Slot)>()) as u64,
        })
    }
}
