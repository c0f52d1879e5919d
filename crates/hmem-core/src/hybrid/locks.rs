//! Per-record transition locks
//!
//! A record may be touched by at most one transition (migration, recall,
//! delete) at a time. Entries are created on demand and removed when the
//! last holder or waiter lets go.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Default)]
pub struct TransitionLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// Held for the duration of one transition
pub struct TransitionGuard {
    id: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl TransitionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks.entry(id.to_string()).or_default().clone()
    }

    /// Wait for the lock on `id`
    pub async fn acquire(&self, id: &str) -> TransitionGuard {
        let guard = self.slot(id).lock_owned().await;
        TransitionGuard {
            id: id.to_string(),
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    /// Take the lock on `id` only if nobody holds it
    pub fn try_acquire(&self, id: &str) -> Option<TransitionGuard> {
        let guard = self.slot(id).try_lock_owned().ok()?;
        Some(TransitionGuard {
            id: id.to_string(),
            locks: self.locks.clone(),
            guard: Some(guard),
        })
    }

    /// Ids with a live lock entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for TransitionGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.id, |_, slot| Arc::strong_count(slot) == 1);
    }
}
