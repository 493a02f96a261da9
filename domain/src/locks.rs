use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use database_adapter::model::UserId;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

type HoldingKey = (UserId, String);

/// Idle entries are swept once the registry grows past this size
const SWEEP_THRESHOLD: usize = 1024;

/// One async mutex per (user, ticker). Trades on the same pair run one at a
/// time, different pairs never wait on each other.
#[derive(Debug, Default)]
pub struct HoldingLocks {
    locks: Mutex<HashMap<HoldingKey, Arc<tokio::sync::Mutex<()>>>>,
}

/// Held for the duration of a read-modify-write on one holding
#[derive(Debug)]
pub struct HoldingGuard {
    _guard: OwnedMutexGuard<()>,
}

impl HoldingLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, user_id: UserId, ticker: &str) -> HoldingGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if locks.len() >= SWEEP_THRESHOLD {
                // Only the map holds a reference to an idle lock
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            Arc::clone(locks.entry((user_id, ticker.to_string())).or_default())
        };
        debug!("Waiting for holding lock {user_id}/{ticker}");
        HoldingGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of pairs currently tracked
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
