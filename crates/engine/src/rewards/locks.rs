//! Per-user serialisation of ledger and inventory mutations

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Idle locks are pruned once the map grows past this many users
const PRUNE_THRESHOLD: usize = 1024;

/// One async lock per user id.
///
/// Holding the guard keeps every other opener or spender for the same user
/// waiting; different users never contend.
#[derive(Default)]
pub struct UserLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a user's state
    pub async fn lock(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if locks.len() > PRUNE_THRESHOLD {
                locks.retain(|_, l| Arc::strong_count(l) > 1);
            }
            locks.entry(user_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of users with a lock entry
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_user_waits() {
        let locks = Arc::new(UserLocks::new());
        let guard = locks.lock("u1").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock("u1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_users_do_not_contend() {
        let locks = UserLocks::new();
        let _a = locks.lock("u1").await;
        let _b = tokio::time::timeout(Duration::from_millis(100), locks.lock("u2"))
            .await
            .unwrap();
        assert_eq!(locks.len(), 2);
    }
}
