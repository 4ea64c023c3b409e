//! Per-user mutual exclusion
//!
//! One async mutex per active user. Entries are created on demand and
//! removed when the last holder or waiter is gone, so the map only grows
//! with the number of users currently being served.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OwnedMutexGuard;

type LockMap = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

#[derive(Clone, Default)]
pub struct UserLocks {
    inner: Arc<Mutex<LockMap>>,
}

/// Exclusive access to one user's session; released on drop
pub struct UserGuard {
    locks: UserLocks,
    user_id: String,
    mutex: Arc<tokio::sync::Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, LockMap> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for exclusive access to `user_id`
    ///
    /// Cancelling the returned future while it waits releases the entry the
    /// same way dropping a guard does.
    pub async fn acquire(&self, user_id: &str) -> UserGuard {
        let mut waiter = Waiter {
            locks: self.clone(),
            user_id: user_id.to_string(),
            mutex: self.map().entry(user_id.to_string()).or_default().clone(),
            acquired: false,
        };
        let guard = waiter.mutex.clone().lock_owned().await;
        waiter.acquired = true;
        UserGuard {
            locks: self.clone(),
            user_id: user_id.to_string(),
            mutex: waiter.mutex.clone(),
            guard: Some(guard),
        }
    }

    /// Drop the entry for `user_id` if `mutex` is the last outside reference
    fn release(&self, user_id: &str, mutex: &Arc<tokio::sync::Mutex<()>>) {
        let mut map = self.map();
        // One reference in the map, one held by the caller
        let idle = map
            .get(user_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, mutex) && Arc::strong_count(entry) == 2);
        if idle {
            map.remove(user_id);
        }
    }

    /// Number of users with a holder or waiter
    pub fn active(&self) -> usize {
        self.map().len()
    }
}

impl Drop for UserGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(&self.user_id, &self.mutex);
    }
}

/// Pending acquisition; cleans up if the acquiring future is dropped
struct Waiter {
    locks: UserLocks,
    user_id: String,
    mutex: Arc<tokio::sync::Mutex<()>>,
    acquired: bool,
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if !self.acquired {
            self.locks.release(&self.user_id, &self.mutex);
        }
    }
}
