//! Advisory per-meeting connect lock.
//!
//! Dampens duplicate near-simultaneous agent-connect requests for the same
//! meeting. Entries expire by age, and the guard releases its entry on drop
//! so every exit path (errors, caller-side cancellation) releases the lock.
//! The lock is best-effort and in-process only; the downstream connect flow
//! is idempotent, so racing after expiry is acceptable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const DEFAULT_TTL: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct ConnectLockRegistry {
    ttl: Duration,
    inner: Arc<Mutex<HashMap<String, Instant>>>,
}

impl Default for ConnectLockRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl ConnectLockRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Acquire the lock for a key, unless a younger-than-TTL entry exists.
    pub fn try_acquire(&self, key: &str) -> Option<ConnectLockGuard> {
        let mut locks = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        if let Some(stamp) = locks.get(key) {
            if now.duration_since(*stamp) < self.ttl {
                return None;
            }
        }

        locks.insert(key.to_string(), now);
        Some(ConnectLockGuard {
            key: key.to_string(),
            stamp: now,
            inner: Arc::clone(&self.inner),
        })
    }
}

/// Held lock; the entry is removed on drop. An expired entry that was
/// re-acquired by another guard carries a newer stamp and is left alone.
pub struct ConnectLockGuard {
    key: String,
    stamp: Instant,
    inner: Arc<Mutex<HashMap<String, Instant>>>,
}

impl Drop for ConnectLockGuard {
    fn drop(&mut self) {
        let mut locks = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if locks.get(&self.key) == Some(&self.stamp) {
            locks.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_then_busy() {
        let registry = ConnectLockRegistry::default();

        let guard = registry.try_acquire("m1");
        assert!(guard.is_some());
        assert!(registry.try_acquire("m1").is_none());
    }

    #[test]
    fn test_released_on_drop() {
        let registry = ConnectLockRegistry::default();

        drop(registry.try_acquire("m1").unwrap());
        assert!(registry.try_acquire("m1").is_some());
    }

    #[test]
    fn test_independent_keys() {
        let registry = ConnectLockRegistry::default();

        let _g1 = registry.try_acquire("m1").unwrap();
        assert!(registry.try_acquire("m2").is_some());
    }

    #[test]
    fn test_expired_entry_can_be_reacquired() {
        let registry = ConnectLockRegistry::new(Duration::from_millis(10));

        let stale = registry.try_acquire("m1").unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let fresh = registry.try_acquire("m1");
        assert!(fresh.is_some());

        // The stale guard must not remove the fresh holder's entry.
        drop(stale);
        assert!(registry.try_acquire("m1").is_none());
        drop(fresh);
    }
}
