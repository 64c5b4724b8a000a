//! Process-local lock coordinator.
//!
//! Only excludes holders sharing the same instance, so it suits single-node
//! deployments and tests where several supervisors share one `Arc`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::{LockCoordinator, LockError, LockHandle};

struct Lease {
    owner: String,
    expires_at: Instant,
}

pub struct MemoryLockCoordinator {
    leases: DashMap<String, Lease>,
    ttl: Duration,
    instance_id: String,
}

impl MemoryLockCoordinator {
    pub fn new(ttl: Duration) -> Self {
        Self {
            leases: DashMap::new(),
            ttl,
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Current owner of `key`, if the lease is live.
    pub fn holder(&self, key: &str) -> Option<String> {
        self.leases
            .get(key)
            .filter(|lease| lease.expires_at > Instant::now())
            .map(|lease| lease.owner.clone())
    }
}

#[async_trait]
impl LockCoordinator for MemoryLockCoordinator {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn acquire(&self, key: &str) -> Result<LockHandle, LockError> {
        let owner = format!("{}:{}", self.instance_id, Uuid::new_v4());
        let now = Instant::now();

        match self.leases.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().expires_at > now {
                    return Err(LockError::Held(key.to_string()));
                }
                // Expired lease: take it over
                entry.insert(Lease {
                    owner: owner.clone(),
                    expires_at: now + self.ttl,
                });
            }
            Entry::Vacant(entry) => {
                entry.insert(Lease {
                    owner: owner.clone(),
                    expires_at: now + self.ttl,
                });
            }
        }

        tracing::debug!(key = %key, owner = %owner, "Memory lock acquired");
        Ok(LockHandle::new(key, owner, self.ttl))
    }

    async fn extend(&self, handle: &LockHandle) -> Result<(), LockError> {
        if handle.is_released() {
            return Err(LockError::Lost(handle.key().to_string()));
        }

        let now = Instant::now();
        match self.leases.get_mut(handle.key()) {
            Some(mut lease) if lease.owner == handle.owner() && lease.expires_at > now => {
                lease.expires_at = now + handle.ttl();
                Ok(())
            }
            _ => Err(LockError::Lost(handle.key().to_string())),
        }
    }

    async fn release(&self, handle: &LockHandle) -> Result<(), LockError> {
        if !handle.mark_released() {
            return Ok(());
        }

        let removed = self
            .leases
            .remove_if(handle.key(), |_, lease| lease.owner == handle.owner());

        if removed.is_none() {
            tracing::debug!(key = %handle.key(), "Memory lock already gone at release");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_acquire_is_held() {
        let coordinator = MemoryLockCoordinator::new(Duration::from_secs(30));
        let handle = coordinator.acquire("k").await.unwrap();

        let second = coordinator.acquire("k").await;
        assert!(matches!(second, Err(LockError::Held(_))));
        assert_eq!(coordinator.holder("k").as_deref(), Some(handle.owner()));
    }

    #[tokio::test]
    async fn test_release_is_idempotent_and_frees_key() {
        let coordinator = MemoryLockCoordinator::new(Duration::from_secs(30));
        let handle = coordinator.acquire("k").await.unwrap();

        coordinator.release(&handle).await.unwrap();
        coordinator.release(&handle).await.unwrap();
        assert!(coordinator.holder("k").is_none());

        assert!(coordinator.acquire("k").await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_release_does_not_free_new_owner() {
        let coordinator = MemoryLockCoordinator::new(Duration::from_millis(20));
        let old = coordinator.acquire("k").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let new = coordinator.acquire("k").await.unwrap();
        coordinator.release(&old).await.unwrap();
        assert_eq!(coordinator.holder("k").as_deref(), Some(new.owner()));
    }

    #[tokio::test]
    async fn test_extend_after_expiry_is_lost() {
        let coordinator = MemoryLockCoordinator::new(Duration::from_millis(20));
        let handle = coordinator.acquire("k").await.unwrap();
        coordinator.extend(&handle).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        let result = coordinator.extend(&handle).await;
        assert!(matches!(result, Err(LockError::Lost(_))));
    }
}
