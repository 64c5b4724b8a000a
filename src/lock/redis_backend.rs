//! Fleet-wide lock on a single Redis key.
//!
//! Acquisition is one `SET lock:{key} {owner} NX PX {ttl}`; release and
//! extension run as Lua scripts that first check the stored owner so an
//! instance can never touch a lease that expired and moved to someone else.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use uuid::Uuid;

use crate::redis::RedisPool;

use super::{LockCoordinator, LockError, LockHandle};

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

const EXTEND_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

pub struct RedisLockCoordinator {
    pool: Arc<RedisPool>,
    ttl: Duration,
    /// Distinguishes this process in lock owner values
    instance_id: String,
}

impl RedisLockCoordinator {
    pub fn new(pool: Arc<RedisPool>, ttl: Duration) -> Self {
        Self {
            pool,
            ttl,
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn lock_key(key: &str) -> String {
        format!("lock:{}", key)
    }

    /// Run an owner-checked script, returning whether it took effect.
    async fn owner_script(
        &self,
        script: &'static str,
        handle: &LockHandle,
        extra: Option<u64>,
    ) -> Result<bool, LockError> {
        let lock_key = Self::lock_key(handle.key());
        let owner = handle.owner().to_string();

        let affected: i64 = self
            .pool
            .execute(|mut conn| async move {
                let script = Script::new(script);
                let mut invocation = script.key(&lock_key);
                invocation.arg(&owner);
                if let Some(value) = extra {
                    invocation.arg(value);
                }
                invocation.invoke_async(&mut conn).await
            })
            .await?;

        Ok(affected > 0)
    }
}

#[async_trait]
impl LockCoordinator for RedisLockCoordinator {
    fn backend(&self) -> &'static str {
        "redis"
    }

    #[tracing::instrument(skip(self), fields(instance_id = %self.instance_id))]
    async fn acquire(&self, key: &str) -> Result<LockHandle, LockError> {
        let lock_key = Self::lock_key(key);
        let owner = format!("{}:{}", self.instance_id, Uuid::new_v4());
        let ttl_ms = self.ttl.as_millis() as u64;

        let set_owner = owner.clone();
        // SET NX answers "OK" on success and nil when the key exists
        let result: Option<String> = self
            .pool
            .execute(|mut conn| async move {
                redis::cmd("SET")
                    .arg(&lock_key)
                    .arg(&set_owner)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_ms)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        match result {
            Some(_) => {
                tracing::debug!(key = %key, owner = %owner, "Redis lock acquired");
                Ok(LockHandle::new(key, owner, self.ttl))
            }
            None => Err(LockError::Held(key.to_string())),
        }
    }

    async fn extend(&self, handle: &LockHandle) -> Result<(), LockError> {
        if handle.is_released() {
            return Err(LockError::Lost(handle.key().to_string()));
        }

        let ttl_ms = handle.ttl().as_millis() as u64;
        if self.owner_script(EXTEND_SCRIPT, handle, Some(ttl_ms)).await? {
            Ok(())
        } else {
            Err(LockError::Lost(handle.key().to_string()))
        }
    }

    async fn release(&self, handle: &LockHandle) -> Result<(), LockError> {
        if handle.is_released() {
            return Ok(());
        }

        // A backend error leaves the handle releasable for a retry
        let deleted = self.owner_script(RELEASE_SCRIPT, handle, None).await?;
        handle.mark_released();

        if deleted {
            tracing::debug!(key = %handle.key(), "Redis lock released");
        } else {
            tracing::warn!(
                key = %handle.key(),
                "Redis lock was not owned at release, it may have expired"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedisConfig;
    use crate::redis::{CircuitBreaker, RedisHealth};

    #[test]
    fn test_lock_key_prefix() {
        assert_eq!(
            RedisLockCoordinator::lock_key("publisher_manager_lock"),
            "lock:publisher_manager_lock"
        );
    }

    #[test]
    fn test_scripts_check_owner() {
        assert!(RELEASE_SCRIPT.contains("ARGV[1]"));
        assert!(EXTEND_SCRIPT.contains("PEXPIRE"));
    }

    #[tokio::test]
    async fn test_failed_release_keeps_handle_releasable() {
        let breaker = Arc::new(CircuitBreaker::new());
        for _ in 0..5 {
            breaker.record_failure();
        }
        let pool = RedisPool::new(RedisConfig::default(), breaker, Arc::new(RedisHealth::new()))
            .unwrap();
        let coordinator = RedisLockCoordinator::new(Arc::new(pool), Duration::from_secs(30));
        let handle = LockHandle::new("publisher_manager_lock", "owner", Duration::from_secs(30));

        let result = coordinator.release(&handle).await;
        assert!(matches!(result, Err(LockError::Backend(_))));
        assert!(!handle.is_released());

        // Still rejected, still not marked: the next attempt talks to Redis again
        assert!(coordinator.release(&handle).await.is_err());
        assert!(!handle.is_released());
    }
}
