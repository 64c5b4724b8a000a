use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::redis::PoolError;

#[derive(Debug, Error)]
pub enum LockError {
    /// Another instance holds the lock. Expected; retried on the next tick.
    #[error("Lock {0} is held by another instance")]
    Held(String),

    /// The lease expired or was taken over while we believed we held it.
    #[error("Lock {0} is no longer owned by this instance")]
    Lost(String),

    #[error("Lock backend error: {0}")]
    Backend(#[from] PoolError),
}

impl LockError {
    pub fn is_held(&self) -> bool {
        matches!(self, LockError::Held(_))
    }
}

/// Proof of ownership returned by a successful `acquire`.
///
/// Releasing is idempotent: once a `release` reached the backend the handle is
/// marked released and later calls are no-ops.
#[derive(Debug)]
pub struct LockHandle {
    key: String,
    owner: String,
    ttl: Duration,
    acquired_at: DateTime<Utc>,
    released: AtomicBool,
}

impl LockHandle {
    pub fn new(key: impl Into<String>, owner: impl Into<String>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            owner: owner.into(),
            ttl,
            acquired_at: Utc::now(),
            released: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Mark as released. Returns `true` only for the first caller.
    pub(crate) fn mark_released(&self) -> bool {
        !self.released.swap(true, Ordering::AcqRel)
    }
}
