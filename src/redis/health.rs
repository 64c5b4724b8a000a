//! Connection state of the shared Redis pool, as shown on `/health`.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RedisHealthStatus {
    /// No connection established yet
    Connecting = 0,
    Healthy = 1,
    /// Connection dropped, next command reconnects
    Reconnecting = 2,
    CircuitOpen = 3,
}

impl From<u8> for RedisHealthStatus {
    fn from(value: u8) -> Self {
        match value {
            1 => RedisHealthStatus::Healthy,
            2 => RedisHealthStatus::Reconnecting,
            3 => RedisHealthStatus::CircuitOpen,
            _ => RedisHealthStatus::Connecting,
        }
    }
}

impl RedisHealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedisHealthStatus::Connecting => "connecting",
            RedisHealthStatus::Healthy => "healthy",
            RedisHealthStatus::Reconnecting => "reconnecting",
            RedisHealthStatus::CircuitOpen => "circuit_open",
        }
    }
}

pub struct RedisHealth {
    status: AtomicU8,
    connects: AtomicU32,
}

impl RedisHealth {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(RedisHealthStatus::Connecting as u8),
            connects: AtomicU32::new(0),
        }
    }

    pub fn set_connected(&self) {
        self.status
            .store(RedisHealthStatus::Healthy as u8, Ordering::Release);
        self.connects.fetch_add(1, Ordering::AcqRel);
    }

    /// Mark the connection as lost. Before the first connect the pool is
    /// still `Connecting`.
    pub fn set_reconnecting(&self) {
        if self.connects.load(Ordering::Acquire) > 0 {
            self.status
                .store(RedisHealthStatus::Reconnecting as u8, Ordering::Release);
        }
    }

    pub fn set_circuit_open(&self) {
        self.status
            .store(RedisHealthStatus::CircuitOpen as u8, Ordering::Release);
    }

    pub fn status(&self) -> RedisHealthStatus {
        RedisHealthStatus::from(self.status.load(Ordering::Acquire))
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == RedisHealthStatus::Healthy
    }

    /// Successful connects after the first one.
    pub fn reconnections(&self) -> u32 {
        self.connects.load(Ordering::Acquire).saturating_sub(1)
    }
}

impl Default for RedisHealth {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        let health = RedisHealth::new();
        assert_eq!(health.status(), RedisHealthStatus::Connecting);

        // Failed first attempt is not a reconnect
        health.set_reconnecting();
        assert_eq!(health.status(), RedisHealthStatus::Connecting);
        assert!(!health.is_healthy());

        health.set_connected();
        assert!(health.is_healthy());

        health.set_reconnecting();
        assert_eq!(health.status().as_str(), "reconnecting");

        health.set_circuit_open();
        assert_eq!(health.status(), RedisHealthStatus::CircuitOpen);
    }

    #[test]
    fn test_first_connect_is_not_a_reconnection() {
        let health = RedisHealth::new();
        health.set_connected();
        assert_eq!(health.reconnections(), 0);

        health.set_reconnecting();
        health.set_connected();
        assert_eq!(health.reconnections(), 1);
    }
}
