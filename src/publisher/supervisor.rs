use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::PublisherConfig;
use crate::lock::{LockCoordinator, LockError, LockHandle};
use crate::metrics::LockMetrics;
use crate::outcome::MailTransport;
use crate::stream::{BatchHandler, StreamConsumer, StreamConsumerFactory, StreamCursor};

use super::status::{PublisherStatus, SupervisorState};

/// Why a lock-holding run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunExit {
    Shutdown,
    ConsumerStopped,
    LockLost,
    StartFailed,
}

impl RunExit {
    fn as_str(&self) -> &'static str {
        match self {
            RunExit::Shutdown => "shutdown",
            RunExit::ConsumerStopped => "consumer_stopped",
            RunExit::LockLost => "lock_lost",
            RunExit::StartFailed => "start_failed",
        }
    }
}

/// Periodically competes for the publisher lock and, while holding it, keeps
/// a stream consumer running.
///
/// ```text
/// Idle -> Acquiring -> Running -> Idle ... -> Stopped
/// ```
///
/// Cleanup (consumer shutdown, lock release) runs on every exit from Running,
/// panics included.
pub struct PublisherSupervisor {
    config: PublisherConfig,
    lock: Arc<dyn LockCoordinator>,
    consumers: Arc<dyn StreamConsumerFactory>,
    handler: Arc<dyn BatchHandler>,
    mail: Arc<dyn MailTransport>,
    state: AtomicU8,
    smtp_active: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl PublisherSupervisor {
    pub fn new(
        config: PublisherConfig,
        lock: Arc<dyn LockCoordinator>,
        consumers: Arc<dyn StreamConsumerFactory>,
        handler: Arc<dyn BatchHandler>,
        mail: Arc<dyn MailTransport>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            lock,
            consumers,
            handler,
            mail,
            state: AtomicU8::new(SupervisorState::Idle as u8),
            smtp_active: AtomicBool::new(false),
            shutdown_tx,
            scheduler: Mutex::new(None),
        }
    }

    /// Probe SMTP and schedule lock attempts. No-op when disabled, already
    /// started, or shut down.
    pub async fn start(self: &Arc<Self>) {
        let smtp_active = self.mail.is_alive().await;
        self.smtp_active.store(smtp_active, Ordering::Release);

        if !self.config.enabled {
            tracing::info!("Publisher disabled, not scheduling");
            return;
        }

        let mut scheduler = self.scheduler.lock().await;
        if scheduler.is_some() || self.is_shutting_down() {
            return;
        }

        tracing::info!(
            lock_key = %self.config.lock_key,
            lock_backend = self.lock.backend(),
            stream_backend = self.consumers.backend(),
            schedule_interval_ms = self.config.schedule_interval_ms,
            smtp_active = smtp_active,
            "Publisher supervisor started"
        );
        *scheduler = Some(tokio::spawn(Arc::clone(self).schedule()));
    }

    /// Stop scheduling and wait for the current run (if any) to clean up.
    pub async fn shutdown(&self) {
        if !self.shutdown_tx.send_replace(true) {
            tracing::info!("Publisher supervisor shutting down");
        }

        // Held across the await so concurrent callers also wait for cleanup
        let mut scheduler = self.scheduler.lock().await;
        if let Some(handle) = scheduler.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Publisher scheduler task failed");
            }
        }
        self.set_state(SupervisorState::Stopped);
    }

    pub fn status(&self) -> PublisherStatus {
        PublisherStatus::new(
            self.config.enabled,
            self.smtp_active.load(Ordering::Acquire),
            self.state() == SupervisorState::Running,
        )
    }

    pub fn state(&self) -> SupervisorState {
        SupervisorState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    fn set_state(&self, state: SupervisorState) {
        self.state.store(state as u8, Ordering::Release);
    }

    async fn schedule(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = self.config.schedule_interval();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown_rx.changed() => break,
            }

            if *shutdown_rx.borrow() {
                break;
            }
            self.run_cycle(&mut shutdown_rx).await;
        }

        self.set_state(SupervisorState::Stopped);
        tracing::debug!("Publisher scheduler stopped");
    }

    async fn run_cycle(&self, shutdown_rx: &mut watch::Receiver<bool>) {
        self.set_state(SupervisorState::Acquiring);

        // Lower bound for the lease start; the backend sets the TTL after this
        let attempted_at = Instant::now();
        let handle = match self.lock.acquire(&self.config.lock_key).await {
            Ok(handle) => {
                LockMetrics::record_acquired();
                handle
            }
            Err(e) if e.is_held() => {
                LockMetrics::record_held();
                tracing::debug!(lock_key = %self.config.lock_key, "Publisher lock held elsewhere");
                self.set_state(SupervisorState::Idle);
                return;
            }
            Err(e) => {
                LockMetrics::record_error();
                tracing::error!(error = %e, lock_key = %self.config.lock_key, "Failed to acquire publisher lock");
                self.set_state(SupervisorState::Idle);
                return;
            }
        };

        tracing::info!(owner = %handle.owner(), "Publisher lock acquired, starting consumer");
        let started = Instant::now();
        let consumer = self.consumers.create(Arc::clone(&self.handler));
        self.set_state(SupervisorState::Running);
        LockMetrics::set_running(true);

        let exit = AssertUnwindSafe(self.hold(&handle, attempted_at, consumer.as_ref(), shutdown_rx))
            .catch_unwind()
            .await;

        match exit {
            Ok(exit) => tracing::info!(reason = exit.as_str(), "Publisher run ended"),
            Err(_) => tracing::error!("Publisher run panicked"),
        }

        consumer.shutdown().await;
        let held_ms = (chrono::Utc::now() - handle.acquired_at()).num_milliseconds();
        match self.lock.release(&handle).await {
            Ok(()) => tracing::info!(held_ms, "Publisher lock released"),
            Err(e) => tracing::warn!(error = %e, held_ms, "Failed to release publisher lock"),
        }

        LockMetrics::set_running(false);
        LockMetrics::record_cycle(started.elapsed().as_secs_f64());
        self.set_state(SupervisorState::Idle);
    }

    async fn hold(
        &self,
        handle: &LockHandle,
        lease_start: Instant,
        consumer: &dyn StreamConsumer,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> RunExit {
        if let Err(e) = consumer.start(StreamCursor::Live).await {
            tracing::error!(error = %e, "Failed to start stream consumer");
            return RunExit::StartFailed;
        }

        let poll = self.config.poll_interval();
        let mut renewed_at = lease_start;
        loop {
            if *shutdown_rx.borrow() {
                return RunExit::Shutdown;
            }

            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = shutdown_rx.changed() => return RunExit::Shutdown,
            }

            if !consumer.running() {
                tracing::warn!("Stream consumer stopped on its own");
                return RunExit::ConsumerStopped;
            }

            let attempted_at = Instant::now();
            match self.lock.extend(handle).await {
                Ok(()) => renewed_at = attempted_at,
                Err(LockError::Lost(key)) => {
                    LockMetrics::record_lost();
                    tracing::warn!(lock_key = %key, "Publisher lock lost");
                    return RunExit::LockLost;
                }
                Err(e) if lease_expiring(renewed_at.elapsed(), poll, handle.ttl()) => {
                    LockMetrics::record_lost();
                    tracing::error!(
                        error = %e,
                        lock_key = %handle.key(),
                        unrenewed_ms = renewed_at.elapsed().as_millis() as u64,
                        ttl_ms = handle.ttl().as_millis() as u64,
                        "Publisher lock could not be renewed before expiry, stopping run"
                    );
                    return RunExit::LockLost;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to extend publisher lock");
                }
            }
        }
    }
}

/// True when the lease may lapse before the tick after next (one spare tick
/// for timer lag).
fn lease_expiring(unrenewed: Duration, poll: Duration, ttl: Duration) -> bool {
    unrenewed + poll * 2 >= ttl
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::MemoryLockCoordinator;
    use crate::outcome::DisabledMailTransport;
    use crate::redis::PoolError;
    use crate::stream::{MemoryStream, MemoryStreamConsumerFactory, StreamError, StreamEvent};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    const KEY: &str = "publisher_manager_lock";

    struct NoopHandler;

    #[async_trait]
    impl BatchHandler for NoopHandler {
        async fn handle_batch(&self, _events: Vec<StreamEvent>) {}
    }

    fn config(enabled: bool) -> PublisherConfig {
        PublisherConfig {
            enabled,
            lock_backend: "memory".to_string(),
            schedule_interval_ms: 20,
            poll_interval_ms: 10,
            ..Default::default()
        }
    }

    #[derive(Clone, Copy)]
    enum ExtendMode {
        Renew,
        Lost,
        Unreachable,
    }

    /// Memory lock with scripted acquire failures and extend behaviour.
    struct ScriptedLock {
        inner: MemoryLockCoordinator,
        failing_acquires: AtomicU32,
        extend: ExtendMode,
        acquired: AtomicU32,
        released: AtomicU32,
        released_while_owned: AtomicU32,
    }

    impl ScriptedLock {
        fn new(ttl: Duration, failing_acquires: u32, extend: ExtendMode) -> Self {
            Self {
                inner: MemoryLockCoordinator::new(ttl),
                failing_acquires: AtomicU32::new(failing_acquires),
                extend,
                acquired: AtomicU32::new(0),
                released: AtomicU32::new(0),
                released_while_owned: AtomicU32::new(0),
            }
        }

        fn acquired(&self) -> u32 {
            self.acquired.load(Ordering::SeqCst)
        }

        fn released(&self) -> u32 {
            self.released.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LockCoordinator for ScriptedLock {
        fn backend(&self) -> &'static str {
            "scripted"
        }

        async fn acquire(&self, key: &str) -> Result<LockHandle, LockError> {
            let fail = self
                .failing_acquires
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                return Err(LockError::Backend(PoolError::CircuitOpen));
            }
            let handle = self.inner.acquire(key).await?;
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(handle)
        }

        async fn extend(&self, handle: &LockHandle) -> Result<(), LockError> {
            match self.extend {
                ExtendMode::Renew => self.inner.extend(handle).await,
                ExtendMode::Lost => Err(LockError::Lost(handle.key().to_string())),
                ExtendMode::Unreachable => Err(LockError::Backend(PoolError::CircuitOpen)),
            }
        }

        async fn release(&self, handle: &LockHandle) -> Result<(), LockError> {
            if self.inner.holder(handle.key()).as_deref() == Some(handle.owner()) {
                self.released_while_owned.fetch_add(1, Ordering::SeqCst);
            }
            self.released.fetch_add(1, Ordering::SeqCst);
            self.inner.release(handle).await
        }
    }

    #[derive(Clone, Copy)]
    enum StartMode {
        Fail,
        Panic,
    }

    struct BrokenConsumer {
        mode: StartMode,
        shutdowns: Arc<AtomicU32>,
    }

    #[async_trait]
    impl StreamConsumer for BrokenConsumer {
        async fn start(&self, _cursor: StreamCursor) -> Result<(), StreamError> {
            match self.mode {
                StartMode::Fail => Err(StreamError::AlreadyRunning),
                StartMode::Panic => panic!("consumer start blew up"),
            }
        }

        fn running(&self) -> bool {
            false
        }

        async fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct BrokenConsumerFactory {
        mode: StartMode,
        shutdowns: Arc<AtomicU32>,
    }

    impl StreamConsumerFactory for BrokenConsumerFactory {
        fn backend(&self) -> &'static str {
            "broken"
        }

        fn create(&self, _handler: Arc<dyn BatchHandler>) -> Arc<dyn StreamConsumer> {
            Arc::new(BrokenConsumer {
                mode: self.mode,
                shutdowns: Arc::clone(&self.shutdowns),
            })
        }
    }

    fn scripted_supervisor(
        lock: Arc<ScriptedLock>,
        consumers: Arc<dyn StreamConsumerFactory>,
    ) -> Arc<PublisherSupervisor> {
        Arc::new(PublisherSupervisor::new(
            config(true),
            lock,
            consumers,
            Arc::new(NoopHandler),
            Arc::new(DisabledMailTransport),
        ))
    }

    fn memory_consumers() -> Arc<dyn StreamConsumerFactory> {
        Arc::new(MemoryStreamConsumerFactory::new(Arc::new(MemoryStream::new()), 10))
    }

    fn supervisor(
        enabled: bool,
        lock: Arc<MemoryLockCoordinator>,
        stream: Arc<MemoryStream>,
    ) -> Arc<PublisherSupervisor> {
        Arc::new(PublisherSupervisor::new(
            config(enabled),
            lock,
            Arc::new(MemoryStreamConsumerFactory::new(stream, 10)),
            Arc::new(NoopHandler),
            Arc::new(DisabledMailTransport),
        ))
    }

    #[tokio::test]
    async fn test_disabled_publisher_never_runs() {
        let lock = Arc::new(MemoryLockCoordinator::new(Duration::from_secs(30)));
        let sup = supervisor(false, lock.clone(), Arc::new(MemoryStream::new()));
        sup.start().await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!sup.status().running);
        assert!(!sup.status().enable);
        assert!(lock.holder("publisher_manager_lock").is_none());
    }

    #[tokio::test]
    async fn test_runs_then_releases_on_shutdown() {
        let lock = Arc::new(MemoryLockCoordinator::new(Duration::from_secs(30)));
        let sup = supervisor(true, lock.clone(), Arc::new(MemoryStream::new()));
        sup.start().await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sup.state(), SupervisorState::Running);
        assert!(lock.holder("publisher_manager_lock").is_some());

        sup.shutdown().await;
        assert_eq!(sup.state(), SupervisorState::Stopped);
        assert!(!sup.status().running);
        assert!(lock.holder("publisher_manager_lock").is_none());

        // Idempotent
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_stream_returns_to_idle_and_releases() {
        let lock = Arc::new(MemoryLockCoordinator::new(Duration::from_secs(30)));
        let stream = Arc::new(MemoryStream::new());
        let sup = supervisor(true, lock.clone(), stream.clone());
        sup.start().await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sup.status().running);

        stream.fail();
        tokio::time::sleep(Duration::from_millis(60)).await;

        // Consumer stops itself immediately on every new run; lock never stays held
        sup.shutdown().await;
        assert!(lock.holder("publisher_manager_lock").is_none());
    }

    #[tokio::test]
    async fn test_shutdown_before_start_schedules_nothing() {
        let lock = Arc::new(MemoryLockCoordinator::new(Duration::from_secs(30)));
        let sup = supervisor(true, lock.clone(), Arc::new(MemoryStream::new()));

        sup.shutdown().await;
        sup.start().await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(lock.holder("publisher_manager_lock").is_none());
        assert_eq!(sup.state(), SupervisorState::Stopped);
    }

    #[test]
    fn test_lease_expiring_keeps_a_spare_tick() {
        let poll = Duration::from_millis(10);
        let ttl = Duration::from_millis(100);
        assert!(!lease_expiring(Duration::from_millis(10), poll, ttl));
        assert!(!lease_expiring(Duration::from_millis(79), poll, ttl));
        assert!(lease_expiring(Duration::from_millis(80), poll, ttl));
        assert!(lease_expiring(Duration::from_millis(150), poll, ttl));
    }

    #[tokio::test]
    async fn test_acquire_error_is_retried_on_later_tick() {
        let lock = Arc::new(ScriptedLock::new(Duration::from_secs(30), 2, ExtendMode::Renew));
        let sup = scripted_supervisor(lock.clone(), memory_consumers());
        sup.start().await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(sup.state(), SupervisorState::Running);
        assert_eq!(lock.acquired(), 1);
        assert!(lock.inner.holder(KEY).is_some());

        sup.shutdown().await;
        assert_eq!(lock.released(), 1);
        assert!(lock.inner.holder(KEY).is_none());
    }

    #[tokio::test]
    async fn test_consumer_start_failure_releases_lock() {
        let lock = Arc::new(ScriptedLock::new(Duration::from_secs(30), 0, ExtendMode::Renew));
        let shutdowns = Arc::new(AtomicU32::new(0));
        let consumers = Arc::new(BrokenConsumerFactory {
            mode: StartMode::Fail,
            shutdowns: Arc::clone(&shutdowns),
        });
        let sup = scripted_supervisor(lock.clone(), consumers);
        sup.start().await;

        tokio::time::sleep(Duration::from_millis(110)).await;
        // Every tick acquires, fails to start, cleans up
        assert!(lock.acquired() >= 2);
        assert_eq!(lock.released(), lock.acquired());
        assert_eq!(shutdowns.load(Ordering::SeqCst), lock.acquired());
        assert!(lock.inner.holder(KEY).is_none());
        assert!(!sup.status().running);

        sup.shutdown().await;
        assert!(lock.inner.holder(KEY).is_none());
    }

    #[tokio::test]
    async fn test_panicking_consumer_releases_lock() {
        let lock = Arc::new(ScriptedLock::new(Duration::from_secs(30), 0, ExtendMode::Renew));
        let shutdowns = Arc::new(AtomicU32::new(0));
        let consumers = Arc::new(BrokenConsumerFactory {
            mode: StartMode::Panic,
            shutdowns: Arc::clone(&shutdowns),
        });
        let sup = scripted_supervisor(lock.clone(), consumers);
        sup.start().await;

        tokio::time::sleep(Duration::from_millis(110)).await;
        // The scheduler survives the panic and keeps ticking
        assert!(lock.acquired() >= 2);
        assert_eq!(lock.released(), lock.acquired());
        assert_eq!(shutdowns.load(Ordering::SeqCst), lock.acquired());
        assert_eq!(sup.state(), SupervisorState::Idle);
        assert!(lock.inner.holder(KEY).is_none());

        sup.shutdown().await;
        assert_eq!(sup.state(), SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn test_lock_lost_ends_run() {
        let lock = Arc::new(ScriptedLock::new(Duration::from_secs(30), 0, ExtendMode::Lost));
        let sup = scripted_supervisor(lock.clone(), memory_consumers());
        sup.start().await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        // Each run ends at its first extend; later ticks start new runs
        assert!(lock.acquired() >= 2);
        assert!(lock.released() + 1 >= lock.acquired());

        sup.shutdown().await;
        assert_eq!(lock.released(), lock.acquired());
        assert!(lock.inner.holder(KEY).is_none());
    }

    #[tokio::test]
    async fn test_unrenewable_lease_ends_run_before_expiry() {
        let lock = Arc::new(ScriptedLock::new(
            Duration::from_millis(100),
            0,
            ExtendMode::Unreachable,
        ));
        let sup = scripted_supervisor(lock.clone(), memory_consumers());
        sup.start().await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        sup.shutdown().await;

        // The first run gave the lock up on its own; every release happened while still owning it
        assert!(lock.acquired() >= 2);
        assert_eq!(lock.released(), lock.acquired());
        assert_eq!(
            lock.released_while_owned.load(Ordering::SeqCst),
            lock.released()
        );
    }
}
