//! Append-only in-process stream.
//!
//! Entry ids are `{sequence}-0`, mirroring Redis stream ids. `fail()` puts
//! the stream in a permanently broken state so consumers stop themselves the
//! way a Redis consumer does after repeated transport failures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;

use super::{
    BatchHandler, RunningGuard, StreamConsumer, StreamConsumerFactory, StreamCursor, StreamError,
    StreamEvent,
};

/// Upper bound on how long a consumer sleeps before re-checking the log.
const IDLE_RECHECK: Duration = Duration::from_millis(50);

#[derive(Default)]
pub struct MemoryStream {
    entries: RwLock<Vec<StreamEvent>>,
    appended: Notify,
    failed: AtomicBool,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and wake consumers. Returns the entry id.
    pub fn append(&self, data: Value) -> String {
        let id = {
            let mut entries = match self.entries.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let id = format!("{}-0", entries.len() + 1);
            entries.push(StreamEvent {
                id: id.clone(),
                data,
            });
            id
        };
        self.appended.notify_waiters();
        id
    }

    pub fn len(&self) -> usize {
        self.read_entries(|entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Simulate an unrecoverable transport failure.
    pub fn fail(&self) {
        self.failed.store(true, Ordering::Release);
        self.appended.notify_waiters();
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    fn read_entries<T>(&self, f: impl FnOnce(&Vec<StreamEvent>) -> T) -> T {
        match self.entries.read() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    /// Position just past the entry with `id`.
    fn position_after(&self, id: &str) -> usize {
        let seq = id
            .split('-')
            .next()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        seq.min(self.len())
    }

    fn slice(&self, from: usize, max: usize) -> Vec<StreamEvent> {
        self.read_entries(|entries| {
            entries
                .iter()
                .skip(from)
                .take(max)
                .cloned()
                .collect()
        })
    }
}

pub struct MemoryStreamConsumer {
    stream: Arc<MemoryStream>,
    handler: Arc<dyn BatchHandler>,
    batch_size: usize,
    running: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryStreamConsumer {
    pub fn new(stream: Arc<MemoryStream>, handler: Arc<dyn BatchHandler>, batch_size: usize) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            stream,
            handler,
            batch_size: batch_size.max(1),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            task: Mutex::new(None),
        }
    }
}

async fn consume_memory(
    stream: Arc<MemoryStream>,
    handler: Arc<dyn BatchHandler>,
    batch_size: usize,
    mut position: usize,
    running: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let _guard = RunningGuard::new(running);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        if stream.is_failed() {
            tracing::error!("Memory stream failed, consumer stopping");
            break;
        }

        let batch = stream.slice(position, batch_size);
        if batch.is_empty() {
            let appended = stream.appended.notified();
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    // Sender gone: the owning consumer was dropped
                    if changed.is_err() {
                        break;
                    }
                }
                _ = appended => {}
                _ = tokio::time::sleep(IDLE_RECHECK) => {}
            }
            continue;
        }

        position += batch.len();
        handler.handle_batch(batch).await;
    }

    tracing::debug!("Memory stream consumer stopped");
}

#[async_trait]
impl StreamConsumer for MemoryStreamConsumer {
    async fn start(&self, cursor: StreamCursor) -> Result<(), StreamError> {
        let mut task = self.task.lock().await;
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(StreamError::AlreadyRunning);
        }

        let position = match &cursor {
            StreamCursor::Live => self.stream.len(),
            StreamCursor::From(id) => self.stream.position_after(id),
        };
        self.shutdown_tx.send_replace(false);

        *task = Some(tokio::spawn(consume_memory(
            Arc::clone(&self.stream),
            Arc::clone(&self.handler),
            self.batch_size,
            position,
            Arc::clone(&self.running),
            self.shutdown_tx.subscribe(),
        )));

        tracing::debug!(position = position, "Memory stream consumer started");
        Ok(())
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Memory stream consumer task failed");
            }
        }
        self.running.store(false, Ordering::Release);
    }
}

pub struct MemoryStreamConsumerFactory {
    stream: Arc<MemoryStream>,
    batch_size: usize,
}

impl MemoryStreamConsumerFactory {
    pub fn new(stream: Arc<MemoryStream>, batch_size: usize) -> Self {
        Self { stream, batch_size }
    }

    pub fn stream(&self) -> &Arc<MemoryStream> {
        &self.stream
    }
}

impl StreamConsumerFactory for MemoryStreamConsumerFactory {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn create(&self, handler: Arc<dyn BatchHandler>) -> Arc<dyn StreamConsumer> {
        Arc::new(MemoryStreamConsumer::new(
            Arc::clone(&self.stream),
            handler,
            self.batch_size,
        ))
    }
}
