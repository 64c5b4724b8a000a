//! Redis Streams consumer.
//!
//! Reads with `XREAD BLOCK {block_ms} COUNT {batch_size}` on a dedicated
//! connection, tracking the last delivered id itself. For a live start the
//! tail id is resolved once with `XREVRANGE + - COUNT 1`, so entries
//! appended between two reads are never skipped the way repeated `$` reads
//! would skip them.
//!
//! Transport errors reconnect with exponential backoff. After
//! `max_consecutive_failures` failed reads in a row the consumer stops
//! itself and reports `running() == false`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::StreamConfig;
use crate::metrics::StreamMetrics;
use crate::redis::{BackoffConfig, ExponentialBackoff};

use super::{
    BatchHandler, RunningGuard, StreamConsumer, StreamConsumerFactory, StreamCursor, StreamError,
    StreamEvent,
};

/// Id that sorts before every real entry.
const STREAM_START_ID: &str = "0-0";

/// Field carrying the JSON payload of an entry.
const DATA_FIELD: &str = "data";

pub struct RedisStreamConsumer {
    client: Client,
    config: StreamConfig,
    handler: Arc<dyn BatchHandler>,
    running: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RedisStreamConsumer {
    pub fn new(client: Client, config: StreamConfig, handler: Arc<dyn BatchHandler>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            client,
            config,
            handler,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    /// Id of the newest entry, or the stream origin when it is empty.
    async fn resolve_tail(
        conn: &mut MultiplexedConnection,
        stream: &str,
    ) -> Result<String, StreamError> {
        let reply: StreamRangeReply = conn.xrevrange_count(stream, "+", "-", 1).await?;
        Ok(reply
            .ids
            .into_iter()
            .next()
            .map(|entry| entry.id)
            .unwrap_or_else(|| STREAM_START_ID.to_string()))
    }
}

/// Convert a read reply into events, skipping entries without a JSON `data` field.
fn decode_reply(reply: StreamReadReply) -> (Vec<StreamEvent>, Option<String>) {
    let mut events = Vec::new();
    let mut last_id = None;

    for key in reply.keys {
        for entry in key.ids {
            last_id = Some(entry.id.clone());

            let raw: Option<String> = entry.get(DATA_FIELD);
            let Some(raw) = raw else {
                tracing::warn!(entry_id = %entry.id, "Stream entry has no data field, skipping");
                continue;
            };

            match serde_json::from_str(&raw) {
                Ok(data) => events.push(StreamEvent { id: entry.id, data }),
                Err(e) => {
                    tracing::warn!(
                        entry_id = %entry.id,
                        error = %e,
                        "Stream entry data is not valid JSON, skipping"
                    );
                }
            }
        }
    }

    (events, last_id)
}

struct ReadLoop {
    client: Client,
    config: StreamConfig,
    handler: Arc<dyn BatchHandler>,
    running: Arc<AtomicBool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ReadLoop {
    async fn run(self, mut conn: MultiplexedConnection, mut last_id: String) {
        let ReadLoop {
            client,
            config,
            handler,
            running,
            mut shutdown_rx,
        } = self;
        let _guard = RunningGuard::new(running);

        let mut backoff = ExponentialBackoff::with_config(BackoffConfig {
            initial_delay_ms: config.backoff_initial_delay_ms,
            max_delay_ms: config.backoff_max_delay_ms,
            ..Default::default()
        });
        let mut consecutive_failures: u32 = 0;
        let options = StreamReadOptions::default()
            .block(config.block_ms as usize)
            .count(config.batch_size);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let read = async {
                let reply: redis::RedisResult<StreamReadReply> = conn
                    .xread_options(&[config.name.as_str()], &[last_id.as_str()], &options)
                    .await;
                reply
            };

            let reply = tokio::select! {
                _ = shutdown_rx.changed() => break,
                reply = read => reply,
            };

            match reply {
                Ok(reply) => {
                    consecutive_failures = 0;
                    backoff.reset();

                    let (events, newest) = decode_reply(reply);
                    if let Some(id) = newest {
                        last_id = id;
                    }
                    if !events.is_empty() {
                        handler.handle_batch(events).await;
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    StreamMetrics::record_read_error();

                    if consecutive_failures >= config.max_consecutive_failures {
                        tracing::error!(
                            error = %e,
                            failures = consecutive_failures,
                            stream = %config.name,
                            "Stream read failing repeatedly, consumer stopping"
                        );
                        break;
                    }

                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        attempt = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "Stream read failed, reconnecting with backoff"
                    );

                    tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }

                    match client.get_multiplexed_tokio_connection().await {
                        Ok(fresh) => {
                            StreamMetrics::record_reconnect();
                            conn = fresh;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Stream reconnection failed");
                        }
                    }
                }
            }
        }

        tracing::info!(stream = %config.name, last_id = %last_id, "Redis stream consumer stopped");
    }
}

#[async_trait]
impl StreamConsumer for RedisStreamConsumer {
    async fn start(&self, cursor: StreamCursor) -> Result<(), StreamError> {
        let mut task = self.task.lock().await;
        if self.running.load(Ordering::Acquire) {
            return Err(StreamError::AlreadyRunning);
        }

        let mut conn = self.client.get_multiplexed_tokio_connection().await?;
        let start_id = match cursor {
            StreamCursor::Live => Self::resolve_tail(&mut conn, &self.config.name).await?,
            StreamCursor::From(id) => id,
        };

        self.running.store(true, Ordering::Release);
        self.shutdown_tx.send_replace(false);

        tracing::info!(
            stream = %self.config.name,
            start_id = %start_id,
            batch_size = self.config.batch_size,
            "Redis stream consumer started"
        );

        let read_loop = ReadLoop {
            client: self.client.clone(),
            config: self.config.clone(),
            handler: Arc::clone(&self.handler),
            running: Arc::clone(&self.running),
            shutdown_rx: self.shutdown_tx.subscribe(),
        };
        *task = Some(tokio::spawn(read_loop.run(conn, start_id)));

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
                tracing::error!(error = %e, "Redis stream consumer task failed");
            }
        }
        self.running.store(false, Ordering::Release);
    }
}

pub struct RedisStreamConsumerFactory {
    client: Client,
    config: StreamConfig,
}

impl RedisStreamConsumerFactory {
    pub fn new(client: Client, config: StreamConfig) -> Self {
        Self { client, config }
    }
}

impl StreamConsumerFactory for RedisStreamConsumerFactory {
    fn backend(&self) -> &'static str {
        "redis"
    }

    fn create(&self, handler: Arc<dyn BatchHandler>) -> Arc<dyn StreamConsumer> {
        Arc::new(RedisStreamConsumer::new(
            self.client.clone(),
            self.config.clone(),
            handler,
        ))
    }
}
