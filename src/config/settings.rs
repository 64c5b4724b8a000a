use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::notification::{NotificationTrigger, Outcome};

/// Default knowledge base link rendered into templates as `doc_uri`.
pub const DEFAULT_DOC_URI: &str =
    "https://filigran.notion.site/OpenCTI-Public-Knowledge-Base-d411e5e477734c59887dad3649f20518";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub inbox: InboxConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub otel: OtelConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_cb_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_cb_success_threshold")]
    pub circuit_breaker_success_threshold: u32,
    #[serde(default = "default_cb_reset_timeout")]
    pub circuit_breaker_reset_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u32,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u32,
}

/// Supervisor settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PublisherConfig {
    /// Whether this instance competes for the publisher lock at all
    #[serde(default)]
    pub enabled: bool,
    /// Fleet-wide lock key
    #[serde(default = "default_lock_key")]
    pub lock_key: String,
    /// "redis" (default) or "memory"
    #[serde(default = "default_redis_backend")]
    pub lock_backend: String,
    /// Lock expiry, refreshed on every poll tick
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_ms: u64,
    /// Interval between lock acquisition attempts
    #[serde(default = "default_schedule_interval")]
    pub schedule_interval_ms: u64,
    /// Interval between liveness checks while running
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Upper bound on waiting for in-flight dispatches during shutdown
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_seconds: u64,
}

impl PublisherConfig {
    pub fn schedule_interval(&self) -> Duration {
        Duration::from_millis(self.schedule_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_seconds)
    }

    /// The lease must survive at least two poll ticks without renewal,
    /// otherwise a single failed extend would let it lapse mid-run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_ttl_ms <= self.poll_interval_ms.saturating_mul(2) {
            return Err(ConfigError::Message(format!(
                "publisher.lock_ttl_ms ({}) must be greater than twice publisher.poll_interval_ms ({})",
                self.lock_ttl_ms, self.poll_interval_ms
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// "redis" (default) or "memory"
    #[serde(default = "default_redis_backend")]
    pub backend: String,
    #[serde(default = "default_stream_name")]
    pub name: String,
    /// Maximum entries handed to the handler per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// XREAD BLOCK timeout
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,
    /// Consecutive read failures after which the consumer stops itself
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_backoff_initial_delay")]
    pub backoff_initial_delay_ms: u64,
    #[serde(default = "default_backoff_max_delay")]
    pub backoff_max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// "memory" (default) or "redis"
    #[serde(default = "default_memory_backend")]
    pub backend: String,
    #[serde(default = "default_catalog_prefix")]
    pub redis_prefix: String,
    /// Trigger definitions for the memory backend
    #[serde(default)]
    pub triggers: Vec<NotificationTrigger>,
    /// Dynamic outcome definitions for the memory backend
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboxConfig {
    /// "memory" (default) or "postgres"
    #[serde(default = "default_memory_backend")]
    pub backend: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    /// SMTP relay host; email outcomes fail when unset
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub use_tls: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_webhook_timeout")]
    pub timeout_seconds: u64,
}

/// Platform-wide values exposed to templates.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Sender address for email outcomes
    #[serde(default = "default_platform_email")]
    pub email: String,
    #[serde(default = "default_dark_background")]
    pub theme_dark_background: String,
    #[serde(default = "default_doc_uri")]
    pub doc_uri: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// "pretty" (default) or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_cb_failure_threshold() -> u32 {
    5
}

fn default_cb_success_threshold() -> u32 {
    2
}

fn default_cb_reset_timeout() -> u64 {
    30
}

fn default_pool_size() -> u32 {
    10
}

fn default_connect_timeout() -> u32 {
    5
}

fn default_idle_timeout() -> u32 {
    300
}

fn default_lock_key() -> String {
    "publisher_manager_lock".to_string()
}

fn default_redis_backend() -> String {
    "redis".to_string()
}

fn default_memory_backend() -> String {
    "memory".to_string()
}

fn default_lock_ttl() -> u64 {
    30_000
}

fn default_schedule_interval() -> u64 {
    10_000
}

fn default_poll_interval() -> u64 {
    2_000
}

fn default_drain_timeout() -> u64 {
    10
}

fn default_stream_name() -> String {
    "stream.notification".to_string()
}

fn default_batch_size() -> usize {
    200
}

fn default_block_ms() -> u64 {
    5_000
}

fn default_max_consecutive_failures() -> u32 {
    10
}

fn default_backoff_initial_delay() -> u64 {
    100
}

fn default_backoff_max_delay() -> u64 {
    30_000
}

fn default_catalog_prefix() -> String {
    "publisher:catalog".to_string()
}

fn default_smtp_port() -> u16 {
    25
}

fn default_webhook_timeout() -> u64 {
    10
}

fn default_base_url() -> String {
    "http://localhost:8082".to_string()
}

fn default_platform_email() -> String {
    "notifications@localhost".to_string()
}

fn default_dark_background() -> String {
    "#0a1929".to_string()
}

fn default_doc_uri() -> String {
    DEFAULT_DOC_URI.to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "notification-publisher".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Settings {
    /// Load settings: defaults, then `config/default`, then `config/{RUN_MODE}`,
    /// then `PUBLISHER__SECTION__KEY` environment variables.
    pub fn new() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // PUBLISHER__PUBLISHER__ENABLED=true, PUBLISHER__REDIS__URL=..., etc.
            .add_source(
                Environment::with_prefix("PUBLISHER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.publisher.validate()?;
        Ok(settings)
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            redis: RedisConfig::default(),
            database: None,
            publisher: PublisherConfig::default(),
            stream: StreamConfig::default(),
            catalog: CatalogConfig::default(),
            inbox: InboxConfig::default(),
            smtp: SmtpConfig::default(),
            webhook: WebhookConfig::default(),
            platform: PlatformConfig::default(),
            otel: OtelConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            circuit_breaker_failure_threshold: default_cb_failure_threshold(),
            circuit_breaker_success_threshold: default_cb_success_threshold(),
            circuit_breaker_reset_timeout_seconds: default_cb_reset_timeout(),
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            lock_key: default_lock_key(),
            lock_backend: default_redis_backend(),
            lock_ttl_ms: default_lock_ttl(),
            schedule_interval_ms: default_schedule_interval(),
            poll_interval_ms: default_poll_interval(),
            drain_timeout_seconds: default_drain_timeout(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            backend: default_redis_backend(),
            name: default_stream_name(),
            batch_size: default_batch_size(),
            block_ms: default_block_ms(),
            max_consecutive_failures: default_max_consecutive_failures(),
            backoff_initial_delay_ms: default_backoff_initial_delay(),
            backoff_max_delay_ms: default_backoff_max_delay(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            redis_prefix: default_catalog_prefix(),
            triggers: vec![],
            outcomes: vec![],
        }
    }
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_smtp_port(),
            username: None,
            password: None,
            use_tls: false,
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_webhook_timeout(),
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            email: default_platform_email(),
            theme_dark_background: default_dark_background(),
            doc_uri: default_doc_uri(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}
