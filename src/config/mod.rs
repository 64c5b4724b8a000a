mod settings;

pub use settings::{
    CatalogConfig, DatabaseConfig, InboxConfig, LogConfig, OtelConfig, PlatformConfig,
    PublisherConfig, RedisConfig, ServerConfig, Settings, SmtpConfig, StreamConfig,
    WebhookConfig, DEFAULT_DOC_URI,
};
