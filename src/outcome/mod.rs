//! Delivery channels behind the three outcome types.
//!
//! - UI: `InboxStore` (memory or PostgreSQL)
//! - EMAIL: `MailTransport` (lettre SMTP)
//! - WEBHOOK: `WebhookClient` (reqwest)

mod inbox;
mod inbox_postgres;
mod mail;
mod webhook;

use std::sync::Arc;

use crate::config::InboxConfig;
use crate::postgres::PostgresPool;

pub use inbox::{InboxError, InboxRecord, InboxStore, MemoryInboxStore};
pub use inbox_postgres::PostgresInboxStore;
pub use mail::{
    build_message, create_mail_transport, DisabledMailTransport, MailError, MailMessage,
    MailTransport, SmtpMailTransport,
};
pub use webhook::{HttpWebhookClient, WebhookClient, WebhookError};

/// Create the inbox store based on configuration.
///
/// - `"postgres"`: `PostgresInboxStore` if a pool is provided
/// - `"memory"` (default): `MemoryInboxStore`
pub fn create_inbox_store(
    config: &InboxConfig,
    postgres_pool: Option<PostgresPool>,
) -> Arc<dyn InboxStore> {
    match (config.backend.as_str(), postgres_pool) {
        ("postgres", Some(pool)) => {
            tracing::info!(
                backend = "postgres",
                url = %pool.database_url_masked(),
                "Creating PostgreSQL inbox store"
            );
            Arc::new(PostgresInboxStore::new(pool))
        }
        ("postgres", None) => {
            tracing::warn!(
                "PostgreSQL inbox requested but no database configured, falling back to memory"
            );
            Arc::new(MemoryInboxStore::new())
        }
        (backend, _) => {
            tracing::info!(backend = %backend, "Creating memory inbox store");
            Arc::new(MemoryInboxStore::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbox_factory_falls_back_to_memory() {
        let config = InboxConfig {
            backend: "postgres".to_string(),
        };
        assert_eq!(create_inbox_store(&config, None).backend(), "memory");
    }
}
