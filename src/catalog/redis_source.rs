//! Catalog source backed by two Redis hashes.
//!
//! - `{prefix}:triggers`: trigger id -> JSON `NotificationTrigger`
//! - `{prefix}:outcomes`: outcome id -> JSON `Outcome`
//!
//! Malformed entries are skipped with a warning so one bad definition cannot
//! stall the publisher.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;

use crate::notification::{NotificationTrigger, Outcome};
use crate::redis::RedisPool;

use super::{CatalogError, CatalogSource};

pub struct RedisCatalogSource {
    pool: Arc<RedisPool>,
    prefix: String,
}

impl RedisCatalogSource {
    pub fn new(pool: Arc<RedisPool>, prefix: String) -> Self {
        Self { pool, prefix }
    }

    pub fn triggers_key(&self) -> String {
        format!("{}:triggers", self.prefix)
    }

    pub fn outcomes_key(&self) -> String {
        format!("{}:outcomes", self.prefix)
    }

    async fn fetch_hash(&self, key: String) -> Result<HashMap<String, String>, CatalogError> {
        let entries = self
            .pool
            .execute(|mut conn| async move { conn.hgetall(&key).await })
            .await?;
        Ok(entries)
    }
}

/// Decode hash values, dropping the ones that fail to parse.
fn decode_entries<T: DeserializeOwned>(key: &str, entries: HashMap<String, String>) -> Vec<T> {
    entries
        .into_iter()
        .filter_map(|(field, raw)| match serde_json::from_str::<T>(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    field = %field,
                    error = %e,
                    "Skipping malformed catalog entry"
                );
                None
            }
        })
        .collect()
}

#[async_trait]
impl CatalogSource for RedisCatalogSource {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn fetch_triggers(&self) -> Result<Vec<NotificationTrigger>, CatalogError> {
        let key = self.triggers_key();
        let entries = self.fetch_hash(key.clone()).await?;
        Ok(decode_entries(&key, entries))
    }

    async fn fetch_outcomes(&self) -> Result<Vec<Outcome>, CatalogError> {
        let key = self.outcomes_key();
        let entries = self.fetch_hash(key.clone()).await?;
        Ok(decode_entries(&key, entries))
    }
}
