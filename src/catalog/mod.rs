//! Trigger and outcome definitions, resolved by id.
//!
//! A [`NotificationCatalog`] is a snapshot: the publisher builds a fresh one
//! from its [`CatalogSource`] at the start of every batch, so definition
//! changes take effect without a restart.
//!
//! Sources:
//! - `MemoryCatalogSource`: definitions from configuration (default)
//! - `RedisCatalogSource`: definitions stored as JSON in Redis hashes
//!
//! Use `create_catalog_source()` to pick one from configuration.

mod memory_source;
mod redis_source;
mod static_outcomes;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::CatalogConfig;
use crate::notification::{NotificationTrigger, Outcome};
use crate::redis::{PoolError, RedisPool};

pub use memory_source::MemoryCatalogSource;
pub use redis_source::RedisCatalogSource;
pub use static_outcomes::{
    is_reserved, static_outcomes, DEFAULT_EMAIL_TEMPLATE, STATIC_OUTCOME_EMAIL, STATIC_OUTCOME_UI,
};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Redis error: {0}")]
    Redis(#[from] PoolError),
}

/// Where trigger and dynamic outcome definitions come from.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_triggers(&self) -> Result<Vec<NotificationTrigger>, CatalogError>;

    async fn fetch_outcomes(&self) -> Result<Vec<Outcome>, CatalogError>;
}

/// Immutable lookup tables for one processing cycle.
#[derive(Debug, Clone, Default)]
pub struct NotificationCatalog {
    triggers: HashMap<String, NotificationTrigger>,
    outcomes: HashMap<String, Outcome>,
}

impl NotificationCatalog {
    /// Fetch definitions from `source` and merge the static outcomes.
    pub async fn build(source: &dyn CatalogSource) -> Result<Self, CatalogError> {
        let triggers = source.fetch_triggers().await?;
        let outcomes = source.fetch_outcomes().await?;
        Ok(Self::from_parts(triggers, outcomes))
    }

    /// Assemble a catalog from already-fetched definitions.
    ///
    /// Static outcomes always win: a dynamic outcome reusing a reserved id is
    /// dropped.
    pub fn from_parts(triggers: Vec<NotificationTrigger>, outcomes: Vec<Outcome>) -> Self {
        let triggers = triggers
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect::<HashMap<_, _>>();

        let mut outcome_map: HashMap<String, Outcome> = static_outcomes()
            .into_iter()
            .map(|o| (o.id.clone(), o))
            .collect();

        for outcome in outcomes {
            if is_reserved(&outcome.id) {
                tracing::warn!(
                    outcome_id = %outcome.id,
                    "Ignoring dynamic outcome that reuses a reserved id"
                );
                continue;
            }
            outcome_map.insert(outcome.id.clone(), outcome);
        }

        Self {
            triggers,
            outcomes: outcome_map,
        }
    }

    pub fn resolve_trigger(&self, id: &str) -> Option<&NotificationTrigger> {
        self.triggers.get(id)
    }

    pub fn resolve_outcome(&self, id: &str) -> Option<&Outcome> {
        self.outcomes.get(id)
    }

    pub fn trigger_count(&self) -> usize {
        self.triggers.len()
    }

    pub fn outcome_count(&self) -> usize {
        self.outcomes.len()
    }
}

/// Create a catalog source based on configuration.
///
/// - `"redis"`: `RedisCatalogSource` if a Redis pool is provided
/// - `"memory"` (default): `MemoryCatalogSource` seeded with `catalog.triggers`
///   and `catalog.outcomes`
pub fn create_catalog_source(
    config: &CatalogConfig,
    redis_pool: Option<Arc<RedisPool>>,
) -> Arc<dyn CatalogSource> {
    match config.backend.as_str() {
        "redis" => {
            if let Some(pool) = redis_pool {
                tracing::info!(
                    backend = "redis",
                    prefix = %config.redis_prefix,
                    "Creating Redis catalog source"
                );
                return Arc::new(RedisCatalogSource::new(pool, config.redis_prefix.clone()));
            }
            tracing::warn!(
                "Redis catalog source requested but no pool provided, falling back to memory"
            );
        }
        "memory" => {}
        other => {
            tracing::warn!(backend = %other, "Unknown catalog backend, using memory");
        }
    }

    tracing::info!(
        backend = "memory",
        triggers = config.triggers.len(),
        outcomes = config.outcomes.len(),
        "Creating memory catalog source"
    );
    Arc::new(MemoryCatalogSource::with_definitions(
        config.triggers.clone(),
        config.outcomes.clone(),
    ))
}
