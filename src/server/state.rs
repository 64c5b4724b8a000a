use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::notification::OutcomeDispatcher;
use crate::postgres::PostgresPool;
use crate::publisher::PublisherSupervisor;
use crate::redis::RedisPool;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub supervisor: Arc<PublisherSupervisor>,
    pub dispatcher: Arc<OutcomeDispatcher>,
    pub redis_pool: Option<Arc<RedisPool>>,
    pub postgres_pool: Option<PostgresPool>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        settings: Arc<Settings>,
        supervisor: Arc<PublisherSupervisor>,
        dispatcher: Arc<OutcomeDispatcher>,
        redis_pool: Option<Arc<RedisPool>>,
        postgres_pool: Option<PostgresPool>,
    ) -> Self {
        Self {
            settings,
            supervisor,
            dispatcher,
            redis_pool,
            postgres_pool,
            start_time: Instant::now(),
        }
    }
}
