//! PostgreSQL inbox store writing to the `notifications` table.

use async_trait::async_trait;
use sqlx::types::Json;

use crate::postgres::PostgresPool;

use super::inbox::{InboxError, InboxRecord, InboxStore};

pub struct PostgresInboxStore {
    pool: PostgresPool,
}

impl PostgresInboxStore {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InboxStore for PostgresInboxStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn insert(&self, record: InboxRecord) -> Result<(), InboxError> {
        let user_id = record.user_id.clone();
        let id = record.id;

        self.pool
            .execute_with_circuit_breaker(|pool| async move {
                sqlx::query(
                    r#"
                    INSERT INTO notifications
                        (id, name, notification_type, user_id, content, is_read, created, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    "#,
                )
                .bind(record.id)
                .bind(&record.name)
                .bind(record.notification_type.as_str())
                .bind(&record.user_id)
                .bind(Json(&record.content))
                .bind(record.is_read)
                .bind(record.created)
                .bind(record.created_at)
                .bind(record.updated_at)
                .execute(&pool)
                .await
            })
            .await?;

        tracing::trace!(user_id = %user_id, id = %id, "Inbox record stored");
        Ok(())
    }
}
