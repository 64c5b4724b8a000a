//! Inbox records produced by the UI outcome.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::notification::{ContentBlock, TriggerType};
use crate::postgres::PostgresPoolError;

#[derive(Debug, Error)]
pub enum InboxError {
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] PostgresPoolError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One in-app notification for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxRecord {
    pub id: Uuid,
    /// Trigger name
    pub name: String,
    pub notification_type: TriggerType,
    pub user_id: String,
    pub content: Vec<ContentBlock>,
    pub created: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_read: bool,
}

impl InboxRecord {
    /// New unread record stamped with the current time.
    pub fn new(
        name: impl Into<String>,
        notification_type: TriggerType,
        user_id: impl Into<String>,
        content: Vec<ContentBlock>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            notification_type,
            user_id: user_id.into(),
            content,
            created: now,
            created_at: now,
            updated_at: now,
            is_read: false,
        }
    }
}

#[async_trait]
pub trait InboxStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn insert(&self, record: InboxRecord) -> Result<(), InboxError>;
}

/// Inbox kept in process memory, keyed by user.
#[derive(Default)]
pub struct MemoryInboxStore {
    records: DashMap<String, Vec<InboxRecord>>,
}

impl MemoryInboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records for `user_id`, oldest first.
    pub fn records_for(&self, user_id: &str) -> Vec<InboxRecord> {
        self.records
            .get(user_id)
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.records.iter().map(|entry| entry.value().len()).sum()
    }
}

#[async_trait]
impl InboxStore for MemoryInboxStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, record: InboxRecord) -> Result<(), InboxError> {
        self.records
            .entry(record.user_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::ContentEvent;

    #[tokio::test]
    async fn test_memory_inbox_groups_by_user() {
        let store = MemoryInboxStore::new();
        let content = vec![ContentBlock {
            title: "Watch".to_string(),
            events: vec![ContentEvent {
                operation: "create".to_string(),
                message: "m".to_string(),
                instance_id: None,
            }],
        }];

        store
            .insert(InboxRecord::new("Watch", TriggerType::Live, "u1", content.clone()))
            .await
            .unwrap();
        store
            .insert(InboxRecord::new("Watch", TriggerType::Live, "u2", content))
            .await
            .unwrap();

        assert_eq!(store.total(), 2);
        let records = store.records_for("u1");
        assert_eq!(records.len(), 1);
        assert!(!records[0].is_read);
        assert_eq!(records[0].created_at, records[0].updated_at);
    }
}
