//! In-memory catalog source seeded from configuration.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::notification::{NotificationTrigger, Outcome};

use super::{CatalogError, CatalogSource};

/// Catalog definitions held in process memory.
///
/// Mutations become visible to the publisher at the next batch, since the
/// catalog is rebuilt per batch.
#[derive(Default)]
pub struct MemoryCatalogSource {
    triggers: DashMap<String, NotificationTrigger>,
    outcomes: DashMap<String, Outcome>,
}

impl MemoryCatalogSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_definitions(triggers: Vec<NotificationTrigger>, outcomes: Vec<Outcome>) -> Self {
        let source = Self::new();
        for trigger in triggers {
            source.upsert_trigger(trigger);
        }
        for outcome in outcomes {
            source.upsert_outcome(outcome);
        }
        source
    }

    pub fn upsert_trigger(&self, trigger: NotificationTrigger) {
        self.triggers.insert(trigger.id.clone(), trigger);
    }

    pub fn remove_trigger(&self, id: &str) -> Option<NotificationTrigger> {
        self.triggers.remove(id).map(|(_, t)| t)
    }

    pub fn upsert_outcome(&self, outcome: Outcome) {
        self.outcomes.insert(outcome.id.clone(), outcome);
    }

    pub fn remove_outcome(&self, id: &str) -> Option<Outcome> {
        self.outcomes.remove(id).map(|(_, o)| o)
    }
}

#[async_trait]
impl CatalogSource for MemoryCatalogSource {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn fetch_triggers(&self) -> Result<Vec<NotificationTrigger>, CatalogError> {
        Ok(self.triggers.iter().map(|e| e.value().clone()).collect())
    }

    async fn fetch_outcomes(&self) -> Result<Vec<Outcome>, CatalogError> {
        Ok(self.outcomes.iter().map(|e| e.value().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::TriggerType;

    fn trigger(id: &str) -> NotificationTrigger {
        NotificationTrigger {
            id: id.to_string(),
            name: format!("Trigger {}", id),
            trigger_type: TriggerType::Live,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_remove() {
        let source = MemoryCatalogSource::with_definitions(vec![trigger("a")], vec![]);
        source.upsert_trigger(trigger("b"));
        assert_eq!(source.fetch_triggers().await.unwrap().len(), 2);

        assert!(source.remove_trigger("a").is_some());
        let remaining = source.fetch_triggers().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "b");
    }
}
