//! Stream batch handling: decode, resolve, plan rounds, dispatch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinSet;

use crate::catalog::{CatalogSource, NotificationCatalog};
use crate::metrics::{CatalogMetrics, DispatchMetrics, StreamMetrics};
use crate::stream::{BatchHandler, StreamEvent};

use super::dispatcher::{DispatchReport, DispatchRound, OutcomeDispatcher};
use super::{
    DigestNotificationEvent, EventHeader, LiveNotificationEvent, RawNotificationEvent, TriggerType,
};

/// Rounds planned from one batch, plus the number of entries that produced none.
#[derive(Debug, Default)]
pub struct BatchPlan {
    pub rounds: Vec<DispatchRound>,
    pub skipped: usize,
}

/// Turn stream entries into dispatch rounds against a catalog snapshot.
///
/// Entries that cannot be decoded or whose trigger is unknown are skipped.
pub fn plan_batch(catalog: &NotificationCatalog, events: &[StreamEvent]) -> BatchPlan {
    let mut plan = BatchPlan::default();

    for event in events {
        let header: EventHeader = match serde_json::from_value(event.data.clone()) {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!(entry_id = %event.id, error = %e, "Stream entry has no notification id");
                StreamMetrics::record_skipped("malformed");
                plan.skipped += 1;
                continue;
            }
        };

        let Some(trigger) = catalog.resolve_trigger(&header.notification_id) else {
            tracing::debug!(
                entry_id = %event.id,
                notification_id = %header.notification_id,
                "Unknown notification, skipping"
            );
            StreamMetrics::record_skipped("unknown_trigger");
            plan.skipped += 1;
            continue;
        };

        match trigger.trigger_type {
            TriggerType::Live => {
                let live: LiveNotificationEvent = match serde_json::from_value(event.data.clone()) {
                    Ok(live) => live,
                    Err(e) => {
                        tracing::warn!(entry_id = %event.id, error = %e, "Malformed live event");
                        StreamMetrics::record_skipped("malformed");
                        plan.skipped += 1;
                        continue;
                    }
                };

                for target in live.targets {
                    let raw = RawNotificationEvent {
                        notification_id: live.notification_id.clone(),
                        instance: live.instance.clone(),
                        operation: target.operation,
                        message: target.message,
                    };
                    plan.rounds.push(DispatchRound::build(
                        trigger.clone(),
                        target.user,
                        vec![raw],
                        catalog,
                    ));
                }
            }
            TriggerType::Digest => {
                let digest: DigestNotificationEvent =
                    match serde_json::from_value(event.data.clone()) {
                        Ok(digest) => digest,
                        Err(e) => {
                            tracing::warn!(entry_id = %event.id, error = %e, "Malformed digest event");
                            StreamMetrics::record_skipped("malformed");
                            plan.skipped += 1;
                            continue;
                        }
                    };

                plan.rounds.push(DispatchRound::build(
                    trigger.clone(),
                    digest.target,
                    digest.events,
                    catalog,
                ));
            }
        }
    }

    plan
}

/// The [`BatchHandler`] bound to every consumer the supervisor creates.
///
/// The catalog is rebuilt for each batch so definition changes apply to the
/// next batch. Rounds are dispatched in the background; the handler returns
/// as soon as they are spawned.
pub struct PublisherHandler {
    catalog_source: Arc<dyn CatalogSource>,
    dispatcher: Arc<OutcomeDispatcher>,
    in_flight: Mutex<JoinSet<DispatchReport>>,
    active: Arc<AtomicUsize>,
}

impl PublisherHandler {
    pub fn new(catalog_source: Arc<dyn CatalogSource>, dispatcher: Arc<OutcomeDispatcher>) -> Self {
        Self {
            catalog_source,
            dispatcher,
            in_flight: Mutex::new(JoinSet::new()),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Rounds spawned and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Wait until every spawned round finished. Dropping the returned future
    /// aborts the rounds it had taken over.
    pub async fn wait_idle(&self) {
        loop {
            let mut pending = match self.in_flight.lock() {
                Ok(mut set) => std::mem::take(&mut *set),
                Err(_) => return,
            };
            if pending.is_empty() {
                return;
            }
            while let Some(joined) = pending.join_next().await {
                Self::reaped(joined);
            }
        }
    }

    fn reap_finished(&self) {
        if let Ok(mut set) = self.in_flight.lock() {
            while let Some(joined) = set.try_join_next() {
                Self::reaped(joined);
            }
        }
    }

    fn reaped(joined: Result<DispatchReport, tokio::task::JoinError>) {
        match joined {
            Ok(report) => tracing::debug!(
                trigger_id = %report.trigger_id,
                user_id = %report.user_id,
                delivered = report.delivered(),
                skipped = report.skipped(),
                failed = report.failed(),
                "Dispatch round finished"
            ),
            Err(e) => tracing::error!(error = %e, "Dispatch round did not complete"),
        }
    }
}

#[async_trait]
impl BatchHandler for PublisherHandler {
    async fn handle_batch(&self, events: Vec<StreamEvent>) {
        StreamMetrics::record_batch(events.len());
        self.reap_finished();

        let catalog = match NotificationCatalog::build(self.catalog_source.as_ref()).await {
            Ok(catalog) => {
                CatalogMetrics::record_build(true);
                catalog
            }
            Err(e) => {
                CatalogMetrics::record_build(false);
                StreamMetrics::record_skipped("catalog_error");
                tracing::error!(
                    source = self.catalog_source.name(),
                    error = %e,
                    batch_size = events.len(),
                    "Failed to load notification catalog, skipping batch"
                );
                return;
            }
        };

        let plan = plan_batch(&catalog, &events);
        tracing::debug!(
            entries = events.len(),
            triggers = catalog.trigger_count(),
            outcomes = catalog.outcome_count(),
            rounds = plan.rounds.len(),
            skipped = plan.skipped,
            "Batch planned"
        );

        let Ok(mut set) = self.in_flight.lock() else {
            tracing::error!("Dispatch task set poisoned, dropping batch");
            return;
        };
        for round in plan.rounds {
            let dispatcher = Arc::clone(&self.dispatcher);
            let active = Arc::clone(&self.active);
            active.fetch_add(1, Ordering::AcqRel);
            DispatchMetrics::round_started();
            set.spawn(async move {
                let report = dispatcher.dispatch(round).await;
                active.fetch_sub(1, Ordering::AcqRel);
                DispatchMetrics::round_finished();
                report
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::NotificationTrigger;
    use serde_json::json;

    fn catalog() -> NotificationCatalog {
        NotificationCatalog::from_parts(
            vec![
                NotificationTrigger {
                    id: "live-1".to_string(),
                    name: "Object Watch".to_string(),
                    trigger_type: TriggerType::Live,
                },
                NotificationTrigger {
                    id: "digest-1".to_string(),
                    name: "Daily".to_string(),
                    trigger_type: TriggerType::Digest,
                },
                NotificationTrigger {
                    id: "B".to_string(),
                    name: "Other".to_string(),
                    trigger_type: TriggerType::Live,
                },
            ],
            vec![],
        )
    }

    fn entry(id: &str, data: serde_json::Value) -> StreamEvent {
        StreamEvent {
            id: id.to_string(),
            data,
        }
    }

    fn user(id: &str) -> serde_json::Value {
        json!({"user_id": id, "user_email": format!("{id}@example.com"), "outcomes": ["UI"]})
    }

    #[test]
    fn test_live_event_fans_out_per_target() {
        let data = json!({
            "notification_id": "live-1",
            "instance": {"id": "obj-1"},
            "targets": [
                {"user": user("u1"), "type": "create", "message": "created"},
                {"user": user("u2"), "type": "update", "message": "updated"},
                {"user": user("u3"), "type": "delete", "message": "deleted"}
            ]
        });
        let plan = plan_batch(&catalog(), &[entry("1-0", data)]);

        assert_eq!(plan.rounds.len(), 3);
        let users: Vec<_> = plan.rounds.iter().map(|r| r.user.user_id.as_str()).collect();
        assert_eq!(users, vec!["u1", "u2", "u3"]);

        let second = &plan.rounds[1];
        assert_eq!(second.events.len(), 1);
        assert_eq!(second.events[0].operation, "update");
        assert_eq!(second.content[0].events[0].instance_id.as_deref(), Some("obj-1"));
    }

    #[test]
    fn test_digest_event_is_one_round() {
        let data = json!({
            "notification_id": "digest-1",
            "target": user("u1"),
            "events": [
                {"notification_id": "digest-1", "instance": {"id": "a"}, "operation": "create", "message": "m1"},
                {"notification_id": "B", "instance": {"id": "b"}, "operation": "update", "message": "m2"},
                {"notification_id": "digest-1", "instance": {"id": "c"}, "operation": "delete", "message": "m3"}
            ]
        });
        let plan = plan_batch(&catalog(), &[entry("1-0", data)]);

        assert_eq!(plan.rounds.len(), 1);
        let round = &plan.rounds[0];
        assert_eq!(round.events.len(), 3);
        let titles: Vec<_> = round.content.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, vec!["Daily", "Other"]);
        assert_eq!(round.content[0].events.len(), 2);
    }

    #[test]
    fn test_unknown_and_malformed_entries_skipped() {
        let entries = vec![
            entry("1-0", json!({"notification_id": "missing", "targets": []})),
            entry("2-0", json!({"no_id": true})),
            entry("3-0", json!({"notification_id": "digest-1"})),
        ];
        let plan = plan_batch(&catalog(), &entries);

        assert!(plan.rounds.is_empty());
        assert_eq!(plan.skipped, 3);
    }

    #[test]
    fn test_live_event_without_targets_plans_nothing() {
        let data = json!({"notification_id": "live-1", "instance": {"id": "x"}});
        let plan = plan_batch(&catalog(), &[entry("1-0", data)]);
        assert!(plan.rounds.is_empty());
        assert_eq!(plan.skipped, 0);
    }

    #[test]
    fn test_target_user_outcomes_resolved() {
        let data = json!({
            "notification_id": "live-1",
            "instance": {},
            "targets": [{
                "user": {"user_id": "u1", "outcomes": ["UI", "nope"]},
                "type": "create",
                "message": "m"
            }]
        });
        let plan = plan_batch(&catalog(), &[entry("1-0", data)]);
        let round = &plan.rounds[0];
        assert!(round.outcomes[0].outcome.is_some());
        assert!(round.outcomes[1].outcome.is_none());
    }
}
