use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinSet;

use crate::catalog::NotificationCatalog;
use crate::metrics::DispatchMetrics;
use crate::outcome::{
    InboxError, InboxRecord, InboxStore, MailError, MailMessage, MailTransport, WebhookClient,
    WebhookError,
};
use crate::template::{RenderError, RenderFormat, TemplateRenderer};

use super::aggregator::aggregate;
use super::context::{notification_title, PlatformSettings, TemplateContext};
use super::{ContentBlock, NotificationTrigger, Outcome, OutcomeType, RawNotificationEvent, TargetUser};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("Webhook outcome has no target URI")]
    MissingUri,

    #[error("Inbox error: {0}")]
    Inbox(#[from] InboxError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    #[error("Template context could not be built: {0}")]
    Context(#[from] serde_json::Error),

    #[error("Outcome task panicked: {0}")]
    Panicked(String),
}

impl DispatchError {
    /// Configuration problems skip the outcome; everything else is a delivery failure.
    fn is_skip(&self) -> bool {
        matches!(self, DispatchError::Render(_) | DispatchError::MissingUri)
    }
}

/// An outcome id from the user's list, resolved against the batch catalog.
#[derive(Debug, Clone)]
pub struct OutcomeSlot {
    pub id: String,
    pub outcome: Option<Outcome>,
}

/// Everything needed to deliver one notification to one user.
#[derive(Debug, Clone)]
pub struct DispatchRound {
    pub trigger: NotificationTrigger,
    pub user: TargetUser,
    pub events: Vec<RawNotificationEvent>,
    pub content: Vec<ContentBlock>,
    pub outcomes: Vec<OutcomeSlot>,
}

impl DispatchRound {
    /// Aggregate `events` and resolve the user's outcomes against `catalog`.
    pub fn build(
        trigger: NotificationTrigger,
        user: TargetUser,
        events: Vec<RawNotificationEvent>,
        catalog: &NotificationCatalog,
    ) -> Self {
        let content = aggregate(&events, catalog);
        let outcomes = user
            .outcomes
            .iter()
            .map(|id| OutcomeSlot {
                id: id.clone(),
                outcome: catalog.resolve_outcome(id).cloned(),
            })
            .collect();

        Self {
            trigger,
            user,
            events,
            content,
            outcomes,
        }
    }

    pub fn title(&self) -> String {
        notification_title(&self.trigger)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Delivered,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct OutcomeResult {
    pub outcome_id: String,
    pub outcome_type: Option<OutcomeType>,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

/// Per-outcome results of one round, in the user's outcome order.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub trigger_id: String,
    pub user_id: String,
    pub results: Vec<OutcomeResult>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.count(|s| matches!(s, OutcomeStatus::Delivered))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, OutcomeStatus::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, OutcomeStatus::Failed(_)))
    }

    fn count(&self, f: impl Fn(&OutcomeStatus) -> bool) -> usize {
        self.results.iter().filter(|r| f(&r.status)).count()
    }
}

#[derive(Debug, Default)]
pub struct DispatcherStats {
    pub rounds: AtomicU64,
    pub delivered: AtomicU64,
    pub skipped: AtomicU64,
    pub failed: AtomicU64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            rounds: self.rounds.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub rounds: u64,
    pub delivered: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Renders and sends outcome content.
///
/// Each outcome of a round runs as its own task; a failing or panicking
/// outcome never affects its siblings and never propagates to the caller.
pub struct OutcomeDispatcher {
    inbox: Arc<dyn InboxStore>,
    mail: Arc<dyn MailTransport>,
    webhook: Arc<dyn WebhookClient>,
    renderer: Arc<dyn TemplateRenderer>,
    settings: PlatformSettings,
    stats: DispatcherStats,
}

impl OutcomeDispatcher {
    pub fn new(
        inbox: Arc<dyn InboxStore>,
        mail: Arc<dyn MailTransport>,
        webhook: Arc<dyn WebhookClient>,
        renderer: Arc<dyn TemplateRenderer>,
        settings: PlatformSettings,
    ) -> Self {
        Self {
            inbox,
            mail,
            webhook,
            renderer,
            settings,
            stats: DispatcherStats::default(),
        }
    }

    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.stats.snapshot()
    }

    /// Deliver every outcome of `round` concurrently and collect the results.
    #[tracing::instrument(
        skip(self, round),
        fields(trigger_id = %round.trigger.id, user_id = %round.user.user_id, outcomes = round.outcomes.len())
    )]
    pub async fn dispatch(self: &Arc<Self>, round: DispatchRound) -> DispatchReport {
        self.stats.rounds.fetch_add(1, Ordering::Relaxed);

        let round = Arc::new(round);
        let mut results: Vec<Option<OutcomeResult>> = vec![None; round.outcomes.len()];
        let mut tasks = JoinSet::new();

        for (index, slot) in round.outcomes.iter().enumerate() {
            let Some(outcome) = slot.outcome.clone() else {
                tracing::debug!(outcome_id = %slot.id, "Outcome not found, skipping");
                results[index] = Some(OutcomeResult {
                    outcome_id: slot.id.clone(),
                    outcome_type: None,
                    status: OutcomeStatus::Skipped("unknown outcome".to_string()),
                });
                continue;
            };

            let this = Arc::clone(self);
            let round = Arc::clone(&round);
            tasks.spawn(async move {
                let started = Instant::now();
                let result = AssertUnwindSafe(this.deliver(&outcome, &round))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(DispatchError::Panicked(panic_message(panic.as_ref()))));
                (index, outcome, result, started.elapsed().as_secs_f64())
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (index, outcome, result, elapsed) = match joined {
                Ok(done) => done,
                Err(e) => {
                    tracing::error!(error = %e, "Outcome task did not complete");
                    continue;
                }
            };

            let status = self.record(&outcome, result, elapsed);
            results[index] = Some(OutcomeResult {
                outcome_id: outcome.id,
                outcome_type: Some(outcome.outcome_type),
                status,
            });
        }

        let results = results
            .into_iter()
            .zip(round.outcomes.iter())
            .map(|(result, slot)| {
                result.unwrap_or_else(|| OutcomeResult {
                    outcome_id: slot.id.clone(),
                    outcome_type: slot.outcome.as_ref().map(|o| o.outcome_type),
                    status: OutcomeStatus::Failed("task aborted".to_string()),
                })
            })
            .collect();

        DispatchReport {
            trigger_id: round.trigger.id.clone(),
            user_id: round.user.user_id.clone(),
            results,
        }
    }

    fn record(
        &self,
        outcome: &Outcome,
        result: Result<(), DispatchError>,
        elapsed: f64,
    ) -> OutcomeStatus {
        let outcome_type = outcome.outcome_type.as_str();
        match result {
            Ok(()) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                DispatchMetrics::record(outcome_type, true, elapsed);
                tracing::debug!(outcome_id = %outcome.id, outcome_type = %outcome_type, "Outcome delivered");
                OutcomeStatus::Delivered
            }
            Err(e) if e.is_skip() => {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                DispatchMetrics::record(outcome_type, false, elapsed);
                tracing::warn!(
                    outcome_id = %outcome.id,
                    outcome_type = %outcome_type,
                    error = %e,
                    "Outcome skipped"
                );
                OutcomeStatus::Skipped(e.to_string())
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                DispatchMetrics::record(outcome_type, false, elapsed);
                tracing::error!(
                    outcome_id = %outcome.id,
                    outcome_type = %outcome_type,
                    error = %e,
                    "Error executing publication"
                );
                OutcomeStatus::Failed(e.to_string())
            }
        }
    }

    async fn deliver(&self, outcome: &Outcome, round: &DispatchRound) -> Result<(), DispatchError> {
        match outcome.outcome_type {
            OutcomeType::Ui => {
                let record = InboxRecord::new(
                    round.trigger.name.clone(),
                    round.trigger.trigger_type,
                    round.user.user_id.clone(),
                    round.content.clone(),
                );
                self.inbox.insert(record).await?;
            }
            OutcomeType::Email => {
                let template = outcome
                    .configuration
                    .template
                    .as_deref()
                    .ok_or(RenderError::MissingTemplate)?;
                let html = self
                    .renderer
                    .render(template, &self.context(round)?, RenderFormat::Html)?;

                let message = MailMessage {
                    from: self.settings.platform_email.clone(),
                    to: round.user.user_email.clone(),
                    subject: round.title(),
                    html,
                };
                self.mail.send(&message).await?;
            }
            OutcomeType::Webhook => {
                let template = outcome
                    .configuration
                    .template
                    .as_deref()
                    .ok_or(RenderError::MissingTemplate)?;
                let uri = outcome
                    .configuration
                    .uri
                    .as_deref()
                    .ok_or(DispatchError::MissingUri)?;

                let rendered = self
                    .renderer
                    .render(template, &self.context(round)?, RenderFormat::Json)?;
                let body: Value = serde_json::from_str(&rendered)
                    .map_err(|e| RenderError::InvalidJson(e.to_string()))?;

                self.webhook.post(uri, &body).await?;
            }
        }
        Ok(())
    }

    fn context(&self, round: &DispatchRound) -> Result<Value, serde_json::Error> {
        let context = TemplateContext::new(
            &round.trigger,
            &round.user,
            &round.content,
            &round.events,
            &self.settings,
        );
        serde_json::to_value(&context)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::{OutcomeConfiguration, TriggerType};
    use crate::outcome::MemoryInboxStore;
    use crate::template::HandlebarsRenderer;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingMail {
        sent: Mutex<Vec<MailMessage>>,
    }

    #[async_trait]
    impl MailTransport for RecordingMail {
        async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }

        async fn is_alive(&self) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct RecordingWebhook {
        posted: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl WebhookClient for RecordingWebhook {
        async fn post(&self, uri: &str, body: &Value) -> Result<(), WebhookError> {
            self.posted.lock().unwrap().push((uri.to_string(), body.clone()));
            Ok(())
        }
    }

    struct PanickingInbox;

    #[async_trait]
    impl InboxStore for PanickingInbox {
        fn backend(&self) -> &'static str {
            "panicking"
        }

        async fn insert(&self, _record: InboxRecord) -> Result<(), InboxError> {
            panic!("inbox exploded");
        }
    }

    fn settings() -> PlatformSettings {
        PlatformSettings {
            platform_url: "http://localhost:8082".to_string(),
            platform_email: "platform@example.com".to_string(),
            platform_theme_dark_background: "#0a1929".to_string(),
            doc_uri: "http://docs".to_string(),
        }
    }

    fn webhook_outcome(id: &str, template: &str) -> Outcome {
        Outcome {
            id: id.to_string(),
            name: String::new(),
            outcome_type: OutcomeType::Webhook,
            configuration: OutcomeConfiguration {
                template: Some(template.to_string()),
                uri: Some("http://hooks.local/notify".to_string()),
            },
        }
    }

    fn round(outcomes: Vec<&str>, dynamic: Vec<Outcome>) -> DispatchRound {
        named_round("Object Watch", outcomes, dynamic)
    }

    fn named_round(trigger_name: &str, outcomes: Vec<&str>, dynamic: Vec<Outcome>) -> DispatchRound {
        let trigger = NotificationTrigger {
            id: "trig-1".to_string(),
            name: trigger_name.to_string(),
            trigger_type: TriggerType::Live,
        };
        let catalog = NotificationCatalog::from_parts(vec![trigger.clone()], dynamic);
        let user = TargetUser {
            user_id: "u1".to_string(),
            user_email: "u1@example.com".to_string(),
            outcomes: outcomes.into_iter().map(String::from).collect(),
        };
        let events = vec![RawNotificationEvent {
            notification_id: "trig-1".to_string(),
            instance: json!({"id": "obj-1"}),
            operation: "create".to_string(),
            message: "Obj created".to_string(),
        }];
        DispatchRound::build(trigger, user, events, &catalog)
    }

    fn dispatcher(
        inbox: Arc<dyn InboxStore>,
        mail: Arc<RecordingMail>,
        webhook: Arc<RecordingWebhook>,
    ) -> Arc<OutcomeDispatcher> {
        Arc::new(OutcomeDispatcher::new(
            inbox,
            mail,
            webhook,
            Arc::new(HandlebarsRenderer::new()),
            settings(),
        ))
    }

    #[tokio::test]
    async fn test_all_outcome_types_delivered_in_order() {
        let inbox = Arc::new(MemoryInboxStore::new());
        let mail = Arc::new(RecordingMail::default());
        let webhook = Arc::new(RecordingWebhook::default());
        let dispatcher = dispatcher(inbox.clone(), mail.clone(), webhook.clone());

        let hook = webhook_outcome("hook-1", r#"{"text": {{json title}}, "blocks": {{json content}}}"#);
        let report = dispatcher
            .dispatch(round(vec!["UI", "EMAIL", "hook-1"], vec![hook]))
            .await;

        assert_eq!(report.delivered(), 3);
        let ids: Vec<_> = report.results.iter().map(|r| r.outcome_id.as_str()).collect();
        assert_eq!(ids, vec!["UI", "EMAIL", "hook-1"]);

        assert_eq!(inbox.records_for("u1").len(), 1);

        let sent = mail.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].from, "platform@example.com");
        assert_eq!(sent[0].to, "u1@example.com");
        assert_eq!(sent[0].subject, "New live notification for Object Watch");
        assert!(sent[0].html.contains("Obj created"));

        let posted = webhook.posted.lock().unwrap().clone();
        assert_eq!(posted[0].0, "http://hooks.local/notify");
        assert_eq!(posted[0].1["text"], "New live notification for Object Watch");
        assert_eq!(posted[0].1["blocks"][0]["events"][0]["instance_id"], "obj-1");
    }

    #[tokio::test]
    async fn test_quoted_trigger_name_stays_valid_json() {
        let webhook = Arc::new(RecordingWebhook::default());
        let dispatcher = dispatcher(
            Arc::new(MemoryInboxStore::new()),
            Arc::new(RecordingMail::default()),
            webhook.clone(),
        );

        let hook = webhook_outcome("hook-1", r#"{"text": {{json title}}}"#);
        let report = dispatcher
            .dispatch(named_round(r#"The "Red" Team \ APT"#, vec!["hook-1"], vec![hook]))
            .await;

        assert_eq!(report.delivered(), 1);
        let posted = webhook.posted.lock().unwrap().clone();
        assert_eq!(
            posted[0].1["text"],
            r#"New live notification for The "Red" Team \ APT"#
        );
    }

    #[tokio::test]
    async fn test_invalid_webhook_json_is_skipped() {
        let inbox = Arc::new(MemoryInboxStore::new());
        let webhook = Arc::new(RecordingWebhook::default());
        let dispatcher = dispatcher(inbox.clone(), Arc::new(RecordingMail::default()), webhook.clone());

        let hook = webhook_outcome("hook-1", "not json {{title}}");
        let report = dispatcher.dispatch(round(vec!["hook-1", "UI"], vec![hook])).await;

        assert!(matches!(report.results[0].status, OutcomeStatus::Skipped(_)));
        assert_eq!(report.results[1].status, OutcomeStatus::Delivered);
        assert!(webhook.posted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_outcome_skipped() {
        let dispatcher = dispatcher(
            Arc::new(MemoryInboxStore::new()),
            Arc::new(RecordingMail::default()),
            Arc::new(RecordingWebhook::default()),
        );
        let report = dispatcher.dispatch(round(vec!["nope", "UI"], vec![])).await;

        assert_eq!(report.skipped(), 1);
        assert_eq!(report.results[0].outcome_type, None);
        assert_eq!(report.delivered(), 1);
    }

    #[tokio::test]
    async fn test_panicking_outcome_is_isolated() {
        let mail = Arc::new(RecordingMail::default());
        let dispatcher = dispatcher(
            Arc::new(PanickingInbox),
            mail.clone(),
            Arc::new(RecordingWebhook::default()),
        );
        let report = dispatcher.dispatch(round(vec!["UI", "EMAIL"], vec![])).await;

        assert!(matches!(report.results[0].status, OutcomeStatus::Failed(_)));
        assert_eq!(report.results[1].status, OutcomeStatus::Delivered);
        assert_eq!(mail.sent.lock().unwrap().len(), 1);
        assert_eq!(dispatcher.stats().failed, 1);
    }
}
