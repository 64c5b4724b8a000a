//! Notification domain: wire types, content aggregation, template context,
//! and the per-batch dispatch pipeline.

mod aggregator;
mod context;
mod dispatcher;
mod handler;
mod types;

pub use aggregator::aggregate;
pub use context::{notification_title, PlatformSettings, TemplateContext};
pub use dispatcher::{
    DispatchError, DispatchReport, DispatchRound, DispatcherStats, DispatcherStatsSnapshot,
    OutcomeDispatcher, OutcomeResult, OutcomeSlot, OutcomeStatus,
};
pub use handler::{plan_batch, BatchPlan, PublisherHandler};
pub use types::{
    ContentBlock, ContentEvent, DigestNotificationEvent, EventHeader, LiveNotificationEvent,
    LiveTarget, NotificationTrigger, Outcome, OutcomeConfiguration, OutcomeType,
    RawNotificationEvent, TargetUser, TriggerType,
};
