//! Grouping of raw events into titled content blocks.

use std::collections::HashMap;

use crate::catalog::NotificationCatalog;

use super::{ContentBlock, ContentEvent, RawNotificationEvent};

/// Group `events` by the name of the trigger each one references.
///
/// Blocks appear in order of first occurrence and keep arrival order inside.
/// Events whose trigger does not resolve are dropped. Two triggers sharing a
/// name land in the same block.
pub fn aggregate(events: &[RawNotificationEvent], catalog: &NotificationCatalog) -> Vec<ContentBlock> {
    let mut blocks: Vec<ContentBlock> = Vec::new();
    let mut index_by_name: HashMap<String, usize> = HashMap::new();

    for event in events {
        let Some(trigger) = catalog.resolve_trigger(&event.notification_id) else {
            tracing::trace!(
                notification_id = %event.notification_id,
                "Dropping event for unknown trigger"
            );
            continue;
        };

        let content_event = ContentEvent {
            operation: event.operation.clone(),
            message: event.message.clone(),
            instance_id: event.instance_id(),
        };

        match index_by_name.get(&trigger.name) {
            Some(&index) => blocks[index].events.push(content_event),
            None => {
                index_by_name.insert(trigger.name.clone(), blocks.len());
                blocks.push(ContentBlock {
                    title: trigger.name.clone(),
                    events: vec![content_event],
                });
            }
        }
    }

    blocks
}
