use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Delivery cadence of a trigger; determines the event shape on the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    /// One stream event per matched domain event, fanned out to its targets
    Live,
    /// Pre-accumulated events for a single user
    Digest,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Live => "live",
            TriggerType::Digest => "digest",
        }
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named notification rule. Immutable for a processing cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationTrigger {
    pub id: String,
    pub name: String,
    pub trigger_type: TriggerType,
}

/// Delivery channel kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutcomeType {
    /// In-app inbox record
    Ui,
    Email,
    Webhook,
}

impl OutcomeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeType::Ui => "UI",
            OutcomeType::Email => "EMAIL",
            OutcomeType::Webhook => "WEBHOOK",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeConfiguration {
    /// Handlebars template (EMAIL, WEBHOOK)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Target URI (WEBHOOK)
    #[serde(default, alias = "url", skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// A configured delivery channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(alias = "type")]
    pub outcome_type: OutcomeType,
    #[serde(default)]
    pub configuration: OutcomeConfiguration,
}

/// A recipient and the outcomes it subscribed to, in delivery order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetUser {
    pub user_id: String,
    #[serde(default)]
    pub user_email: String,
    #[serde(default)]
    pub outcomes: Vec<String>,
}

/// Peek at the trigger id before decoding the shape-specific payload.
#[derive(Debug, Clone, Deserialize)]
pub struct EventHeader {
    pub notification_id: String,
}

/// A single matched domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawNotificationEvent {
    pub notification_id: String,
    #[serde(default, alias = "instance_ref")]
    pub instance: Value,
    #[serde(alias = "type")]
    pub operation: String,
    #[serde(default)]
    pub message: String,
}

impl RawNotificationEvent {
    /// The `id` of the instance payload, when it is a string.
    pub fn instance_id(&self) -> Option<String> {
        self.instance
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveTarget {
    pub user: TargetUser,
    #[serde(alias = "type")]
    pub operation: String,
    #[serde(default)]
    pub message: String,
}

/// Stream shape for `live` triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveNotificationEvent {
    pub notification_id: String,
    #[serde(default)]
    pub targets: Vec<LiveTarget>,
    #[serde(default, alias = "data")]
    pub instance: Value,
}

/// Stream shape for `digest` triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestNotificationEvent {
    pub notification_id: String,
    pub target: TargetUser,
    #[serde(default, alias = "data")]
    pub events: Vec<RawNotificationEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentEvent {
    pub operation: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

/// Events grouped under one trigger name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub title: String,
    pub events: Vec<ContentEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_live_event_accepts_wire_aliases() {
        let raw = json!({
            "notification_id": "trig-1",
            "targets": [
                {
                    "user": {"user_id": "u1", "user_email": "u1@example.com", "outcomes": ["UI"]},
                    "type": "create",
                    "message": "Obj created"
                }
            ],
            "data": {"id": "obj-1", "name": "Object"}
        });

        let event: LiveNotificationEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.targets.len(), 1);
        assert_eq!(event.targets[0].operation, "create");
        assert_eq!(event.instance["id"], "obj-1");
    }

    #[test]
    fn test_digest_event_parsing() {
        let raw = json!({
            "notification_id": "digest-1",
            "target": {"user_id": "u1", "user_email": "u1@example.com", "outcomes": ["EMAIL"]},
            "data": [
                {"notification_id": "a", "instance": {"id": "x"}, "type": "update", "message": "m1"},
                {"notification_id": "b", "instance": {}, "operation": "delete", "message": "m2"}
            ]
        });

        let event: DigestNotificationEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.events.len(), 2);
        assert_eq!(event.events[0].instance_id(), Some("x".to_string()));
        assert_eq!(event.events[1].instance_id(), None);
        assert_eq!(event.events[1].operation, "delete");
    }

    #[test]
    fn test_outcome_type_wire_names() {
        let outcome: Outcome = serde_json::from_value(json!({
            "id": "hook-1",
            "type": "WEBHOOK",
            "configuration": {"template": "{}", "url": "http://example.com"}
        }))
        .unwrap();

        assert_eq!(outcome.outcome_type, OutcomeType::Webhook);
        assert_eq!(outcome.configuration.uri.as_deref(), Some("http://example.com"));
        assert_eq!(OutcomeType::Ui.as_str(), "UI");
    }

    #[test]
    fn test_content_event_omits_missing_instance_id() {
        let event = ContentEvent {
            operation: "create".to_string(),
            message: "m".to_string(),
            instance_id: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("instance_id").is_none());
    }

    #[test]
    fn test_trigger_type_display() {
        assert_eq!(TriggerType::Live.to_string(), "live");
        let trigger: NotificationTrigger = serde_json::from_value(json!({
            "id": "t", "name": "n", "trigger_type": "digest"
        }))
        .unwrap();
        assert_eq!(trigger.trigger_type, TriggerType::Digest);
    }
}
