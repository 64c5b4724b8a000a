//! Data handed to outcome templates.

use serde::Serialize;

use crate::config::PlatformConfig;

use super::{ContentBlock, NotificationTrigger, RawNotificationEvent, TargetUser};

const DEFAULT_BACKGROUND: &str = "0a1929";

/// Platform values exposed to templates as `settings`.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformSettings {
    pub platform_url: String,
    pub platform_email: String,
    pub platform_theme_dark_background: String,
    #[serde(skip)]
    pub doc_uri: String,
}

impl From<&PlatformConfig> for PlatformSettings {
    fn from(config: &PlatformConfig) -> Self {
        Self {
            platform_url: config.base_url.clone(),
            platform_email: config.email.clone(),
            platform_theme_dark_background: config.theme_dark_background.clone(),
            doc_uri: config.doc_uri.clone(),
        }
    }
}

impl PlatformSettings {
    /// Dark theme background as bare hex, for inline CSS (`#{{background_color}}`).
    pub fn background_color(&self) -> String {
        let color = self.platform_theme_dark_background.trim();
        let color = color.strip_prefix('#').unwrap_or(color);
        if color.is_empty() {
            DEFAULT_BACKGROUND.to_string()
        } else {
            color.to_string()
        }
    }
}

/// `New {trigger_type} notification for {name}`; also the email subject.
pub fn notification_title(trigger: &NotificationTrigger) -> String {
    format!(
        "New {} notification for {}",
        trigger.trigger_type, trigger.name
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateContext<'a> {
    pub title: String,
    pub content: &'a [ContentBlock],
    pub notification: &'a NotificationTrigger,
    pub settings: &'a PlatformSettings,
    pub user: &'a TargetUser,
    pub data: &'a [RawNotificationEvent],
    pub platform_uri: &'a str,
    pub doc_uri: &'a str,
    pub background_color: String,
}

impl<'a> TemplateContext<'a> {
    pub fn new(
        notification: &'a NotificationTrigger,
        user: &'a TargetUser,
        content: &'a [ContentBlock],
        data: &'a [RawNotificationEvent],
        settings: &'a PlatformSettings,
    ) -> Self {
        Self {
            title: notification_title(notification),
            content,
            notification,
            settings,
            user,
            data,
            platform_uri: &settings.platform_url,
            doc_uri: &settings.doc_uri,
            background_color: settings.background_color(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::TriggerType;

    fn settings(background: &str) -> PlatformSettings {
        PlatformSettings {
            platform_url: "http://localhost:8082".to_string(),
            platform_email: "platform@example.com".to_string(),
            platform_theme_dark_background: background.to_string(),
            doc_uri: "http://docs".to_string(),
        }
    }

    #[test]
    fn test_background_color() {
        assert_eq!(settings("#0a1929").background_color(), "0a1929");
        assert_eq!(settings("112233").background_color(), "112233");
        assert_eq!(settings("").background_color(), "0a1929");
    }

    #[test]
    fn test_context_fields() {
        let trigger = NotificationTrigger {
            id: "t1".to_string(),
            name: "Object Watch".to_string(),
            trigger_type: TriggerType::Live,
        };
        let user = TargetUser {
            user_id: "u1".to_string(),
            user_email: "u1@example.com".to_string(),
            outcomes: vec!["UI".to_string()],
        };
        let settings = settings("#123456");
        let context = TemplateContext::new(&trigger, &user, &[], &[], &settings);
        let value = serde_json::to_value(&context).unwrap();

        assert_eq!(value["title"], "New live notification for Object Watch");
        assert_eq!(value["background_color"], "123456");
        assert_eq!(value["platform_uri"], "http://localhost:8082");
        assert_eq!(value["doc_uri"], "http://docs");
        assert_eq!(value["user"]["user_email"], "u1@example.com");
        assert_eq!(value["settings"]["platform_email"], "platform@example.com");
        assert!(value["content"].as_array().unwrap().is_empty());
    }
}
