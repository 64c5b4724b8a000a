//! Built-in outcomes available to every user without configuration.

use crate::notification::{Outcome, OutcomeConfiguration, OutcomeType};

/// Inbox outcome id.
pub const STATIC_OUTCOME_UI: &str = "UI";
/// Default email outcome id.
pub const STATIC_OUTCOME_EMAIL: &str = "EMAIL";

/// HTML body for the built-in email outcome.
pub const DEFAULT_EMAIL_TEMPLATE: &str = r##"<html>
<body style="margin: 0; padding: 0; font-family: sans-serif;">
  <table width="100%" cellpadding="0" cellspacing="0" style="background-color: #{{background_color}}; padding: 24px;">
    <tr>
      <td style="color: #ffffff;">
        <h2 style="margin: 0 0 16px 0;">{{title}}</h2>
        {{#each content}}
        <h3 style="margin: 16px 0 8px 0;">{{title}}</h3>
        <ul style="margin: 0; padding-left: 20px;">
          {{#each events}}
          <li>
            {{#if instance_id}}<a style="color: #ffffff;" href="{{@root.platform_uri}}/dashboard/id/{{instance_id}}">{{message}}</a>{{else}}{{message}}{{/if}}
            <span style="opacity: 0.7;">({{operation}})</span>
          </li>
          {{/each}}
        </ul>
        {{/each}}
        <p style="margin-top: 24px; font-size: 12px;">
          <a style="color: #ffffff;" href="{{platform_uri}}">Open the platform</a>
          &middot;
          <a style="color: #ffffff;" href="{{doc_uri}}">Documentation</a>
        </p>
      </td>
    </tr>
  </table>
</body>
</html>
"##;

/// Outcomes that exist regardless of the catalog source. Their ids are reserved.
pub fn static_outcomes() -> Vec<Outcome> {
    vec![
        Outcome {
            id: STATIC_OUTCOME_UI.to_string(),
            name: "User interface".to_string(),
            outcome_type: OutcomeType::Ui,
            configuration: OutcomeConfiguration::default(),
        },
        Outcome {
            id: STATIC_OUTCOME_EMAIL.to_string(),
            name: "Default mailer".to_string(),
            outcome_type: OutcomeType::Email,
            configuration: OutcomeConfiguration {
                template: Some(DEFAULT_EMAIL_TEMPLATE.to_string()),
                uri: None,
            },
        },
    ]
}

pub fn is_reserved(id: &str) -> bool {
    id == STATIC_OUTCOME_UI || id == STATIC_OUTCOME_EMAIL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_outcome_ids_are_reserved() {
        for outcome in static_outcomes() {
            assert!(is_reserved(&outcome.id));
        }
        assert!(!is_reserved("hook-1"));
    }

    #[test]
    fn test_email_outcome_has_template() {
        let email = static_outcomes()
            .into_iter()
            .find(|o| o.outcome_type == OutcomeType::Email)
            .unwrap();
        assert!(email.configuration.template.is_some());
    }
}
