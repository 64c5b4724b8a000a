//! Outcome content rendering.
//!
//! Templates come from outcome configuration at runtime, so they are rendered
//! straight from their source string rather than pre-registered. Email bodies
//! are HTML-escaped; webhook bodies are rendered verbatim so the output can be
//! parsed as JSON.
//!
//! Besides the usual Handlebars built-ins, a `json` helper serialises any
//! context value: `{"blocks": {{json content}}}`. Webhook templates should
//! emit strings through it too (`{"text": {{json title}}}`): a bare
//! `"{{title}}"` breaks the body as soon as a trigger name contains a quote.

use handlebars::{handlebars_helper, Handlebars};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Outcome has no template")]
    MissingTemplate,

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Rendered webhook body is not valid JSON: {0}")]
    InvalidJson(String),
}

/// Escaping applied to rendered output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderFormat {
    Html,
    Json,
}

pub trait TemplateRenderer: Send + Sync {
    fn render(
        &self,
        template: &str,
        context: &Value,
        format: RenderFormat,
    ) -> Result<String, RenderError>;
}

handlebars_helper!(json: |v: Json| serde_json::to_string(v).unwrap_or_default());

/// Handlebars-backed renderer.
pub struct HandlebarsRenderer {
    html: Handlebars<'static>,
    raw: Handlebars<'static>,
}

impl HandlebarsRenderer {
    pub fn new() -> Self {
        let mut html = Handlebars::new();
        html.register_helper("json", Box::new(json));

        let mut raw = Handlebars::new();
        raw.register_escape_fn(handlebars::no_escape);
        raw.register_helper("json", Box::new(json));

        Self { html, raw }
    }
}

impl Default for HandlebarsRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer for HandlebarsRenderer {
    fn render(
        &self,
        template: &str,
        context: &Value,
        format: RenderFormat,
    ) -> Result<String, RenderError> {
        let engine = match format {
            RenderFormat::Html => &self.html,
            RenderFormat::Json => &self.raw,
        };

        engine
            .render_template(template, context)
            .map_err(|e| RenderError::Template(e.to_string()))
    }
}
