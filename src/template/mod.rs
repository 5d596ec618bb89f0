// Module: Template
// Renders HTTP request-body templates with evaluated data maps.

use std::collections::HashMap;

use minijinja::Environment;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("request template error: {0}")]
    Parse(String),

    #[error("error rendering template: {0}")]
    Render(String),
}

/// A request-body template.
///
/// The source is syntax-checked when the template is created so that invalid
/// templates fail at parse time, before any step executes. `{{ name }}`
/// placeholders are bound to the data map supplied at render time.
#[derive(Debug, Clone)]
pub struct BodyTemplate {
    source: String,
}

impl BodyTemplate {
    /// Validates the template source and wraps it for later rendering.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let env = Environment::new();
        env.template_from_str(source)
            .map_err(|e| TemplateError::Parse(e.to_string()))?;

        Ok(Self {
            source: source.to_string(),
        })
    }

    /// Renders the template with the given data map, producing body bytes.
    pub fn render(&self, data: &HashMap<String, Value>) -> Result<Vec<u8>, TemplateError> {
        let env = Environment::new();
        let template = env
            .template_from_str(&self.source)
            .map_err(|e| TemplateError::Parse(e.to_string()))?;

        let rendered = template
            .render(data)
            .map_err(|e| TemplateError::Render(e.to_string()))?;

        Ok(rendered.into_bytes())
    }
}
