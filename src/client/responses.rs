//! Responses API request and response shapes.

use crate::models::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for `POST /openai/responses`.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseRequest {
    /// Deployment (model) name
    pub model: String,
    /// Input messages
    pub input: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<TextConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// Output text configuration.
#[derive(Debug, Clone, Serialize)]
pub struct TextConfig {
    pub format: TextFormat,
}

/// Output text format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextFormat {
    Text,
    /// Model must emit a single JSON object
    JsonObject,
}

impl ResponseRequest {
    pub fn new(model: impl Into<String>, input: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            input,
            text: None,
            temperature: None,
        }
    }

    /// Require a JSON object as output.
    pub fn json_object(mut self) -> Self {
        self.text = Some(TextConfig {
            format: TextFormat::JsonObject,
        });
        self
    }
}

/// A Responses API result, kept as raw JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct ResponseObject {
    raw: Value,
}

impl ResponseObject {
    pub fn from_value(raw: Value) -> Self {
        Self { raw }
    }

    pub fn id(&self) -> Option<&str> {
        self.raw.get("id").and_then(Value::as_str)
    }

    pub fn status(&self) -> Option<&str> {
        self.raw.get("status").and_then(Value::as_str)
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Generated text.
    ///
    /// Uses a top-level `output_text` when present; otherwise joins the
    /// `output_text` chunks of the first output item that carries content.
    pub fn output_text(&self) -> Option<String> {
        if let Some(text) = self.raw.get("output_text").and_then(Value::as_str) {
            return Some(text.to_string());
        }

        let content = self
            .raw
            .get("output")?
            .as_array()?
            .iter()
            .find_map(|item| {
                item.get("content")
                    .and_then(Value::as_array)
                    .filter(|chunks| !chunks.is_empty())
            })?;

        let texts: Vec<&str> = content
            .iter()
            .filter(|chunk| chunk.get("type").and_then(Value::as_str) == Some("output_text"))
            .filter_map(|chunk| chunk.get("text").and_then(Value::as_str))
            .collect();

        if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        }
    }

    /// [`ResponseObject::output_text`], falling back to the raw JSON.
    pub fn text(&self) -> String {
        self.output_text().unwrap_or_else(|| self.raw.to_string())
    }
}
