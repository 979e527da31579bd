//! Result shape returned to tool callers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::tool::{ToolError, ToolOutput};

/// One block of response content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
}

/// A tool call's result as seen by the client: text content for simple
/// clients plus the structured value when there is one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResponse {
    /// Strings become plain text; other values are pretty-printed, and
    /// objects are also kept as structured content.
    pub fn from_value(value: Value, is_error: bool) -> Self {
        let text = match &value {
            Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        };
        let structured = value.is_object().then_some(value);
        Self {
            content: vec![ContentBlock::Text { text }],
            structured,
            is_error,
        }
    }

    pub fn from_output(output: ToolOutput) -> Self {
        Self::from_value(output.result, false)
    }

    /// Failures are reported as results, not transport errors.
    pub fn from_error(err: &ToolError) -> Self {
        Self::from_value(
            serde_json::json!({"ok": false, "error": err.to_string()}),
            true,
        )
    }

    /// All text blocks concatenated.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => text.as_str(),
            })
            .collect()
    }
}
