//! Tool definitions, call parameters and results.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[cfg(feature = "validation")]
use garde::Validate;

/// A tool a client may invoke, as advertised by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON-schema-shaped argument contract.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Response body of `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolListResult {
    pub tools: Vec<ToolDefinition>,
}

/// Parameters of a `tools/call` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<serde_json::Map<String, Value>>,
}

/// A single content item in a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text { text: String },
}

/// Terminal outcome of a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<Content>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl CallToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::Text { text: text.into() }],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::Text { text: text.into() }],
            is_error: true,
        }
    }

    /// Concatenated text of all content items.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                Content::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Arguments of `get_header`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "validation", derive(Validate))]
pub struct GetHeaderArgs {
    /// Header to look up, case-insensitively.
    #[cfg_attr(feature = "validation", garde(skip))]
    #[serde(default)]
    pub header_name: Option<String>,
}

/// Arguments of `start-notification-stream`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "validation", derive(Validate))]
pub struct NotificationStreamArgs {
    /// Seconds to wait between notifications.
    #[cfg_attr(feature = "validation", garde(range(min = 0.0, max = 3600.0)))]
    pub interval: f64,
    /// Number of notifications to send.
    #[cfg_attr(feature = "validation", garde(range(max = 10_000)))]
    pub count: u64,
    /// Identifier included in every notification.
    #[cfg_attr(feature = "validation", garde(length(min = 1)))]
    pub caller: String,
}
