//! Recognized transcript line shapes.
//!
//! Each JSONL line decodes into exactly one [`TranscriptEvent`].  Lines
//! with an unknown `type`, or a known type whose payload does not fit,
//! become [`TranscriptEvent::Unrecognized`] instead of an error.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptEvent {
    /// `{"type":"session","id":..,"cwd":..}`
    Session {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        cwd: Option<String>,
    },
    /// `{"type":"model_change","modelId":..}`
    ModelChange {
        #[serde(rename = "modelId", default)]
        model_id: Option<String>,
    },
    /// `{"type":"message","timestamp":..,"message":{..}}`
    Message {
        #[serde(default)]
        timestamp: Option<Value>,
        message: MessageBody,
    },
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Assistant,
    User,
    ToolResult,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub content: MessageContent,
    /// Some writers stamp the inner message instead of the envelope.
    #[serde(default)]
    pub timestamp: Option<Value>,
}

/// Message content: a list of typed items, plain text, or anything else.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Items(Vec<ContentItem>),
    Text(String),
    Other(Value),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Items(Vec::new())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ContentItem {
    #[serde(rename = "toolCall")]
    ToolCall {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        name: String,
        #[serde(default)]
        arguments: Value,
    },
    #[serde(other)]
    Other,
}

/// A borrowed view of one `toolCall` content item.
#[derive(Debug, Clone, Copy)]
pub struct ToolCall<'a> {
    pub id: Option<&'a str>,
    pub name: &'a str,
    pub arguments: &'a Value,
}

impl MessageBody {
    /// Tool calls in content order.
    pub fn tool_calls(&self) -> impl Iterator<Item = ToolCall<'_>> {
        let items: &[ContentItem] = match &self.content {
            MessageContent::Items(items) => items,
            _ => &[],
        };
        items.iter().filter_map(|item| match item {
            ContentItem::ToolCall {
                id,
                name,
                arguments,
            } => Some(ToolCall {
                id: id.as_deref(),
                name,
                arguments,
            }),
            ContentItem::Other => None,
        })
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls().next().is_some()
    }
}
