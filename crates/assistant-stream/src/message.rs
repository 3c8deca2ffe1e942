use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Producer role of a message.
///
/// Unknown roles are kept verbatim so foreign transcripts still round-trip.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    Human,
    Ai,
    Tool,
    Other(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Human => "human",
            Self::Ai => "ai",
            Self::Tool => "tool",
            Self::Other(value) => value,
        }
    }
}

impl From<String> for MessageType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "human" => Self::Human,
            "ai" => Self::Ai,
            "tool" => Self::Tool,
            _ => Self::Other(value),
        }
    }
}

impl From<MessageType> for String {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::Other(value) => value,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single structured tool result (for example one search hit).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Message body: plain text, a list of tool result items, or any other JSON
/// the producer chose to send.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Items(Vec<ContentItem>),
    Other(Value),
}

impl From<&str> for MessageContent {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Arguments of a tool invocation. Only `query` is interpreted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Tool invocation attached to an `ai` message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub args: ToolCallArgs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Wraps any present value, `null` included, in `Some`; absent fields stay
/// `None` through `#[serde(default)]`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// One transcript entry.
///
/// `id` is assigned by the producer and is the only identity used when merging
/// deltas. Messages built locally as run input may leave it empty; a `null`
/// id reads as empty too.
///
/// `content` and `tool_calls` distinguish an absent field (`None`) from an
/// explicit `null` so both re-encode as received.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "String::is_empty"
    )]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub content: Option<MessageContent>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub tool_calls: Option<Option<Vec<ToolCall>>>,
    /// Fields the client does not interpret, kept as received.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn new(id: impl Into<String>, kind: MessageType, content: impl Into<MessageContent>) -> Self {
        Self {
            id: id.into(),
            kind,
            content: Some(content.into()),
            tool_calls: None,
            extra: Map::new(),
        }
    }

    /// Human input message without an id, as sent in a run request.
    pub fn human_input(text: impl Into<String>) -> Self {
        Self::new(String::new(), MessageType::Human, text.into())
    }

    pub fn human(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, MessageType::Human, text.into())
    }

    pub fn ai(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, MessageType::Ai, text.into())
    }

    /// Attaches tool calls.
    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = Some(Some(calls));
        self
    }

    /// Attached tool calls; empty when the field is absent or `null`.
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_ref().and_then(Option::as_deref).unwrap_or_default()
    }

    /// Text view of the content: the text itself, or item contents joined by
    /// newlines. Other shapes and missing content render as empty.
    pub fn text(&self) -> String {
        match &self.content {
            Some(MessageContent::Text(text)) => text.clone(),
            Some(MessageContent::Items(items)) => items
                .iter()
                .filter_map(|item| item.content.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
            Some(MessageContent::Other(_)) | None => String::new(),
        }
    }
}

/// Wire shape of a message delta: either a bare list or `{"messages": [...]}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageBatch {
    List(Vec<Message>),
    Wrapped { messages: Vec<Message> },
}

impl MessageBatch {
    pub fn messages(&self) -> &[Message] {
        match self {
            Self::List(messages) | Self::Wrapped { messages } => messages,
        }
    }

    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Self::List(messages) | Self::Wrapped { messages } => messages,
        }
    }
}

impl From<Vec<Message>> for MessageBatch {
    fn from(value: Vec<Message>) -> Self {
        Self::List(value)
    }
}
