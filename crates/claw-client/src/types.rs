//! Core chat message types

use serde::{Deserialize, Serialize};

/// Who authored a text message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    /// The service omits `name` on agent text, so this is the default
    #[default]
    Agent,
}

/// One entry of a conversation log, as carried on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatMessage {
    /// Plain text from the user or the agent
    Text {
        content: String,
        #[serde(default)]
        name: Speaker,
    },
    /// Tool invocation by the agent
    #[serde(alias = "tool_call")]
    ToolUse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    /// Output of a tool invocation
    ToolResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default)]
        content: serde_json::Value,
    },
    /// File the agent sent to the user, relative to its workspace
    File {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    /// Error reported by the service or by the local transport
    Error { content: String },
}

impl ChatMessage {
    /// Wire `type` values that decode to a message
    pub const WIRE_TYPES: &'static [&'static str] =
        &["text", "tool_use", "tool_call", "tool_result", "file", "error"];

    /// Create a user text message
    pub fn user(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
            name: Speaker::User,
        }
    }

    /// Create an agent text message
    pub fn agent(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
            name: Speaker::Agent,
        }
    }

    /// Create an error message
    pub fn error(content: impl Into<String>) -> Self {
        Self::Error {
            content: content.into(),
        }
    }

    /// Whether `ty` names a message variant on the wire
    pub fn is_wire_type(ty: &str) -> bool {
        Self::WIRE_TYPES.contains(&ty)
    }

    /// Get the text if this is a text message
    pub fn text(&self) -> Option<&str> {
        match self {
            ChatMessage::Text { content, .. } => Some(content),
            _ => None,
        }
    }

    /// Get the speaker if this is a text message
    pub fn speaker(&self) -> Option<Speaker> {
        match self {
            ChatMessage::Text { name, .. } => Some(*name),
            _ => None,
        }
    }

    /// Check if this is an error message
    pub fn is_error(&self) -> bool {
        matches!(self, ChatMessage::Error { .. })
    }

    /// Short kind label, matching the wire `type`
    pub fn kind(&self) -> &'static str {
        match self {
            ChatMessage::Text { .. } => "text",
            ChatMessage::ToolUse { .. } => "tool_use",
            ChatMessage::ToolResult { .. } => "tool_result",
            ChatMessage::File { .. } => "file",
            ChatMessage::Error { .. } => "error",
        }
    }
}
