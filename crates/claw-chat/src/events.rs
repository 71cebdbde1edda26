//! Store change events

use claw_client::ChatMessage;
use serde::{Deserialize, Serialize};

/// Emitted by the conversation store after each mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// A message was appended to a log
    Appended {
        conversation_id: String,
        message: ChatMessage,
    },

    /// A log was created from persisted history
    Seeded {
        conversation_id: String,
        count: usize,
    },

    /// A log was removed
    Cleared { conversation_id: String },

    /// A conversation started or stopped streaming
    StreamingChanged {
        conversation_id: String,
        streaming: bool,
    },
}

impl StoreEvent {
    /// The conversation this event belongs to
    pub fn conversation_id(&self) -> &str {
        match self {
            StoreEvent::Appended {
                conversation_id, ..
            }
            | StoreEvent::Seeded {
                conversation_id, ..
            }
            | StoreEvent::Cleared { conversation_id }
            | StoreEvent::StreamingChanged {
                conversation_id, ..
            } => conversation_id,
        }
    }
}
