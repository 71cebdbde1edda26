//! Stream frame decoding

use crate::{
    error::{Error, Result},
    types::ChatMessage,
};
use std::pin::Pin;
use tokio_stream::Stream;

/// One decoded SSE `data:` payload
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    /// A message for the conversation log
    Message(ChatMessage),
    /// The agent finished its reply
    Done,
    /// Liveness ping
    Keepalive,
    /// Frame type this client does not know about
    Unknown(String),
}

impl StreamFrame {
    /// Get the message if this frame carries one
    pub fn into_message(self) -> Option<ChatMessage> {
        match self {
            StreamFrame::Message(message) => Some(message),
            _ => None,
        }
    }
}

/// Decode a single frame payload.
///
/// Anything that is not a JSON object with a string `type` is malformed, as is
/// a known message type whose fields do not match.
pub fn decode_frame(data: &str) -> Result<StreamFrame> {
    let value: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| Error::MalformedFrame(format!("{e}: {}", preview(data))))?;

    let ty = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| Error::MalformedFrame(format!("missing type: {}", preview(data))))?;

    match ty {
        "done" => Ok(StreamFrame::Done),
        "keepalive" => Ok(StreamFrame::Keepalive),
        ty if ChatMessage::is_wire_type(ty) => {
            let ty = ty.to_string();
            serde_json::from_value(value)
                .map(StreamFrame::Message)
                .map_err(|e| Error::MalformedFrame(format!("bad {ty} frame: {e}")))
        }
        other => Ok(StreamFrame::Unknown(other.to_string())),
    }
}

fn preview(data: &str) -> String {
    const MAX: usize = 120;
    match data.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &data[..idx]),
        None => data.to_string(),
    }
}

/// A stream of decoded chat messages for one send.
///
/// Lazy, finite and not restartable. At most one `Err` is yielded, as the last
/// item.
pub type ChatEventStream = Pin<Box<dyn Stream<Item = Result<ChatMessage>> + Send>>;
