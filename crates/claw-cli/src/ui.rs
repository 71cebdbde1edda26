//! Plain-text rendering of conversation entries

use claw_client::{ChatMessage, Speaker};

pub fn truncate_chars(s: &str, max: usize) -> String {
    let mut chars = s.chars();
    let truncated: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

/// One line (or block) of terminal output for a log entry
pub fn render_message(message: &ChatMessage) -> String {
    match message {
        ChatMessage::Text {
            content,
            name: Speaker::User,
        } => format!("you> {}", content),
        ChatMessage::Text { content, .. } => content.clone(),
        ChatMessage::ToolUse { name, input, .. } => {
            let input = truncate_chars(&input.to_string(), 200);
            format!("[Running {}: {}]", name, input)
        }
        ChatMessage::ToolResult { content, .. } => {
            let content = match content {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("[Result: {}]", truncate_chars(&content, 200))
        }
        ChatMessage::File { path, caption } => match caption {
            Some(caption) => format!("[File: {} ({})]", path, caption),
            None => format!("[File: {}]", path),
        },
        ChatMessage::Error { content } => format!("Error: {}", content),
    }
}

/// The reply to a message sent when the log had `start` entries: everything
/// after the echo at `start`
pub fn reply_after(messages: &[ChatMessage], start: usize) -> &[ChatMessage] {
    messages.get(start + 1..).unwrap_or_default()
}

pub fn print_log(messages: &[ChatMessage]) {
    if messages.is_empty() {
        println!("(no messages)");
        return;
    }
    for message in messages {
        println!("{}", render_message(message));
    }
}
