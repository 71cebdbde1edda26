//! claw-chat: Conversation state and streaming for agent chats
//!
//! This crate keeps per-conversation message logs, drives one reply stream
//! per conversation, and seeds logs from persisted history. UIs talk to it
//! through [`ChatClient`] and [`ChatSession`].

pub mod controller;
pub mod error;
pub mod events;
pub mod history;
pub mod session;
pub mod store;

#[cfg(test)]
mod mock;

pub use controller::{MAX_MESSAGE_CHARS, StreamController, StreamOutcome, StreamTask};
pub use error::{Error, Result};
pub use events::StoreEvent;
pub use history::{HistoryOutcome, HistoryReconciler};
pub use session::{ChatClient, ChatSession};
pub use store::ConversationStore;
