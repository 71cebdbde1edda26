//! Conversation store: per-conversation message logs and streaming state.
//!
//! State lives behind a single lock as an `Arc` snapshot. Writers go through
//! `Arc::make_mut`, so a snapshot handed to a reader is never modified; the
//! next write copies whatever is still shared.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use claw_client::ChatMessage;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::events::StoreEvent;

#[derive(Clone, Default)]
struct Log {
    messages: Arc<Vec<ChatMessage>>,
    updated_at: i64,
}

#[derive(Clone, Default)]
struct StoreState {
    logs: HashMap<String, Log>,
    streaming: HashSet<String>,
}

/// In-memory message logs keyed by conversation id
pub struct ConversationStore {
    state: RwLock<Arc<StoreState>>,
    event_tx: broadcast::Sender<StoreEvent>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            state: RwLock::new(Arc::new(StoreState::default())),
            event_tx,
        }
    }

    /// Subscribe to store events
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.event_tx.subscribe()
    }

    /// Run one mutation under the write lock. Events are sent before the lock
    /// is released so subscribers see them in mutation order.
    fn mutate<R>(&self, f: impl FnOnce(&mut StoreState) -> (R, Option<StoreEvent>)) -> R {
        let mut guard = self.state.write();
        let (result, event) = f(Arc::make_mut(&mut *guard));
        if let Some(event) = event {
            let _ = self.event_tx.send(event);
        }
        result
    }

    fn snapshot(&self) -> Arc<StoreState> {
        Arc::clone(&*self.state.read())
    }

    /// Append a message, creating the log if needed
    pub fn append(&self, conversation_id: &str, message: ChatMessage) {
        self.mutate(|state| {
            let log = state.logs.entry(conversation_id.to_string()).or_default();
            Arc::make_mut(&mut log.messages).push(message.clone());
            log.updated_at = chrono::Utc::now().timestamp_millis();
            (
                (),
                Some(StoreEvent::Appended {
                    conversation_id: conversation_id.to_string(),
                    message,
                }),
            )
        })
    }

    /// Create the log from `messages` if none exists at this moment.
    ///
    /// Returns `false` (and changes nothing) when a log already exists or
    /// `messages` is empty.
    pub fn seed(&self, conversation_id: &str, messages: Vec<ChatMessage>) -> bool {
        if messages.is_empty() {
            return false;
        }
        self.mutate(|state| {
            if state.logs.contains_key(conversation_id) {
                tracing::debug!(conversation_id, "log already present, not seeding");
                return (false, None);
            }
            let count = messages.len();
            state.logs.insert(
                conversation_id.to_string(),
                Log {
                    messages: Arc::new(messages),
                    updated_at: chrono::Utc::now().timestamp_millis(),
                },
            );
            (
                true,
                Some(StoreEvent::Seeded {
                    conversation_id: conversation_id.to_string(),
                    count,
                }),
            )
        })
    }

    /// Mark or unmark a conversation as streaming. Returns whether it changed.
    pub fn set_streaming(&self, conversation_id: &str, streaming: bool) -> bool {
        self.mutate(|state| {
            let changed = if streaming {
                state.streaming.insert(conversation_id.to_string())
            } else {
                state.streaming.remove(conversation_id)
            };
            let event = changed.then(|| StoreEvent::StreamingChanged {
                conversation_id: conversation_id.to_string(),
                streaming,
            });
            (changed, event)
        })
    }

    /// Remove a log. Returns whether there was one.
    pub fn clear(&self, conversation_id: &str) -> bool {
        self.mutate(|state| {
            let removed = state.logs.remove(conversation_id).is_some();
            let event = removed.then(|| StoreEvent::Cleared {
                conversation_id: conversation_id.to_string(),
            });
            (removed, event)
        })
    }

    /// Snapshot of a log; empty if there is none. Later writes never change it.
    pub fn messages(&self, conversation_id: &str) -> Arc<Vec<ChatMessage>> {
        self.snapshot()
            .logs
            .get(conversation_id)
            .map(|log| Arc::clone(&log.messages))
            .unwrap_or_default()
    }

    /// Whether a log exists (it may have been seeded or appended to)
    pub fn has_log(&self, conversation_id: &str) -> bool {
        self.state.read().logs.contains_key(conversation_id)
    }

    pub fn is_streaming(&self, conversation_id: &str) -> bool {
        self.state.read().streaming.contains(conversation_id)
    }

    /// All conversations currently streaming, sorted
    pub fn streaming_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.read().streaming.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// All conversations with a log, sorted
    pub fn conversation_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.read().logs.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Unix millis of the last change to a log
    pub fn updated_at(&self, conversation_id: &str) -> Option<i64> {
        self.state
            .read()
            .logs
            .get(conversation_id)
            .map(|log| log.updated_at)
    }
}
