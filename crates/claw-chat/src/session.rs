//! Consumer-facing chat API: a client shared across views and a session bound
//! to one conversation.

use std::sync::Arc;

use claw_client::{ChatMessage, ChatTransport};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::controller::{StreamController, StreamTask};
use crate::error::Result;
use crate::events::StoreEvent;
use crate::history::{HistoryOutcome, HistoryReconciler};
use crate::store::ConversationStore;

/// Shared chat state for a process. Cloning is cheap.
#[derive(Clone)]
pub struct ChatClient {
    store: Arc<ConversationStore>,
    controller: StreamController,
    history: Arc<HistoryReconciler>,
    transport: Arc<dyn ChatTransport>,
}

impl ChatClient {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        let store = Arc::new(ConversationStore::new());
        Self {
            controller: StreamController::new(Arc::clone(&store), Arc::clone(&transport)),
            history: Arc::new(HistoryReconciler::new(
                Arc::clone(&store),
                Arc::clone(&transport),
            )),
            store,
            transport,
        }
    }

    /// Open a session on a conversation. Must be called within a Tokio runtime.
    pub fn session(&self, conversation_id: impl Into<String>) -> ChatSession {
        let conversation_id = conversation_id.into();
        let history_task = Some(self.spawn_history(&conversation_id));
        ChatSession {
            client: self.clone(),
            conversation_id,
            history_task,
        }
    }

    fn spawn_history(&self, conversation_id: &str) -> JoinHandle<HistoryOutcome> {
        let history = Arc::clone(&self.history);
        let conversation_id = conversation_id.to_string();
        tokio::spawn(async move { history.ensure_loaded(&conversation_id).await })
    }

    /// Subscribe to changes across all conversations
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    /// Snapshot of any conversation's messages
    pub fn messages(&self, conversation_id: &str) -> Arc<Vec<ChatMessage>> {
        self.store.messages(conversation_id)
    }

    /// Whether a conversation is streaming, whether or not a session is open on it
    pub fn is_streaming(&self, conversation_id: &str) -> bool {
        self.store.is_streaming(conversation_id)
    }

    pub fn streaming_ids(&self) -> Vec<String> {
        self.store.streaming_ids()
    }

    /// Cancel every active stream (shutdown)
    pub fn cancel_all(&self) {
        self.controller.cancel_all();
    }
}

/// A view onto one conversation.
///
/// Dropping the session cancels the conversation's active stream. Keep one
/// session per conversation on screen.
pub struct ChatSession {
    client: ChatClient,
    conversation_id: String,
    history_task: Option<JoinHandle<HistoryOutcome>>,
}

impl ChatSession {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Snapshot of the conversation's messages
    pub fn messages(&self) -> Arc<Vec<ChatMessage>> {
        self.client.store.messages(&self.conversation_id)
    }

    pub fn is_streaming(&self) -> bool {
        self.client.store.is_streaming(&self.conversation_id)
    }

    /// Send a message. The reply streams into the log; failures show up there
    /// as an error message rather than here.
    pub fn send_message(&self, text: &str) -> Result<StreamTask> {
        self.client.controller.send(&self.conversation_id, text)
    }

    /// Clear the conversation locally and on the service.
    ///
    /// The local log is gone before the remote request is made, and stays gone
    /// if that request fails.
    pub async fn clear_history(&self) {
        let conversation_id = self.conversation_id.as_str();
        self.client.controller.cancel_if_active(conversation_id);
        self.client.store.set_streaming(conversation_id, false);
        self.client.history.settle(conversation_id);
        self.client.store.clear(conversation_id);

        if let Err(e) = self.client.transport.clear(conversation_id).await {
            tracing::warn!(conversation_id, "Failed to clear remote history: {}", e);
        }
    }

    /// Move this session to another conversation, cancelling the current
    /// conversation's stream
    pub fn switch_to(&mut self, conversation_id: impl Into<String>) {
        let conversation_id = conversation_id.into();
        if conversation_id == self.conversation_id {
            return;
        }
        self.client.controller.cancel_if_active(&self.conversation_id);
        self.history_task = Some(self.client.spawn_history(&conversation_id));
        self.conversation_id = conversation_id;
    }

    /// Wait for the history load started by the last open or switch
    pub async fn wait_for_history(&mut self) -> Option<HistoryOutcome> {
        let task = self.history_task.take()?;
        task.await.ok()
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.client.controller.cancel_if_active(&self.conversation_id);
    }
}
