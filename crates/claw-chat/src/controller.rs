//! Stream controller: one live transport request per conversation.
//!
//! Each send gets a generation number. A stream task only touches the store
//! while holding the handle lock and only if its generation is still the live
//! handle for its conversation, so a superseded stream can never append after
//! the newer send's echo or clear the newer stream's marker.

use std::collections::HashMap;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use claw_client::{ChatMessage, ChatTransport};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::store::ConversationStore;

/// Longest message the service accepts, in characters
pub const MAX_MESSAGE_CHARS: usize = 32_000;

/// How a stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The reply ended normally
    Completed,
    /// Superseded or cancelled; nothing was reported
    Aborted,
    /// The transport failed; the message was appended to the log
    Errored(String),
}

/// A running stream, awaitable for its outcome
pub struct StreamTask {
    conversation_id: String,
    generation: u64,
    join: JoinHandle<StreamOutcome>,
}

impl StreamTask {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Identifies this send among all sends made by the controller
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the stream to end
    pub async fn wait(self) -> StreamOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => StreamOutcome::Aborted,
            Err(e) => StreamOutcome::Errored(e.to_string()),
        }
    }
}

struct StreamHandle {
    generation: u64,
    cancel: CancellationToken,
}

struct ControllerInner {
    store: Arc<ConversationStore>,
    transport: Arc<dyn ChatTransport>,
    handles: Mutex<HashMap<String, StreamHandle>>,
    next_generation: AtomicU64,
}

/// Owns the in-flight stream for each conversation. Cloning is cheap.
#[derive(Clone)]
pub struct StreamController {
    inner: Arc<ControllerInner>,
}

impl StreamController {
    pub fn new(store: Arc<ConversationStore>, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                store,
                transport,
                handles: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Send `text` to a conversation and stream the reply into the store.
    ///
    /// Any stream already running for the conversation is cancelled first. The
    /// user's message is in the log and the conversation is marked streaming
    /// by the time this returns. Must be called within a Tokio runtime.
    pub fn send(&self, conversation_id: &str, text: &str) -> Result<StreamTask> {
        validate_message(text)?;

        let inner = &self.inner;
        let generation = inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        {
            let mut handles = inner.handles.lock();
            if let Some(previous) = handles.remove(conversation_id) {
                tracing::debug!(
                    conversation_id,
                    superseded = previous.generation,
                    "superseding active stream"
                );
                previous.cancel.cancel();
                inner.store.set_streaming(conversation_id, false);
            }
            inner.store.append(conversation_id, ChatMessage::user(text));
            inner.store.set_streaming(conversation_id, true);
            handles.insert(
                conversation_id.to_string(),
                StreamHandle {
                    generation,
                    cancel: cancel.clone(),
                },
            );
        }

        let join = tokio::spawn(Arc::clone(inner).run(
            conversation_id.to_string(),
            text.to_string(),
            generation,
            cancel,
        ));

        Ok(StreamTask {
            conversation_id: conversation_id.to_string(),
            generation,
            join,
        })
    }

    /// Cancel the conversation's stream, if any. Only the streaming marker is
    /// touched; nothing is appended. Returns whether a stream was cancelled.
    pub fn cancel_if_active(&self, conversation_id: &str) -> bool {
        let mut handles = self.inner.handles.lock();
        match handles.remove(conversation_id) {
            Some(handle) => {
                tracing::debug!(conversation_id, generation = handle.generation, "cancelling stream");
                handle.cancel.cancel();
                self.inner.store.set_streaming(conversation_id, false);
                true
            }
            None => false,
        }
    }

    /// Cancel every active stream
    pub fn cancel_all(&self) {
        let mut handles = self.inner.handles.lock();
        for (conversation_id, handle) in handles.drain() {
            handle.cancel.cancel();
            self.inner.store.set_streaming(&conversation_id, false);
        }
    }

    /// Whether the conversation has a live stream
    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.inner.handles.lock().contains_key(conversation_id)
    }

    /// Number of conversations with a live stream
    pub fn active_count(&self) -> usize {
        self.inner.handles.lock().len()
    }
}

fn validate_message(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(Error::EmptyMessage);
    }
    let len = text.chars().count();
    if len > MAX_MESSAGE_CHARS {
        return Err(Error::MessageTooLong {
            len,
            max: MAX_MESSAGE_CHARS,
        });
    }
    Ok(())
}

impl ControllerInner {
    fn owns(handles: &HashMap<String, StreamHandle>, conversation_id: &str, generation: u64) -> bool {
        handles
            .get(conversation_id)
            .is_some_and(|h| h.generation == generation)
    }

    /// Append if this generation is still live. Returns `false` if superseded.
    fn append_if_current(&self, conversation_id: &str, generation: u64, message: ChatMessage) -> bool {
        let handles = self.handles.lock();
        if !Self::owns(&handles, conversation_id, generation) {
            return false;
        }
        self.store.append(conversation_id, message);
        true
    }

    /// Retire the handle, recording `error` in the log if there was one
    fn finish(
        &self,
        conversation_id: &str,
        generation: u64,
        error: Option<claw_client::Error>,
    ) -> StreamOutcome {
        let mut handles = self.handles.lock();
        if !Self::owns(&handles, conversation_id, generation) {
            return StreamOutcome::Aborted;
        }
        handles.remove(conversation_id);

        let outcome = match error {
            Some(e) => {
                let message = e.to_string();
                tracing::debug!(conversation_id, generation, "stream failed: {}", message);
                self.store
                    .append(conversation_id, ChatMessage::error(message.clone()));
                StreamOutcome::Errored(message)
            }
            None => {
                tracing::debug!(conversation_id, generation, "stream completed");
                StreamOutcome::Completed
            }
        };
        self.store.set_streaming(conversation_id, false);
        outcome
    }

    async fn run(
        self: Arc<Self>,
        conversation_id: String,
        text: String,
        generation: u64,
        cancel: CancellationToken,
    ) -> StreamOutcome {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.transport.stream(&conversation_id, &text, cancel.clone()) => Some(result),
        };
        let mut stream = match opened {
            None => return StreamOutcome::Aborted,
            Some(Ok(stream)) => stream,
            Some(Err(e)) => return self.finish(&conversation_id, generation, Some(e)),
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                item = stream.next() => Some(item),
            };
            match next {
                None => return StreamOutcome::Aborted,
                Some(Some(Ok(message))) => {
                    if !self.append_if_current(&conversation_id, generation, message) {
                        return StreamOutcome::Aborted;
                    }
                }
                Some(Some(Err(e))) => return self.finish(&conversation_id, generation, Some(e)),
                Some(None) => return self.finish(&conversation_id, generation, None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockTransport, Script, wait_until};

    fn setup() -> (Arc<ConversationStore>, Arc<MockTransport>, StreamController) {
        let store = Arc::new(ConversationStore::new());
        let transport = MockTransport::new();
        let controller = StreamController::new(Arc::clone(&store), transport.clone());
        (store, transport, controller)
    }

    #[tokio::test]
    async fn test_events_follow_user_message_in_order() {
        let (store, transport, controller) = setup();
        transport.push(Script::Events(vec![
            Ok(ChatMessage::agent("one")),
            Ok(ChatMessage::ToolUse {
                id: Some("call_1".into()),
                name: "bash".into(),
                input: serde_json::json!({"command": "ls"}),
            }),
            Ok(ChatMessage::agent("two")),
        ]));

        let task = controller.send("a1", "go").unwrap();
        assert_eq!(task.wait().await, StreamOutcome::Completed);

        let messages = store.messages("a1");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], ChatMessage::user("go"));
        assert_eq!(messages[1], ChatMessage::agent("one"));
        assert_eq!(messages[2].kind(), "tool_use");
        assert_eq!(messages[3], ChatMessage::agent("two"));
        assert!(!store.is_streaming("a1"));
        assert!(!controller.is_active("a1"));
        assert_eq!(*transport.sent.lock(), vec![("a1".to_string(), "go".to_string())]);
    }

    #[tokio::test]
    async fn test_echo_and_marker_before_any_reply() {
        let (store, transport, controller) = setup();
        let tx = transport.push_channel();

        let task = controller.send("a1", "hi").unwrap();
        assert_eq!(*store.messages("a1"), vec![ChatMessage::user("hi")]);
        assert!(store.is_streaming("a1"));
        assert!(controller.is_active("a1"));

        tx.send(Ok(ChatMessage::agent("hello"))).unwrap();
        drop(tx);

        assert_eq!(task.wait().await, StreamOutcome::Completed);
        assert_eq!(
            *store.messages("a1"),
            vec![ChatMessage::user("hi"), ChatMessage::agent("hello")]
        );
        assert!(!store.is_streaming("a1"));
    }

    #[tokio::test]
    async fn test_resend_supersedes_without_error() {
        let (store, transport, controller) = setup();
        let first_tx = transport.push_channel();
        let second_tx = transport.push_channel();

        let first = controller.send("a1", "first").unwrap();
        first_tx.send(Ok(ChatMessage::agent("partial"))).unwrap();
        wait_until(|| store.messages("a1").len() == 2).await;

        let second = controller.send("a1", "again").unwrap();
        assert_eq!(controller.active_count(), 1);
        assert_eq!(first.wait().await, StreamOutcome::Aborted);

        // Late events from the superseded stream go nowhere
        let _ = first_tx.send(Ok(ChatMessage::agent("late")));
        drop(first_tx);

        // The stale completion must not clear the new stream's marker
        assert!(store.is_streaming("a1"));

        second_tx.send(Ok(ChatMessage::agent("fresh"))).unwrap();
        drop(second_tx);
        assert_eq!(second.wait().await, StreamOutcome::Completed);

        assert_eq!(
            *store.messages("a1"),
            vec![
                ChatMessage::user("first"),
                ChatMessage::agent("partial"),
                ChatMessage::user("again"),
                ChatMessage::agent("fresh"),
            ]
        );
        assert!(!store.messages("a1").iter().any(|m| m.is_error()));
        assert!(!store.is_streaming("a1"));
    }

    #[tokio::test]
    async fn test_open_failure_appends_one_error() {
        let (store, transport, controller) = setup();
        transport.push(Script::OpenError(claw_client::Error::Sse(
            "connection refused".into(),
        )));

        let task = controller.send("a1", "hi").unwrap();
        let outcome = task.wait().await;
        assert!(matches!(outcome, StreamOutcome::Errored(ref m) if m.contains("connection refused")));

        let messages = store.messages("a1");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], ChatMessage::user("hi"));
        assert!(messages[1].is_error());
        assert!(!store.is_streaming("a1"));
        assert!(!controller.is_active("a1"));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_keeps_received_messages() {
        let (store, transport, controller) = setup();
        transport.push(Script::Events(vec![
            Ok(ChatMessage::agent("partial answer")),
            Err(claw_client::Error::MalformedFrame("bad".into())),
        ]));

        let outcome = controller.send("a1", "hi").unwrap().wait().await;
        assert!(matches!(outcome, StreamOutcome::Errored(_)));

        let messages = store.messages("a1");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1], ChatMessage::agent("partial answer"));
        assert!(messages[2].is_error());
        assert_eq!(messages.iter().filter(|m| m.is_error()).count(), 1);
        assert!(!store.is_streaming("a1"));
    }

    #[tokio::test]
    async fn test_cut_off_reply_is_reported() {
        let (store, transport, controller) = setup();
        let tx = transport.push_channel();

        let task = controller.send("a1", "hi").unwrap();
        tx.send(Ok(ChatMessage::agent("partial rep"))).unwrap();
        tx.send(Err(claw_client::Error::Sse("stream ended before done".into())))
            .unwrap();
        drop(tx);

        let outcome = task.wait().await;
        assert!(matches!(outcome, StreamOutcome::Errored(ref m) if m.contains("before done")));

        let messages = store.messages("a1");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1], ChatMessage::agent("partial rep"));
        assert_eq!(messages.iter().filter(|m| m.is_error()).count(), 1);
        assert!(messages[2].is_error());
        assert!(!store.is_streaming("a1"));
        assert!(!controller.is_active("a1"));
    }

    #[tokio::test]
    async fn test_cancel_is_silent() {
        let (store, transport, controller) = setup();
        let tx = transport.push_channel();

        let task = controller.send("a1", "hi").unwrap();
        assert!(controller.cancel_if_active("a1"));
        assert!(!controller.cancel_if_active("a1"));
        assert!(!store.is_streaming("a1"));

        let _ = tx.send(Ok(ChatMessage::agent("too late")));
        assert_eq!(task.wait().await, StreamOutcome::Aborted);
        assert_eq!(*store.messages("a1"), vec![ChatMessage::user("hi")]);
    }

    #[tokio::test]
    async fn test_blank_message_rejected_without_side_effects() {
        let (store, transport, controller) = setup();
        assert!(matches!(controller.send("a1", "   \n"), Err(Error::EmptyMessage)));
        assert!(!store.has_log("a1"));
        assert!(!store.is_streaming("a1"));
        assert!(transport.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_overlong_message_rejected() {
        let (store, _transport, controller) = setup();
        let text = "x".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(matches!(
            controller.send("a1", &text),
            Err(Error::MessageTooLong { len, max }) if len == MAX_MESSAGE_CHARS + 1 && max == MAX_MESSAGE_CHARS
        ));
        assert!(!store.has_log("a1"));
    }

    #[tokio::test]
    async fn test_conversations_stream_independently() {
        let (store, transport, controller) = setup();
        let a_tx = transport.push_channel();
        let b_tx = transport.push_channel();

        let a = controller.send("a1", "to a").unwrap();
        let b = controller.send("b2", "to b").unwrap();
        assert_eq!(controller.active_count(), 2);
        assert_eq!(store.streaming_ids(), vec!["a1".to_string(), "b2".to_string()]);

        b_tx.send(Ok(ChatMessage::agent("from b"))).unwrap();
        drop(b_tx);
        assert_eq!(b.wait().await, StreamOutcome::Completed);
        assert!(store.is_streaming("a1"));
        assert!(!store.is_streaming("b2"));

        a_tx.send(Ok(ChatMessage::agent("from a"))).unwrap();
        drop(a_tx);
        assert_eq!(a.wait().await, StreamOutcome::Completed);

        assert_eq!(
            *store.messages("a1"),
            vec![ChatMessage::user("to a"), ChatMessage::agent("from a")]
        );
        assert_eq!(
            *store.messages("b2"),
            vec![ChatMessage::user("to b"), ChatMessage::agent("from b")]
        );
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let (store, transport, controller) = setup();
        let _a_tx = transport.push_channel();
        let _b_tx = transport.push_channel();

        let a = controller.send("a1", "x").unwrap();
        let b = controller.send("b2", "y").unwrap();
        controller.cancel_all();

        assert_eq!(controller.active_count(), 0);
        assert!(store.streaming_ids().is_empty());
        assert_eq!(a.wait().await, StreamOutcome::Aborted);
        assert_eq!(b.wait().await, StreamOutcome::Aborted);
    }

    #[tokio::test]
    async fn test_generations_increase() {
        let (_store, _transport, controller) = setup();
        let first = controller.send("a1", "x").unwrap();
        let second = controller.send("b2", "y").unwrap();
        assert!(second.generation() > first.generation());
        assert_eq!(first.conversation_id(), "a1");
    }
}
