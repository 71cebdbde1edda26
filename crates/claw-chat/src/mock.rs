//! Scripted transport for tests

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use claw_client::{ChatEventStream, ChatMessage, ChatTransport, Error, Result};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// What the next `stream` call does
pub(crate) enum Script {
    /// Yield these items, then end
    Events(Vec<Result<ChatMessage>>),
    /// Yield whatever the test sends, end when the sender is dropped
    Channel(mpsc::UnboundedReceiver<Result<ChatMessage>>),
    /// Fail before streaming
    OpenError(Error),
}

/// What a `history` call returns
pub(crate) enum HistoryScript {
    Ready(Result<Vec<ChatMessage>>),
    /// Wait for the test to release it
    Gated(oneshot::Receiver<Result<Vec<ChatMessage>>>),
}

#[derive(Default)]
pub(crate) struct MockTransport {
    scripts: Mutex<VecDeque<Script>>,
    history: Mutex<HashMap<String, HistoryScript>>,
    pub sent: Mutex<Vec<(String, String)>>,
    pub cleared: Mutex<Vec<String>>,
    pub history_calls: AtomicUsize,
    pub fail_clear: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().push_back(script);
    }

    /// Queue a stream the test drives through the returned sender
    pub fn push_channel(&self) -> mpsc::UnboundedSender<Result<ChatMessage>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(Script::Channel(rx));
        tx
    }

    pub fn set_history(&self, conversation_id: &str, script: HistoryScript) {
        self.history
            .lock()
            .insert(conversation_id.to_string(), script);
    }

    /// Gate the history for a conversation; the sender releases it
    pub fn gate_history(&self, conversation_id: &str) -> oneshot::Sender<Result<Vec<ChatMessage>>> {
        let (tx, rx) = oneshot::channel();
        self.set_history(conversation_id, HistoryScript::Gated(rx));
        tx
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn stream(
        &self,
        conversation_id: &str,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<ChatEventStream> {
        self.sent
            .lock()
            .push((conversation_id.to_string(), text.to_string()));

        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or(Script::Events(Vec::new()));

        match script {
            Script::OpenError(e) => Err(e),
            Script::Events(items) => Ok(Box::pin(futures::stream::iter(items))),
            Script::Channel(mut rx) => Ok(Box::pin(async_stream::stream! {
                loop {
                    let item = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        item = rx.recv() => item,
                    };
                    match item {
                        Some(item) => yield item,
                        None => break,
                    }
                }
            })),
        }
    }

    async fn history(&self, conversation_id: &str) -> Result<Vec<ChatMessage>> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.history.lock().remove(conversation_id);
        match script {
            None => Ok(Vec::new()),
            Some(HistoryScript::Ready(result)) => result,
            Some(HistoryScript::Gated(rx)) => rx
                .await
                .unwrap_or_else(|_| Err(Error::Sse("gate dropped".into()))),
        }
    }

    async fn clear(&self, conversation_id: &str) -> Result<()> {
        self.cleared.lock().push(conversation_id.to_string());
        if self.fail_clear.load(Ordering::SeqCst) {
            return Err(Error::from_status(502, "Failed to clear chat on agent VM"));
        }
        Ok(())
    }
}

/// Poll `cond` until it holds, panicking after a second
pub(crate) async fn wait_until(mut cond: impl FnMut() -> bool) {
    let result = tokio::time::timeout(Duration::from_secs(1), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "condition not reached in time");
}
