//! Seeds empty conversation logs from persisted history.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use claw_client::ChatTransport;
use parking_lot::Mutex;

use crate::store::ConversationStore;

/// Result of a reconciliation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryOutcome {
    /// History was written into the store
    Seeded(usize),
    /// Nothing fetched, or the result was not written (a log appeared first,
    /// another caller owns the fetch, or the fetch was discarded)
    Skipped,
    /// The service has no history for this conversation
    Empty,
    /// The fetch failed; the conversation starts empty
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    Pending(u64),
    Settled,
}

/// Fetches history once per conversation and seeds the store with it
pub struct HistoryReconciler {
    store: Arc<ConversationStore>,
    transport: Arc<dyn ChatTransport>,
    claims: Mutex<HashMap<String, Claim>>,
    next_ticket: AtomicU64,
}

impl HistoryReconciler {
    pub fn new(store: Arc<ConversationStore>, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            store,
            transport,
            claims: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Load persisted history if the conversation has no local log yet.
    ///
    /// Errors are logged and swallowed. A failed fetch may be retried by a
    /// later call; a successful one is never repeated.
    pub async fn ensure_loaded(&self, conversation_id: &str) -> HistoryOutcome {
        if self.store.has_log(conversation_id) {
            return HistoryOutcome::Skipped;
        }

        let ticket = {
            let mut claims = self.claims.lock();
            if claims.contains_key(conversation_id) {
                return HistoryOutcome::Skipped;
            }
            let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
            claims.insert(conversation_id.to_string(), Claim::Pending(ticket));
            ticket
        };

        let result = self.transport.history(conversation_id).await;

        let mut claims = self.claims.lock();
        if claims.get(conversation_id) != Some(&Claim::Pending(ticket)) {
            tracing::debug!(conversation_id, "history fetch discarded");
            return HistoryOutcome::Skipped;
        }

        match result {
            Ok(messages) if messages.is_empty() => {
                claims.insert(conversation_id.to_string(), Claim::Settled);
                HistoryOutcome::Empty
            }
            Ok(messages) => {
                claims.insert(conversation_id.to_string(), Claim::Settled);
                let count = messages.len();
                if self.store.seed(conversation_id, messages) {
                    tracing::debug!(conversation_id, count, "seeded history");
                    HistoryOutcome::Seeded(count)
                } else {
                    HistoryOutcome::Skipped
                }
            }
            Err(e) => {
                claims.remove(conversation_id);
                tracing::debug!(conversation_id, "history fetch failed: {}", e);
                HistoryOutcome::Failed
            }
        }
    }

    /// Drop the result of any in-flight fetch and stop future fetches for the
    /// conversation. Used when its history is cleared.
    pub fn settle(&self, conversation_id: &str) {
        self.claims
            .lock()
            .insert(conversation_id.to_string(), Claim::Settled);
    }
}
