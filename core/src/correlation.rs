use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use crate::message::Message;
use crate::{CourierError, Result};

/// A pending request waiting for its correlated reply.
///
/// The slot fires at most once; whichever terminal transition removes the
/// entry from the table gets to consume it.
pub struct CorrelationEntry {
    slot: oneshot::Sender<Result<Message>>,
    pub created_at: Instant,
}

/// Tracks in-flight request/reply exchanges by correlation id.
///
/// Every id is a fresh UUID v4, generated on `register` and never reused
/// while its entry is pending. `complete`, `fail` and `expire` are terminal:
/// each removes the entry, and removal is atomic, so among concurrent
/// completion attempts exactly one succeeds and the rest return `false`.
/// That is what guarantees a waiting caller sees at most one outcome even if
/// the broker redelivers a reply.
///
/// The table never grows beyond the number of currently in-flight requests:
/// there is no terminal state that leaves an entry behind.
#[derive(Default)]
pub struct CorrelationTable {
    pending: DashMap<String, CorrelationEntry>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh pending entry. Returns the correlation id together
    /// with the receiving half of the reply slot; the caller suspends on the
    /// receiver while the table keeps the sender.
    pub fn register(&self) -> (String, oneshot::Receiver<Result<Message>>) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id.clone(),
            CorrelationEntry {
                slot: tx,
                created_at: Instant::now(),
            },
        );
        (id, rx)
    }

    /// Deliver a reply to the waiter. Returns false when the entry is gone
    /// (already completed, failed or expired); a late reply is an expected
    /// race, not a defect, so it is only logged.
    pub fn complete(&self, id: &str, message: Message) -> bool {
        match self.pending.remove(id) {
            Some((_, entry)) => {
                // The waiter may have gone away between removal and send;
                // the drop guard on its side already cleaned up.
                let _ = entry.slot.send(Ok(message));
                true
            }
            None => {
                debug!(correlation_id = %id, "Dropping reply with no pending entry");
                false
            }
        }
    }

    /// Fail the waiter with a transport-level error.
    pub fn fail(&self, id: &str, error: CourierError) -> bool {
        match self.pending.remove(id) {
            Some((_, entry)) => {
                let _ = entry.slot.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Remove an entry whose wait has ended without a reply. The slot is
    /// dropped unfired; the waiter's own timer reports the timeout.
    pub fn expire(&self, id: &str) -> bool {
        self.take(id).is_some()
    }

    /// Remove and return an entry without firing its slot. Cleanup path for
    /// publish failures and caller-side cancellation.
    pub fn take(&self, id: &str) -> Option<CorrelationEntry> {
        self.pending.remove(id).map(|(_, entry)| entry)
    }

    /// Fail every pending entry. Used when the reply subscription itself
    /// dies so no waiter blocks until its timeout on a dead connection.
    pub fn fail_all(&self, reason: &str) -> usize {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0;
        for id in ids {
            if self.fail(&id, CourierError::Transport(reason.to_string())) {
                failed += 1;
            }
        }
        failed
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
