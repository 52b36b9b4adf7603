// Request/reply coordination over a publish/consume transport
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::correlation::CorrelationTable;
use crate::message::{Destination, Message};
use crate::registry::ConnectionHandle;
use crate::sender::{MessagePostProcessor, MessageSender};
use crate::transport::Transport;
use crate::{CourierError, Result};

/// Removes the correlation entry when a waiter goes away without observing
/// an outcome, so a cancelled caller never leaks an entry the listener
/// would hold forever. A no-op when a terminal transition already removed
/// the entry.
struct CorrelationGuard {
    table: Arc<CorrelationTable>,
    id: String,
}

impl Drop for CorrelationGuard {
    fn drop(&mut self) {
        if self.table.take(&self.id).is_some() {
            debug!(correlation_id = %self.id, "Removed correlation entry for abandoned request");
        }
    }
}

/// Turns fire-and-forget publishing into a blocking call with a bounded
/// wait: register a correlation entry, stamp the outgoing message, publish,
/// then suspend until the correlated reply arrives, the timeout elapses, or
/// the reply subscription dies. Exactly one of those outcomes reaches the
/// caller; the single-fire slots in [`CorrelationTable`] make the others
/// no-ops.
pub struct RequestReplyCoordinator {
    sender: MessageSender,
    table: Arc<CorrelationTable>,
    reply_queue: String,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl RequestReplyCoordinator {
    pub fn new(transport: Arc<dyn Transport>, reply_queue: impl Into<String>) -> Self {
        Self {
            sender: MessageSender::new(transport),
            table: Arc::new(CorrelationTable::new()),
            reply_queue: reply_queue.into(),
            listener: Mutex::new(None),
        }
    }

    /// Subscribe to the reply queue and spawn the drain task. Inbound
    /// messages complete their pending entry by correlation id; unmatched or
    /// id-less messages are dropped with a log, never an error, so one bad
    /// message cannot kill the listener. When the subscription stream ends,
    /// every pending waiter is failed rather than left to its timeout.
    pub async fn start(&self) -> Result<()> {
        let mut listener = self.listener.lock().await;
        if listener.is_some() {
            return Ok(());
        }

        let mut rx = self.sender.transport().subscribe(&self.reply_queue).await?;
        let table = Arc::clone(&self.table);
        let reply_queue = self.reply_queue.clone();
        let handle = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message.properties.correlation_id.clone() {
                    Some(id) => {
                        table.complete(&id, message);
                    }
                    None => {
                        debug!(queue = %reply_queue, "Dropping reply without correlation id");
                    }
                }
            }
            let failed = table.fail_all("reply subscription closed");
            if failed > 0 {
                warn!(queue = %reply_queue, failed, "Reply subscription closed with pending requests");
            }
        });
        *listener = Some(handle);
        info!(queue = %self.reply_queue, "Reply listener started");
        Ok(())
    }

    pub async fn shutdown(&self) {
        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
        }
        let failed = self.table.fail_all("coordinator shut down");
        if failed > 0 {
            warn!(failed, "Shut down with pending requests");
        }
        info!(queue = %self.reply_queue, "Reply listener stopped");
    }

    /// Send a request and wait for its correlated reply.
    ///
    /// A publish failure removes the correlation entry and returns before
    /// any wait is entered. A timeout expires the entry and returns
    /// [`CourierError::ReplyTimeout`]. Dropping the returned future runs the
    /// same cleanup as a timeout.
    pub async fn send_and_receive(
        &self,
        connection: &ConnectionHandle,
        destination: &Destination,
        message: Message,
        wait: Duration,
        post_processor: Option<&dyn MessagePostProcessor>,
    ) -> Result<Message> {
        if self.listener.lock().await.is_none() {
            return Err(CourierError::Transport(
                "reply listener not running, call start() first".into(),
            ));
        }

        let (id, reply_rx) = self.table.register();
        let guard = CorrelationGuard {
            table: Arc::clone(&self.table),
            id: id.clone(),
        };

        let message = message
            .with_correlation_id(id.clone())
            .with_reply_to(self.reply_queue.clone());

        if let Err(err) = self
            .sender
            .send(connection, destination, message, post_processor)
            .await
        {
            // guard removes the entry before the error surfaces
            drop(guard);
            return Err(err);
        }

        match timeout(wait, reply_rx).await {
            Ok(Ok(outcome)) => outcome,
            // Slot dropped without firing: the entry was expired or taken
            // out from under us, which the waiter observes as a timeout.
            Ok(Err(_)) => Err(CourierError::ReplyTimeout(wait)),
            Err(_) => {
                self.table.expire(&id);
                debug!(correlation_id = %id, ?wait, "Request timed out");
                Err(CourierError::ReplyTimeout(wait))
            }
        }
    }

    pub fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    /// Number of requests currently awaiting a reply.
    pub fn pending_requests(&self) -> usize {
        self.table.len()
    }
}
