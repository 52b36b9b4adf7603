// Transport abstraction and the in-process broker emulation
use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::message::Message;
use crate::registry::ConnectionHandle;
use crate::{CourierError, Result};

/// Broker transport as consumed by the core.
///
/// Connection establishment, channel pooling and topology management live
/// behind this trait; the core only publishes, subscribes and polls.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish one message. No retry at any layer above this one.
    async fn publish(
        &self,
        connection: &ConnectionHandle,
        exchange: &str,
        routing_key: &str,
        message: Message,
    ) -> Result<()>;

    /// Consume a queue as a lazy message stream. The stream ends when the
    /// underlying subscription dies; subscribing again restarts it.
    async fn subscribe(&self, queue: &str) -> Result<mpsc::Receiver<Message>>;

    /// Poll a single message off a queue, `None` when it is empty.
    async fn receive(&self, connection: &ConnectionHandle, queue: &str) -> Result<Option<Message>>;
}

/// Subscription information
struct Subscription {
    id: String,
    sender: mpsc::Sender<Message>,
}

#[derive(Default)]
struct QueueState {
    backlog: VecDeque<Message>,
    subscribers: Vec<Subscription>,
    closed: bool,
}

/// Per-queue delivery statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportStats {
    pub total_published: u64,
    pub total_delivered: u64,
    pub dropped_messages: u64,
    pub backlog_size: usize,
    pub active_subscriptions: usize,
}

/// In-process broker emulation: named queues with bounded buffering,
/// exchange bindings, and per-connection connectivity toggling.
///
/// This is the broker-less deployment mode and the transport the
/// integration tests run against. An empty exchange routes directly to the
/// queue named by the routing key; non-empty exchanges route through
/// explicit [`MemoryTransport::bind`] entries. Messages published to a
/// queue nobody consumes are buffered up to the queue capacity and handed
/// to the next subscriber.
pub struct MemoryTransport {
    queues: DashMap<String, QueueState>,
    // "exchange:routing_key" -> queue
    bindings: DashMap<String, String>,
    // connection ids currently unreachable
    down: DashMap<String, ()>,
    stats: DashMap<String, TransportStats>,
    queue_capacity: usize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self {
            queues: DashMap::new(),
            bindings: DashMap::new(),
            down: DashMap::new(),
            stats: DashMap::new(),
            queue_capacity,
        }
    }

    pub fn declare_queue(&self, name: &str) {
        self.queues.entry(name.to_string()).or_default();
    }

    /// Bind an exchange/routing-key pair to a queue, declaring the queue if
    /// needed. A later bind for the same pair replaces the previous one.
    pub fn bind(&self, exchange: &str, routing_key: &str, queue: &str) {
        self.declare_queue(queue);
        let key = format!("{exchange}:{routing_key}");
        info!(binding = %key, queue = %queue, "Binding exchange route");
        self.bindings.insert(key, queue.to_string());
    }

    /// Simulate a connection going down (publishes and polls on it fail) or
    /// coming back.
    pub fn set_connected(&self, connection_id: &str, connected: bool) {
        if connected {
            self.down.remove(connection_id);
        } else {
            warn!(connection = %connection_id, "Marking connection as down");
            self.down.insert(connection_id.to_string(), ());
        }
    }

    /// Tear down a queue's consumers; their streams end. Subscribing again
    /// reopens the queue.
    pub fn close_queue(&self, queue: &str) {
        if let Some(mut state) = self.queues.get_mut(queue) {
            info!(queue = %queue, subscribers = state.subscribers.len(), "Closing queue");
            state.subscribers.clear();
            state.closed = true;
        }
        self.update_stats(queue, |stats| {
            stats.active_subscriptions = 0;
        });
    }

    pub fn stats(&self, queue: &str) -> Option<TransportStats> {
        self.stats.get(queue).map(|s| s.clone())
    }

    fn route(&self, exchange: &str, routing_key: &str) -> Option<String> {
        if exchange.is_empty() {
            // default exchange: routing key names the queue
            return Some(routing_key.to_string());
        }
        self.bindings
            .get(&format!("{exchange}:{routing_key}"))
            .map(|q| q.clone())
    }

    fn check_connected(&self, connection: &ConnectionHandle) -> Result<()> {
        if self.down.contains_key(&connection.id) {
            return Err(CourierError::Transport(format!(
                "connection {} is down",
                connection.id
            )));
        }
        Ok(())
    }

    fn update_stats<F>(&self, queue: &str, f: F)
    where
        F: FnOnce(&mut TransportStats),
    {
        f(self
            .stats
            .entry(queue.to_string())
            .or_default()
            .value_mut());
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(
        &self,
        connection: &ConnectionHandle,
        exchange: &str,
        routing_key: &str,
        message: Message,
    ) -> Result<()> {
        self.check_connected(connection)?;

        let queue = match self.route(exchange, routing_key) {
            Some(queue) => queue,
            None => {
                warn!(exchange = %exchange, routing_key = %routing_key, "Unroutable message dropped");
                return Ok(());
            }
        };

        let mut state = match self.queues.get_mut(&queue) {
            Some(state) => state,
            None => {
                warn!(queue = %queue, "Publish to undeclared queue dropped");
                return Ok(());
            }
        };

        if state.closed {
            warn!(queue = %queue, "Publish to closed queue dropped");
            self.update_stats(&queue, |stats| stats.dropped_messages += 1);
            return Ok(());
        }

        debug!(queue = %queue, connection = %connection.id, "Publishing message");
        state.subscribers.retain(|s| !s.sender.is_closed());

        let mut pending = Some(message);
        for sub in &state.subscribers {
            let msg = match pending.take() {
                Some(msg) => msg,
                None => break,
            };
            match sub.sender.try_send(msg) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(msg))
                | Err(mpsc::error::TrySendError::Closed(msg)) => {
                    warn!(subscription = %sub.id, "Subscriber queue full, trying next");
                    pending = Some(msg);
                }
            }
        }

        let mut delivered = 0;
        let mut dropped = 0;
        match pending {
            None => delivered = 1,
            Some(msg) if state.subscribers.is_empty() => {
                if state.backlog.len() < self.queue_capacity {
                    state.backlog.push_back(msg);
                } else {
                    warn!(queue = %queue, "Queue backlog full, dropping message");
                    dropped = 1;
                }
            }
            Some(_) => {
                warn!(queue = %queue, "All subscribers full, dropping message");
                dropped = 1;
            }
        }

        let backlog_size = state.backlog.len();
        drop(state);
        self.update_stats(&queue, |stats| {
            stats.total_published += 1;
            stats.total_delivered += delivered;
            stats.dropped_messages += dropped;
            stats.backlog_size = backlog_size;
        });
        Ok(())
    }

    async fn subscribe(&self, queue: &str) -> Result<mpsc::Receiver<Message>> {
        let subscription_id = format!("sub_{}_{}", queue, Uuid::new_v4());
        let (tx, rx) = mpsc::channel(self.queue_capacity.max(1));

        let mut state = self.queues.entry(queue.to_string()).or_default();
        state.closed = false;

        // Hand buffered messages to the new subscriber before it goes live.
        let mut drained = 0u64;
        while let Some(msg) = state.backlog.pop_front() {
            match tx.try_send(msg) {
                Ok(()) => drained += 1,
                Err(mpsc::error::TrySendError::Full(msg))
                | Err(mpsc::error::TrySendError::Closed(msg)) => {
                    state.backlog.push_front(msg);
                    break;
                }
            }
        }

        state.subscribers.push(Subscription {
            id: subscription_id.clone(),
            sender: tx,
        });
        let active = state.subscribers.len();
        let backlog_size = state.backlog.len();
        drop(state);

        self.update_stats(queue, |stats| {
            stats.total_delivered += drained;
            stats.active_subscriptions = active;
            stats.backlog_size = backlog_size;
        });

        info!(subscription = %subscription_id, queue = %queue, "Created subscription");
        Ok(rx)
    }

    async fn receive(&self, connection: &ConnectionHandle, queue: &str) -> Result<Option<Message>> {
        self.check_connected(connection)?;

        let message = match self.queues.get_mut(queue) {
            Some(mut state) => state.backlog.pop_front(),
            None => None,
        };
        if message.is_some() {
            self.update_stats(queue, |stats| {
                stats.total_delivered += 1;
                stats.backlog_size = stats.backlog_size.saturating_sub(1);
            });
        }
        Ok(message)
    }
}
