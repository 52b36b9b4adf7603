use std::time::Duration;

use uuid::Uuid;

/// Runtime configuration for a [`crate::Courier`] instance.
///
/// Defaults read environment variables with fallbacks so a bare
/// `CourierConfig::default()` works out of the box in tests and demos.
#[derive(Clone, Debug)]
pub struct CourierConfig {
    /// Queue the reply listener consumes. Unique per process by default so
    /// concurrent instances never steal each other's replies.
    pub reply_queue: String,
    /// Upper bound on waiting for a correlated reply when the caller does
    /// not pass one per call.
    pub default_timeout: Duration,
    /// Bounded capacity of in-memory queues and subscription channels.
    pub queue_capacity: usize,
    /// Destination used when a send names neither exchange nor routing key.
    pub default_exchange: String,
    pub default_routing_key: String,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            reply_queue: std::env::var("COURIER_REPLY_QUEUE")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| format!("courier.reply.{}", Uuid::new_v4())),
            default_timeout: Duration::from_millis(
                std::env::var("COURIER_REPLY_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(30_000),
            ),
            queue_capacity: std::env::var("COURIER_QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(1024),
            default_exchange: std::env::var("COURIER_DEFAULT_EXCHANGE").unwrap_or_default(),
            default_routing_key: std::env::var("COURIER_DEFAULT_ROUTING_KEY").unwrap_or_default(),
        }
    }
}
