use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Broker-level metadata riding alongside the payload.
///
/// `correlation_id` and `reply_to` carry the request/reply contract: a
/// requester stamps both before publishing, a responder copies the
/// correlation id onto its answer and publishes it to the `reply_to` queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageProperties {
    /// MIME type of the payload (e.g. `application/json`).
    pub content_type: Option<String>,
    /// Unique token linking a request to its eventual reply.
    pub correlation_id: Option<String>,
    /// Queue the responder should publish its answer to.
    pub reply_to: Option<String>,
    /// Creation timestamp in milliseconds since epoch.
    pub timestamp_ms: i64,
}

/// A message as handed to the transport: string headers, opaque payload
/// bytes, and broker properties. Immutable once published; the fluent
/// `with_*` builders are for assembly before the send.
///
/// # Examples
///
/// ```
/// use courier_core::Message;
///
/// let msg = Message::new(b"ping".to_vec())
///     .with_header("tenant", "acme")
///     .with_content_type("application/octet-stream");
/// assert_eq!(msg.payload, b"ping");
/// assert_eq!(msg.headers.get("tenant"), Some(&"acme".to_string()));
/// assert!(msg.properties.correlation_id.is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub headers: HashMap<String, String>,
    pub payload: Vec<u8>,
    pub properties: MessageProperties,
}

impl Message {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            headers: HashMap::new(),
            payload,
            properties: MessageProperties {
                timestamp_ms: chrono::Utc::now().timestamp_millis(),
                ..Default::default()
            },
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: &HashMap<String, String>) -> Self {
        self.headers
            .extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.properties.content_type = Some(content_type.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.properties.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.properties.reply_to = Some(reply_to.into());
        self
    }
}

/// Where a message is published: an exchange plus a routing key.
///
/// An empty exchange means the broker's default exchange, which routes
/// directly to the queue named by the routing key.
///
/// # Examples
///
/// ```
/// use courier_core::Destination;
///
/// let dest = Destination::new("orders", "order.created");
/// assert_eq!(dest.exchange, "orders");
///
/// let direct = Destination::queue("work.items");
/// assert!(direct.exchange.is_empty());
/// assert_eq!(direct.routing_key, "work.items");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub exchange: String,
    pub routing_key: String,
}

impl Destination {
    pub fn new(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }

    /// Destination addressing a queue directly through the default exchange.
    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            exchange: String::new(),
            routing_key: name.into(),
        }
    }

    pub fn is_unspecified(&self) -> bool {
        self.exchange.is_empty() && self.routing_key.is_empty()
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.exchange, self.routing_key)
    }
}
