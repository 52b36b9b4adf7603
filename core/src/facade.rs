use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::CourierConfig;
use crate::convert::{JsonConverter, MessageConverter};
use crate::message::{Destination, Message};
use crate::registry::ConnectionRegistry;
use crate::router::ConnectionRouter;
use crate::rpc::RequestReplyCoordinator;
use crate::sender::{MessagePostProcessor, MessageSender};
use crate::transport::Transport;
use crate::{CourierError, Result};

/// Optional per-call parameters, collapsing what would otherwise be a
/// combinatorial set of method overloads.
///
/// `headers` apply on the convert paths (merged into the converted
/// message); `connection_key` scopes the call to a registered connection;
/// `timeout` overrides the configured reply bound on request/reply calls.
#[derive(Clone, Default)]
pub struct SendOptions {
    pub connection_key: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub post_processor: Option<Arc<dyn MessagePostProcessor>>,
    pub timeout: Option<Duration>,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route this call through the connection registered under `key`
    /// instead of the default connection.
    pub fn on_connection(mut self, key: impl Into<String>) -> Self {
        self.connection_key = Some(key.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn post_process(mut self, processor: Arc<dyn MessagePostProcessor>) -> Self {
        self.post_processor = Some(processor);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// The messaging facade: send, convert-and-send, and synchronous
/// request/reply over an asynchronous broker transport.
///
/// Every operation names an explicit exchange and routing key (empty
/// strings fall back to the configured default destination) and may be
/// scoped to a registered connection through [`SendOptions`].
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use courier_core::{
///     ConnectionHandle, ConnectionRegistry, Courier, CourierConfig, MemoryTransport, SendOptions,
/// };
///
/// # async fn example() -> courier_core::Result<()> {
/// let transport = Arc::new(MemoryTransport::new());
/// let registry = Arc::new(ConnectionRegistry::new(ConnectionHandle::new(
///     "main",
///     "amqp://localhost:5672",
/// )));
/// let courier = Courier::new(transport, registry, CourierConfig::default());
/// courier.start().await?;
///
/// courier
///     .convert_and_send("", "work.items", &"job-1", &SendOptions::new())
///     .await?;
///
/// let answer: String = courier
///     .convert_send_and_receive("", "service.echo", &"ping", &SendOptions::new())
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct Courier<C: MessageConverter = JsonConverter> {
    transport: Arc<dyn Transport>,
    router: ConnectionRouter,
    sender: MessageSender,
    coordinator: RequestReplyCoordinator,
    converter: C,
    config: CourierConfig,
}

impl Courier<JsonConverter> {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<ConnectionRegistry>,
        config: CourierConfig,
    ) -> Self {
        Self::with_converter(transport, registry, config, JsonConverter)
    }
}

impl<C: MessageConverter> Courier<C> {
    pub fn with_converter(
        transport: Arc<dyn Transport>,
        registry: Arc<ConnectionRegistry>,
        config: CourierConfig,
        converter: C,
    ) -> Self {
        let router = ConnectionRouter::new(registry);
        let sender = MessageSender::new(Arc::clone(&transport));
        let coordinator =
            RequestReplyCoordinator::new(Arc::clone(&transport), config.reply_queue.clone());
        Self {
            transport,
            router,
            sender,
            coordinator,
            converter,
            config,
        }
    }

    /// Start the reply listener. Required before any request/reply call.
    pub async fn start(&self) -> Result<()> {
        self.coordinator.start().await
    }

    pub async fn shutdown(&self) {
        self.coordinator.shutdown().await;
    }

    /// One-way send of an already-built message.
    pub async fn send(
        &self,
        exchange: &str,
        routing_key: &str,
        message: Message,
        options: &SendOptions,
    ) -> Result<()> {
        let connection = self.router.resolve(options.connection_key.as_deref())?;
        self.sender
            .send(
                &connection,
                &self.destination(exchange, routing_key),
                message,
                options.post_processor.as_deref(),
            )
            .await
    }

    /// Convert a payload to a message (headers from `options` included),
    /// apply the post-processor if any, and send it one-way.
    pub async fn convert_and_send<P>(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &P,
        options: &SendOptions,
    ) -> Result<()>
    where
        P: Serialize + ?Sized,
    {
        let connection = self.router.resolve(options.connection_key.as_deref())?;
        self.sender
            .convert_and_send(
                &connection,
                &self.destination(exchange, routing_key),
                payload,
                options.headers.as_ref(),
                &self.converter,
                options.post_processor.as_deref(),
            )
            .await
    }

    /// Send a request message and wait for its correlated reply.
    pub async fn send_and_receive(
        &self,
        exchange: &str,
        routing_key: &str,
        message: Message,
        options: &SendOptions,
    ) -> Result<Message> {
        let connection = self.router.resolve(options.connection_key.as_deref())?;
        self.coordinator
            .send_and_receive(
                &connection,
                &self.destination(exchange, routing_key),
                message,
                self.wait(options),
                options.post_processor.as_deref(),
            )
            .await
    }

    /// Round trip: convert the request payload, send, wait for the
    /// correlated reply, convert its payload to `R`. A reply that fails to
    /// convert surfaces as [`CourierError::Conversion`], distinct from
    /// transport and timeout failures.
    pub async fn convert_send_and_receive<P, R>(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &P,
        options: &SendOptions,
    ) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let message = self.converter.to_message(payload, options.headers.as_ref())?;
        let reply = self
            .send_and_receive(exchange, routing_key, message, options)
            .await?;
        self.converter.from_message(&reply)
    }

    /// Like [`Courier::convert_send_and_receive`] for callers that tolerate
    /// a missing reply: a timeout is `Ok(None)`, every other failure stays
    /// an error.
    pub async fn try_convert_send_and_receive<P, R>(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &P,
        options: &SendOptions,
    ) -> Result<Option<R>>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        match self
            .convert_send_and_receive(exchange, routing_key, payload, options)
            .await
        {
            Ok(reply) => Ok(Some(reply)),
            Err(CourierError::ReplyTimeout(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Poll a single message off a queue, `Ok(None)` when it is empty.
    pub async fn receive(&self, queue: &str, options: &SendOptions) -> Result<Option<Message>> {
        let connection = self.router.resolve(options.connection_key.as_deref())?;
        self.transport.receive(&connection, queue).await
    }

    pub async fn receive_and_convert<R>(
        &self,
        queue: &str,
        options: &SendOptions,
    ) -> Result<Option<R>>
    where
        R: DeserializeOwned,
    {
        match self.receive(queue, options).await? {
            Some(message) => Ok(Some(self.converter.from_message(&message)?)),
            None => Ok(None),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.router.registry()
    }

    pub fn reply_queue(&self) -> &str {
        self.coordinator.reply_queue()
    }

    /// Number of requests currently awaiting a reply.
    pub fn pending_requests(&self) -> usize {
        self.coordinator.pending_requests()
    }

    fn destination(&self, exchange: &str, routing_key: &str) -> Destination {
        let destination = Destination::new(exchange, routing_key);
        if destination.is_unspecified() {
            Destination::new(
                &self.config.default_exchange,
                &self.config.default_routing_key,
            )
        } else {
            destination
        }
    }

    fn wait(&self, options: &SendOptions) -> Duration {
        options.timeout.unwrap_or(self.config.default_timeout)
    }
}
